use chrono::Duration;

use crate::settings::Language;

#[derive(Clone, Copy)]
enum Unit {
    Day,
    Hour,
    Minute,
}

fn unit_label(unit: Unit, count: i64, language: Language) -> &'static str {
    match language {
        Language::English => {
            let singular = count == 1;
            match (unit, singular) {
                (Unit::Day, true) => "day",
                (Unit::Day, false) => "days",
                (Unit::Hour, true) => "hour",
                (Unit::Hour, false) => "hours",
                (Unit::Minute, true) => "minute",
                (Unit::Minute, false) => "minutes",
            }
        }
        Language::French => {
            // French treats zero as singular.
            let singular = count <= 1;
            match (unit, singular) {
                (Unit::Day, true) => "jour",
                (Unit::Day, false) => "jours",
                (Unit::Hour, true) => "heure",
                (Unit::Hour, false) => "heures",
                (Unit::Minute, true) => "minute",
                (Unit::Minute, false) => "minutes",
            }
        }
    }
}

fn part(count: i64, unit: Unit, language: Language) -> String {
    format!("{count} {}", unit_label(unit, count, language))
}

/// Human-readable "time until the event" string.
///
/// Rounds up to whole minutes and shows at most two units: days and hours,
/// hours and minutes, or minutes alone. A zero trailing unit is omitted.
/// Negative durations format as zero minutes.
pub fn format_duration(duration: Duration, language: Language) -> String {
    let millis = duration.num_milliseconds().max(0);
    let total_minutes = (millis + 59_999) / 60_000;

    let days = total_minutes / (24 * 60);
    let hours = (total_minutes % (24 * 60)) / 60;
    let minutes = total_minutes % 60;

    let mut parts = Vec::with_capacity(2);
    if days >= 1 {
        parts.push(part(days, Unit::Day, language));
        if hours > 0 {
            parts.push(part(hours, Unit::Hour, language));
        }
    } else if hours >= 1 {
        parts.push(part(hours, Unit::Hour, language));
        if minutes > 0 {
            parts.push(part(minutes, Unit::Minute, language));
        }
    } else {
        parts.push(part(minutes, Unit::Minute, language));
    }
    parts.join(" ")
}
