use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Months, Utc};
use tracing::debug;

use alarmd_core::clock::Clock;
use alarmd_core::recurrence::{AlarmInstant, RecurrenceAdvancer};

use crate::details::{sequence_of, strip_mailto, Person};
use crate::ics::{format_utc, parse_calendar, parse_duration, Component, DateValue, IcsError};
use crate::rrule::RecurrenceRule;

/// Reference [`RecurrenceAdvancer`] working directly on the ICS snapshot
/// stored with each alarm row.
///
/// Only `ACTION:EMAIL` alarms with a relative TRIGGER are considered, and
/// only occurrences the user has accepted that are not cancelled. Recurring
/// series are expanded one year ahead of the clock.
pub struct IcsRecurrenceAdvancer {
    clock: Arc<dyn Clock>,
}

struct Occurrence<'a> {
    event: &'a Component,
    start: DateValue,
    recurrence_id: Option<String>,
}

fn start_of(event: &Component) -> Result<DateValue, IcsError> {
    event
        .date("DTSTART")?
        .ok_or(IcsError::MissingProperty("DTSTART"))
}

fn recurrence_id_of(value: &DateValue) -> String {
    match value {
        DateValue::Date(date) => date.format("%Y%m%d").to_string(),
        other => format_utc(other.to_utc()),
    }
}

fn event_length(event: &Component) -> Duration {
    let from_end = start_of(event).ok().and_then(|start| {
        event
            .date("DTEND")
            .ok()
            .flatten()
            .map(|end| end.to_utc() - start.to_utc())
    });
    from_end
        .or_else(|| {
            event
                .property("DURATION")
                .and_then(|prop| parse_duration(&prop.value).ok())
        })
        .unwrap_or_else(Duration::zero)
}

fn version_key(event: &Component) -> (i64, Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let instant = |name: &str| {
        event
            .date(name)
            .ok()
            .flatten()
            .map(|value| value.to_utc())
    };
    (sequence_of(event), instant("LAST-MODIFIED"), instant("DTSTAMP"))
}

fn has_accepted(event: &Component, user: &str) -> bool {
    event
        .properties("ATTENDEE")
        .filter_map(Person::from_property)
        .any(|person| person.email.eq_ignore_ascii_case(user.trim()) && person.has_accepted())
}

fn is_cancelled(event: &Component) -> bool {
    event
        .text("STATUS")
        .is_some_and(|status| status.trim().eq_ignore_ascii_case("CANCELLED"))
}

fn alarm_instants(occurrence: &Occurrence<'_>) -> Vec<AlarmInstant> {
    let start = occurrence.start.to_utc();
    let mut instants = Vec::new();
    for valarm in occurrence.event.components("VALARM") {
        let is_email = valarm
            .text("ACTION")
            .is_some_and(|action| action.trim().eq_ignore_ascii_case("EMAIL"));
        if !is_email {
            debug!("skipping VALARM without ACTION:EMAIL");
            continue;
        }
        let Some(trigger) = valarm.property("TRIGGER") else {
            debug!("skipping VALARM without TRIGGER");
            continue;
        };
        if trigger
            .param("VALUE")
            .is_some_and(|kind| kind.eq_ignore_ascii_case("DATE-TIME"))
        {
            debug!("skipping VALARM with an absolute TRIGGER");
            continue;
        }
        let offset = match parse_duration(&trigger.value) {
            Ok(offset) => offset,
            Err(err) => {
                debug!(error = %err, "skipping VALARM with an unreadable TRIGGER");
                continue;
            }
        };
        let anchor = if trigger
            .param("RELATED")
            .is_some_and(|related| related.eq_ignore_ascii_case("END"))
        {
            start.checked_add_signed(event_length(occurrence.event))
        } else {
            Some(start)
        };
        let Some(alarm_time) = anchor.and_then(|anchor| anchor.checked_add_signed(offset)) else {
            debug!(trigger = %trigger.value, "skipping VALARM whose TRIGGER is out of range");
            continue;
        };
        let recipients = valarm
            .properties("ATTENDEE")
            .map(|prop| strip_mailto(&prop.value))
            .filter(|address| !address.is_empty())
            .collect();
        instants.push(AlarmInstant {
            alarm_time,
            event_start_time: start,
            recurrence_id: occurrence.recurrence_id.clone(),
            recipients,
        });
    }
    instants
}

impl IcsRecurrenceAdvancer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Earliest alarm of `ics` that fires strictly after now, for `user`.
    pub fn next_alarm(&self, ics: &str, user: &str) -> Result<Option<AlarmInstant>, IcsError> {
        let now = self.clock.now();
        let calendar = parse_calendar(ics)?;
        let events: Vec<&Component> = calendar.components("VEVENT").collect();

        let occurrences = if events.iter().any(|event| event.property("RRULE").is_some()) {
            self.series_occurrences(&events, user, now)?
        } else {
            // Several copies of a single event: the latest revision wins.
            let Some(event) = events.iter().copied().max_by_key(|event| version_key(event)) else {
                return Ok(None);
            };
            let start = start_of(event)?;
            let recurrence_id = event
                .date("RECURRENCE-ID")?
                .map(|value| recurrence_id_of(&value));
            if start.to_utc() > now && has_accepted(event, user) {
                vec![Occurrence {
                    event,
                    start,
                    recurrence_id,
                }]
            } else {
                Vec::new()
            }
        };

        Ok(occurrences
            .iter()
            .filter(|occurrence| !is_cancelled(occurrence.event))
            .flat_map(alarm_instants)
            .filter(|instant| instant.alarm_time > now)
            .min_by_key(|instant| instant.alarm_time))
    }

    fn series_occurrences<'a>(
        &self,
        events: &[&'a Component],
        user: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Occurrence<'a>>, IcsError> {
        let Some(master) = events
            .iter()
            .copied()
            .find(|event| event.property("RECURRENCE-ID").is_none())
        else {
            return Ok(Vec::new());
        };
        let master_start = start_of(master)?;
        let rule: RecurrenceRule = master
            .property("RRULE")
            .ok_or(IcsError::MissingProperty("RRULE"))?
            .value
            .parse()?;

        let mut excluded = HashSet::new();
        for exdate in master.properties("EXDATE") {
            for value in exdate.date_values()? {
                excluded.insert(value.to_utc());
            }
        }

        let mut overrides: HashMap<DateTime<Utc>, &'a Component> = HashMap::new();
        for event in events.iter().copied() {
            if let Some(recurrence_id) = event.date("RECURRENCE-ID")? {
                overrides.insert(recurrence_id.to_utc(), event);
            }
        }

        let window_end = now
            .checked_add_months(Months::new(12))
            .unwrap_or(now + Duration::days(366));

        let mut occurrences = Vec::new();
        for value in rule.occurrences(master_start, window_end) {
            let instant = value.to_utc();
            if instant <= now || excluded.contains(&instant) {
                continue;
            }
            let recurrence_id = Some(recurrence_id_of(&value));
            let occurrence = match overrides.get(&instant) {
                Some(&overridden) => Occurrence {
                    event: overridden,
                    start: start_of(overridden)?,
                    recurrence_id,
                },
                None => Occurrence {
                    event: master,
                    start: value,
                    recurrence_id,
                },
            };
            if has_accepted(occurrence.event, user) {
                occurrences.push(occurrence);
            }
        }
        Ok(occurrences)
    }
}

impl RecurrenceAdvancer for IcsRecurrenceAdvancer {
    fn advance(&self, ics: &str, recipient: &str) -> anyhow::Result<Option<AlarmInstant>> {
        Ok(self.next_alarm(ics, recipient)?)
    }
}
