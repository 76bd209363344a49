use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum IcsError {
    #[error("calendar is empty")]
    Empty,
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("missing {0} property")]
    MissingProperty(&'static str),
    #[error("invalid date value {0:?}")]
    InvalidDate(String),
    #[error("invalid duration {0:?}")]
    InvalidDuration(String),
    #[error("unsupported recurrence rule {0:?}")]
    InvalidRule(String),
}

/// One content line: `NAME;PARAM=VALUE:value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub params: Vec<(String, String)>,
    pub value: String,
}

impl Property {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The value with TEXT escapes resolved.
    pub fn text(&self) -> String {
        unescape_text(&self.value)
    }

    pub fn date_value(&self) -> Result<DateValue, IcsError> {
        DateValue::parse(&self.value, self.param("TZID"), self.param("VALUE"))
    }

    /// Every date of a list-valued property such as EXDATE.
    pub fn date_values(&self) -> Result<Vec<DateValue>, IcsError> {
        self.value
            .split(',')
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(|raw| DateValue::parse(raw, self.param("TZID"), self.param("VALUE")))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub name: String,
    pub properties: Vec<Property>,
    pub components: Vec<Component>,
}

impl Component {
    fn new(name: String) -> Self {
        Self {
            name,
            properties: Vec::new(),
            components: Vec::new(),
        }
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties
            .iter()
            .find(|prop| prop.name.eq_ignore_ascii_case(name))
    }

    pub fn properties<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Property> + 'a {
        self.properties
            .iter()
            .filter(move |prop| prop.name.eq_ignore_ascii_case(name))
    }

    pub fn components<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Component> + 'a {
        self.components
            .iter()
            .filter(move |child| child.name.eq_ignore_ascii_case(name))
    }

    /// Unescaped text of `name`, `None` when absent or blank.
    pub fn text(&self, name: &str) -> Option<String> {
        self.property(name)
            .map(Property::text)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn date(&self, name: &str) -> Result<Option<DateValue>, IcsError> {
        self.property(name).map(Property::date_value).transpose()
    }
}

/// DATE or DATE-TIME value, keeping the zone it was written in so
/// recurrences can be expanded on local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateValue {
    Date(NaiveDate),
    Utc(DateTime<Utc>),
    Zoned(NaiveDateTime, Tz),
    /// No zone information; read as UTC.
    Floating(NaiveDateTime),
}

const DATE_TIME_FORMAT: &str = "%Y%m%dT%H%M%S";
const DATE_FORMAT: &str = "%Y%m%d";

impl DateValue {
    pub fn parse(raw: &str, tzid: Option<&str>, value_type: Option<&str>) -> Result<Self, IcsError> {
        let raw = raw.trim();
        let is_date = value_type.is_some_and(|kind| kind.eq_ignore_ascii_case("DATE"))
            || (raw.len() == 8 && !raw.contains('T'));
        if is_date {
            return NaiveDate::parse_from_str(raw, DATE_FORMAT)
                .map(DateValue::Date)
                .map_err(|_| IcsError::InvalidDate(raw.to_string()));
        }
        if let Some(utc) = raw.strip_suffix('Z') {
            return NaiveDateTime::parse_from_str(utc, DATE_TIME_FORMAT)
                .map(|naive| DateValue::Utc(naive.and_utc()))
                .map_err(|_| IcsError::InvalidDate(raw.to_string()));
        }
        let local = NaiveDateTime::parse_from_str(raw, DATE_TIME_FORMAT)
            .map_err(|_| IcsError::InvalidDate(raw.to_string()))?;
        match tzid {
            Some(tzid) => match tzid.trim_start_matches('/').parse::<Tz>() {
                Ok(tz) => Ok(DateValue::Zoned(local, tz)),
                Err(_) => {
                    debug!(tzid, "unknown TZID, reading date as floating time");
                    Ok(DateValue::Floating(local))
                }
            },
            None => Ok(DateValue::Floating(local)),
        }
    }

    pub fn is_date(&self) -> bool {
        matches!(self, DateValue::Date(_))
    }

    /// Wall-clock reading of the value in its own zone.
    pub fn local(&self) -> NaiveDateTime {
        match self {
            DateValue::Date(date) => date.and_time(chrono::NaiveTime::MIN),
            DateValue::Utc(instant) => instant.naive_utc(),
            DateValue::Zoned(local, _) | DateValue::Floating(local) => *local,
        }
    }

    /// Same zone, different wall-clock reading.
    pub fn with_local(&self, local: NaiveDateTime) -> DateValue {
        match self {
            DateValue::Date(_) => DateValue::Date(local.date()),
            DateValue::Utc(_) => DateValue::Utc(local.and_utc()),
            DateValue::Zoned(_, tz) => DateValue::Zoned(local, *tz),
            DateValue::Floating(_) => DateValue::Floating(local),
        }
    }

    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            DateValue::Zoned(local, tz) => resolve_local(*tz, *local),
            other => other.local().and_utc(),
        }
    }
}

/// Map a wall-clock time in `tz` to an instant. Ambiguous times take the
/// earlier instant; times inside a DST gap move forward by an hour.
pub fn resolve_local(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| {
            local
                .checked_add_signed(Duration::hours(1))
                .and_then(|later| tz.from_local_datetime(&later).earliest())
        })
        .map(|zoned| zoned.with_timezone(&Utc))
        .unwrap_or_else(|| local.and_utc())
}

/// Format an instant the way RECURRENCE-ID values are stored on alarm rows.
pub fn format_utc(instant: DateTime<Utc>) -> String {
    instant.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Parse an RFC 5545 DURATION such as `-PT15M`, `P1DT2H` or `-P1W`.
pub fn parse_duration(raw: &str) -> Result<Duration, IcsError> {
    let invalid = || IcsError::InvalidDuration(raw.to_string());
    let trimmed = raw.trim();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let rest = rest.strip_prefix('P').ok_or_else(invalid)?;
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total = Duration::zero();
    let mut in_time = false;
    let mut digits = String::new();
    let mut saw_unit = false;
    for ch in rest.chars() {
        match ch {
            '0'..='9' => digits.push(ch),
            'T' if !in_time && digits.is_empty() => in_time = true,
            unit => {
                let amount: i64 = digits.parse().map_err(|_| invalid())?;
                digits.clear();
                let part = match (unit, in_time) {
                    ('W', false) => Duration::try_weeks(amount),
                    ('D', false) => Duration::try_days(amount),
                    ('H', true) => Duration::try_hours(amount),
                    ('M', true) => Duration::try_minutes(amount),
                    ('S', true) => Duration::try_seconds(amount),
                    _ => return Err(invalid()),
                };
                total = part
                    .and_then(|part| total.checked_add(&part))
                    .ok_or_else(invalid)?;
                saw_unit = true;
            }
        }
    }
    if !digits.is_empty() || !saw_unit {
        return Err(invalid());
    }
    Ok(if negative { -total } else { total })
}

pub fn unescape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn unfold(ics: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in ics.split('\n') {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(rest) = raw.strip_prefix(' ').or_else(|| raw.strip_prefix('\t')) {
            if let Some(last) = lines.last_mut() {
                last.push_str(rest);
                continue;
            }
        }
        lines.push(raw.to_string());
    }
    lines
}

/// Split on `sep` outside double quotes.
fn split_unquoted(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (idx, ch) in input.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                parts.push(&input[start..idx]);
                start = idx + ch.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn parse_content_line(line: &str, line_no: usize) -> Result<Property, IcsError> {
    let malformed = |reason: &str| IcsError::Malformed {
        line: line_no,
        reason: reason.to_string(),
    };

    let mut in_quotes = false;
    let colon = line
        .char_indices()
        .find(|&(_, ch)| {
            if ch == '"' {
                in_quotes = !in_quotes;
            }
            ch == ':' && !in_quotes
        })
        .map(|(idx, _)| idx)
        .ok_or_else(|| malformed("missing ':'"))?;

    let (head, value) = (&line[..colon], &line[colon + 1..]);
    let mut segments = split_unquoted(head, ';').into_iter();
    let name = segments
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| malformed("missing property name"))?
        .to_ascii_uppercase();

    let mut params = Vec::new();
    for segment in segments {
        let (key, raw) = segment
            .split_once('=')
            .ok_or_else(|| malformed("parameter without '='"))?;
        let raw = raw.trim();
        let unquoted = raw
            .strip_prefix('"')
            .and_then(|inner| inner.strip_suffix('"'))
            .unwrap_or(raw);
        params.push((key.trim().to_ascii_uppercase(), unquoted.to_string()));
    }

    Ok(Property {
        name,
        params,
        value: value.to_string(),
    })
}

/// Parse an iCalendar document into its root component (normally VCALENDAR).
pub fn parse_calendar(ics: &str) -> Result<Component, IcsError> {
    let mut stack: Vec<Component> = Vec::new();
    let mut root: Option<Component> = None;

    for (idx, line) in unfold(ics).iter().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let prop = parse_content_line(line, line_no)?;
        match prop.name.as_str() {
            "BEGIN" => stack.push(Component::new(prop.value.trim().to_ascii_uppercase())),
            "END" => {
                let done = stack.pop().ok_or_else(|| IcsError::Malformed {
                    line: line_no,
                    reason: "END without BEGIN".to_string(),
                })?;
                if !done.name.eq_ignore_ascii_case(prop.value.trim()) {
                    return Err(IcsError::Malformed {
                        line: line_no,
                        reason: format!("END:{} closes {}", prop.value.trim(), done.name),
                    });
                }
                match stack.last_mut() {
                    Some(parent) => parent.components.push(done),
                    None if root.is_none() => root = Some(done),
                    None => {}
                }
            }
            _ => stack
                .last_mut()
                .ok_or_else(|| IcsError::Malformed {
                    line: line_no,
                    reason: "property outside of a component".to_string(),
                })?
                .properties
                .push(prop),
        }
    }

    if let Some(open) = stack.last() {
        return Err(IcsError::Malformed {
            line: 0,
            reason: format!("unterminated {}", open.name),
        });
    }
    root.ok_or(IcsError::Empty)
}
