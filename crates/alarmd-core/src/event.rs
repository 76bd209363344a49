use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::recurrence::AlarmInstant;

/// A scheduled alarm, mirroring one row of the `alarm_events` table.
///
/// Identity is the pair (`event_uid`, `recipient`): a given recipient has at
/// most one pending alarm per event at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmEvent {
    pub event_uid: String,
    /// When the notification should fire. Always `<= event_start_time`.
    pub alarm_time: DateTime<Utc>,
    pub event_start_time: DateTime<Utc>,
    pub recurring: bool,
    /// Identifies the occurrence for recurring events, `None` otherwise.
    pub recurrence_id: Option<String>,
    pub recipient: String,
    /// Full iCalendar snapshot of the event at scheduling time.
    pub ics: String,
}

impl AlarmEvent {
    /// `alarm_time <= now < event_start_time`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.alarm_time <= now && now < self.event_start_time
    }

    /// The event has started (or is starting right now); delivering would be late.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.event_start_time <= now
    }

    /// Stable lease key for this alarm occurrence.
    ///
    /// sha256(uid | recipient | recurrence-id | alarm-time-millis), hex encoded.
    /// Including the trigger time means a rescheduled row for the next
    /// occurrence never collides with a lease left on the previous one.
    pub fn lease_key(&self) -> String {
        let input = format!(
            "{}|{}|{}|{}",
            self.event_uid,
            self.recipient.to_ascii_lowercase(),
            self.recurrence_id.as_deref().unwrap_or(""),
            self.alarm_time.timestamp_millis()
        );
        let hash = Sha256::digest(input.as_bytes());
        format!("alarm:{}", hex::encode(hash))
    }

    /// The row that replaces this one for `recipient` once `next` fires.
    pub fn rescheduled(&self, next: &AlarmInstant, recipient: &str) -> AlarmEvent {
        AlarmEvent {
            event_uid: self.event_uid.clone(),
            alarm_time: next.alarm_time,
            event_start_time: next.event_start_time,
            recurring: self.recurring,
            recurrence_id: next.recurrence_id.clone(),
            recipient: recipient.to_string(),
            ics: self.ics.clone(),
        }
    }
}

impl fmt::Display for AlarmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} for {}", self.event_uid, self.recipient)?;
        if let Some(recurrence_id) = &self.recurrence_id {
            write!(f, " (occurrence {recurrence_id})")?;
        }
        write!(f, " at {}", self.alarm_time.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn sample() -> AlarmEvent {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        AlarmEvent {
            event_uid: "evt-1".to_string(),
            alarm_time: start - Duration::minutes(15),
            event_start_time: start,
            recurring: false,
            recurrence_id: None,
            recipient: "bob@example.org".to_string(),
            ics: "BEGIN:VCALENDAR\r\nEND:VCALENDAR".to_string(),
        }
    }

    #[test]
    fn due_window_is_half_open() {
        let alarm = sample();
        assert!(!alarm.is_due(alarm.alarm_time - Duration::seconds(1)));
        assert!(alarm.is_due(alarm.alarm_time));
        assert!(alarm.is_due(alarm.event_start_time - Duration::milliseconds(1)));
        assert!(!alarm.is_due(alarm.event_start_time));
        assert!(alarm.is_stale(alarm.event_start_time));
    }

    #[test]
    fn lease_key_is_stable_and_occurrence_specific() {
        let alarm = sample();
        assert_eq!(alarm.lease_key(), sample().lease_key());
        assert!(alarm.lease_key().starts_with("alarm:"));

        let mut other_recipient = sample();
        other_recipient.recipient = "alice@example.org".to_string();
        assert_ne!(alarm.lease_key(), other_recipient.lease_key());

        let mut next_occurrence = sample();
        next_occurrence.alarm_time += Duration::days(1);
        assert_ne!(alarm.lease_key(), next_occurrence.lease_key());
    }

    #[test]
    fn lease_key_ignores_recipient_case() {
        let mut upper = sample();
        upper.recipient = "BOB@example.org".to_string();
        assert_eq!(upper.lease_key(), sample().lease_key());
    }

    #[test]
    fn rescheduled_keeps_identity_and_snapshot() {
        let alarm = AlarmEvent {
            recurring: true,
            recurrence_id: Some("20260301T100000Z".to_string()),
            ..sample()
        };
        let next = AlarmInstant {
            alarm_time: alarm.alarm_time + Duration::days(1),
            event_start_time: alarm.event_start_time + Duration::days(1),
            recurrence_id: Some("20260302T100000Z".to_string()),
            recipients: vec!["carol@example.org".to_string()],
        };
        let row = alarm.rescheduled(&next, "carol@example.org");
        assert_eq!(row.event_uid, alarm.event_uid);
        assert_eq!(row.ics, alarm.ics);
        assert!(row.recurring);
        assert_eq!(row.recipient, "carol@example.org");
        assert_eq!(row.alarm_time, next.alarm_time);
        assert_eq!(row.recurrence_id.as_deref(), Some("20260302T100000Z"));
    }
}
