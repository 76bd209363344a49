use chrono::{DateTime, Utc};

/// The next firing of an alarm series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmInstant {
    pub alarm_time: DateTime<Utc>,
    pub event_start_time: DateTime<Utc>,
    /// Set when the instant belongs to a recurring series.
    pub recurrence_id: Option<String>,
    pub recipients: Vec<String>,
}

/// Computes the next alarm instant of an event after the current one fired.
pub trait RecurrenceAdvancer: Send + Sync + 'static {
    /// `Ok(None)` when the series has no further alarm for `recipient`.
    fn advance(&self, ics: &str, recipient: &str) -> anyhow::Result<Option<AlarmInstant>>;
}
