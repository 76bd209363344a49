use thiserror::Error;

/// Failure of one alarm delivery. The scheduler logs it, releases the lease
/// and leaves the row in place so a later tick retries.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// The stored ICS could not be read or has no VEVENT.
    #[error("invalid calendar content: {0}")]
    Content(String),

    #[error("template rendering failed: {0}")]
    Render(String),

    #[error("mail delivery failed: {0}")]
    Send(String),

    /// Storage failed before anything was sent.
    #[error("alarm store error: {0}")]
    Store(#[source] anyhow::Error),

    /// The mail went out but the row could not be deleted or rescheduled.
    #[error("cleanup failed after delivery: {0}")]
    Cleanup(#[source] anyhow::Error),
}

impl From<alarmd_calendar::IcsError> for TriggerError {
    fn from(err: alarmd_calendar::IcsError) -> Self {
        TriggerError::Content(err.to_string())
    }
}

impl From<minijinja::Error> for TriggerError {
    fn from(err: minijinja::Error) -> Self {
        TriggerError::Render(err.to_string())
    }
}
