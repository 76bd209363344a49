use thiserror::Error;

#[derive(Debug, Error)]
pub enum LeaseError {
    /// Another holder owns an unexpired lease on this key. Expected under
    /// contention; callers skip the alarm rather than treat it as a failure.
    #[error("lease {0} is already held")]
    AlreadyHeld(String),
    #[error("lease backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    /// The recipient's domain is not registered with this server.
    #[error("domain not found: {0}")]
    DomainNotFound(String),
    #[error("settings backend error: {0}")]
    Backend(#[from] anyhow::Error),
}
