pub mod clock;
pub mod config;
pub mod duration;
pub mod error;
pub mod event;
pub mod lease;
pub mod recurrence;
pub mod settings;
pub mod store;
