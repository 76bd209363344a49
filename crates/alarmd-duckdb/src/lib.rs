pub mod alarms;
pub mod backend;
pub mod leases;
pub mod schema;
pub mod settings;

pub use backend::DuckDbBackend;
pub use leases::DuckDbLeaseProvider;

