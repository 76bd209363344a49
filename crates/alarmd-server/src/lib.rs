pub mod app;
pub mod error;
pub mod mail;
pub mod metrics;
pub mod render;
pub mod routes;
pub mod scheduler;
pub mod state;
