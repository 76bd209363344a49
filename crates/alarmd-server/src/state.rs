use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use alarmd_core::config::Config;
use alarmd_duckdb::DuckDbBackend;

use crate::scheduler::AlarmScheduler;

/// Shared state injected into every Axum handler via
/// [`axum::extract::State`].
pub struct AppState {
    /// Also backs the alarm store, lease table and settings resolver.
    pub db: Arc<DuckDbBackend>,

    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,

    /// Renders `/metrics`. `None` when no recorder was installed.
    pub prometheus: Option<PrometheusHandle>,

    /// The polling scheduler, when this process runs one.
    pub scheduler: Option<Arc<AlarmScheduler>>,
}

impl AppState {
    pub fn new(db: Arc<DuckDbBackend>, config: Config, prometheus: Option<PrometheusHandle>) -> Self {
        Self {
            db,
            config: Arc::new(config),
            prometheus,
            scheduler: None,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<AlarmScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}
