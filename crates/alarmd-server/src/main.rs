use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use alarmd_calendar::IcsRecurrenceAdvancer;
use alarmd_core::clock::{Clock, SystemClock};
use alarmd_core::store::AlarmStore;
use alarmd_duckdb::DuckDbBackend;
use alarmd_server::mail::SmtpMailSender;
use alarmd_server::render::MessageGeneratorFactory;
use alarmd_server::scheduler::{select_lease_provider, AlarmScheduler, AlarmTrigger};
use alarmd_server::state::AppState;

/// `alarmd health`: liveness check for Docker HEALTHCHECK.
///
/// Calls `GET http://localhost:$ALARMD_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("ALARMD_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("health") {
        run_health_check();
    }
    // Structured JSON logging. Level controlled via RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("alarmd=info".parse()?),
        )
        .json()
        .init();

    let cfg = alarmd_core::config::Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = format!("{}/alarmd.db", cfg.data_dir);
    let db = Arc::new(DuckDbBackend::open(&db_path, &cfg.duckdb_memory_limit)?);

    let prometheus = alarmd_server::metrics::install_recorder()?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn AlarmStore> = db.clone();
    let leases = select_lease_provider(
        cfg.scheduler.mode,
        Arc::clone(&db),
        Arc::clone(&clock),
        &cfg.node_id,
    );
    let trigger = AlarmTrigger::new(
        Arc::clone(&clock),
        Arc::clone(&store),
        db.clone(),
        Arc::new(IcsRecurrenceAdvancer::new(Arc::clone(&clock))),
        Arc::new(MessageGeneratorFactory::embedded()?),
        Arc::new(SmtpMailSender::from_config(&cfg.mail)),
        cfg.mail.sender.clone(),
    );
    let scheduler = Arc::new(AlarmScheduler::new(clock, store, leases, trigger, cfg.scheduler.clone()));
    scheduler.start();

    let addr = format!("0.0.0.0:{}", cfg.port);
    info!(
        port = cfg.port,
        node_id = %cfg.node_id,
        scheduler = cfg.scheduler.mode.as_str(),
        "alarmd listening on {}",
        addr
    );
    let state = Arc::new(AppState::new(db, cfg, Some(prometheus)).with_scheduler(Arc::clone(&scheduler)));
    let app = alarmd_server::app::build_app(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    scheduler.stop();
    Ok(())
}
