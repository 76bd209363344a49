use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::Value;
use tower::ServiceExt;

use alarmd_calendar::IcsRecurrenceAdvancer;
use alarmd_core::clock::{Clock, SystemClock};
use alarmd_core::config::{Config, MailConfig, SchedulerConfig, SchedulerMode};
use alarmd_core::lease::NoopLeaseProvider;
use alarmd_core::store::AlarmStore;
use alarmd_duckdb::DuckDbBackend;
use alarmd_server::app::build_app;
use alarmd_server::mail::SmtpMailSender;
use alarmd_server::render::MessageGeneratorFactory;
use alarmd_server::scheduler::{AlarmScheduler, AlarmTrigger};
use alarmd_server::metrics::ALARMS_DELIVERED;
use alarmd_server::state::AppState;

fn test_config(mode: SchedulerMode) -> Config {
    Config {
        port: 0,
        data_dir: "/tmp/alarmd-test".to_string(),
        duckdb_memory_limit: "1GB".to_string(),
        node_id: "node-test".to_string(),
        scheduler: SchedulerConfig {
            mode,
            ..SchedulerConfig::default()
        },
        mail: MailConfig {
            smtp_noop: true,
            ..MailConfig::default()
        },
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request")
}

async fn body_bytes(response: axum::http::Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes()
        .to_vec()
}

#[tokio::test]
async fn test_health_reports_version_and_scheduler_mode() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("in-memory DuckDB"));
    let state = Arc::new(AppState::new(db, test_config(SchedulerMode::Single), None));
    let app = build_app(state);

    let response = app.oneshot(get("/health")).await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let json: Value = serde_json::from_slice(&body_bytes(response).await).expect("parse JSON");
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(json["scheduler"]["mode"], "single");
    assert_eq!(json["scheduler"]["running"], false);
}

#[tokio::test]
async fn test_health_reports_a_running_scheduler() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("in-memory DuckDB"));
    let config = test_config(SchedulerMode::Single);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn AlarmStore> = db.clone();
    let trigger = AlarmTrigger::new(
        Arc::clone(&clock),
        Arc::clone(&store),
        db.clone(),
        Arc::new(IcsRecurrenceAdvancer::new(Arc::clone(&clock))),
        Arc::new(MessageGeneratorFactory::embedded().expect("templates")),
        Arc::new(SmtpMailSender::from_config(&config.mail)),
        "no-reply@example.org",
    );
    let scheduler = Arc::new(AlarmScheduler::new(
        clock,
        store,
        Arc::new(NoopLeaseProvider),
        trigger,
        config.scheduler.clone(),
    ));
    scheduler.start();

    let state = Arc::new(AppState::new(db, config, None).with_scheduler(Arc::clone(&scheduler)));
    let response = build_app(state).oneshot(get("/health")).await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = serde_json::from_slice(&body_bytes(response).await).expect("parse JSON");
    assert_eq!(json["scheduler"]["mode"], "single");
    assert_eq!(json["scheduler"]["running"], true);

    scheduler.stop();
}

#[tokio::test]
async fn test_metrics_renders_prometheus_text() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::with_local_recorder(&recorder, || {
        metrics::counter!(ALARMS_DELIVERED).increment(3);
    });

    let db = Arc::new(DuckDbBackend::open_in_memory().expect("in-memory DuckDB"));
    let state = Arc::new(AppState::new(
        db,
        test_config(SchedulerMode::Cluster),
        Some(handle),
    ));
    let app = build_app(state);

    let response = app.oneshot(get("/metrics")).await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(body_bytes(response).await).expect("utf8");
    assert!(text.contains("calendar_alarm_delivered_total 3"), "{text}");
}

#[tokio::test]
async fn test_metrics_without_recorder_is_unavailable() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("in-memory DuckDB"));
    let state = Arc::new(AppState::new(db, test_config(SchedulerMode::Disabled), None));
    let app = build_app(state);

    let response = app.oneshot(get("/metrics")).await.expect("request");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
