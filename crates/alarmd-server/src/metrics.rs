use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const ALARMS_DELIVERED: &str = "calendar_alarm_delivered_total";
pub const TICK_DURATION: &str = "calendar_alarm_tick_duration_seconds";
pub const ALARM_DURATION: &str = "calendar_alarm_duration_seconds";

fn describe() {
    describe_counter!(ALARMS_DELIVERED, "Alarm emails handed to the mail transport");
    describe_histogram!(
        TICK_DURATION,
        Unit::Seconds,
        "Wall time of one scheduler tick"
    );
    describe_histogram!(
        ALARM_DURATION,
        Unit::Seconds,
        "Wall time spent on a single alarm, lease included"
    );
}

/// Install the process-wide Prometheus recorder. Call once, from `main`.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe();
    Ok(handle)
}
