use std::str::FromStr;
use std::time::Duration;

/// Alarms fetched per scheduler tick unless `ALARMD_SCHEDULER_BATCH_SIZE` says otherwise.
pub const BATCH_SIZE_DEFAULT: usize = 100;
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_INITIAL_JITTER_MAX: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    /// DuckDB `memory_limit` size string, e.g. `"1GB"`.
    pub duckdb_memory_limit: String,
    /// Identity written into lease rows; unique per process.
    pub node_id: String,
    pub scheduler: SchedulerConfig,
    pub mail: MailConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    /// Upper bound for the random delay before the first tick and after every batch.
    pub initial_jitter_max: Duration,
    pub batch_size: usize,
    pub mode: SchedulerMode,
    pub lease_ttl: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            initial_jitter_max: DEFAULT_INITIAL_JITTER_MAX,
            batch_size: BATCH_SIZE_DEFAULT,
            mode: SchedulerMode::Cluster,
            lease_ttl: DEFAULT_LEASE_TTL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMode {
    /// No polling at all; alarms are handled by some other node.
    Disabled,
    /// Sole deployment; leases are not needed.
    Single,
    /// Several nodes share the store and must take a lease per alarm.
    Cluster,
}

impl SchedulerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerMode::Disabled => "disabled",
            SchedulerMode::Single => "single",
            SchedulerMode::Cluster => "cluster",
        }
    }
}

impl FromStr for SchedulerMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "disabled" => Ok(SchedulerMode::Disabled),
            "single" => Ok(SchedulerMode::Single),
            "cluster" => Ok(SchedulerMode::Cluster),
            other => Err(format!("invalid scheduler mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MailConfig {
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    /// Log instead of dispatching; every send reports success.
    pub smtp_noop: bool,
    /// `From:` address of alarm notifications.
    pub sender: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup. `from_env` passes the
    /// process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let scheduler = SchedulerConfig {
            poll_interval: parse_duration_var(
                &lookup,
                "ALARMD_SCHEDULER_POLL_INTERVAL",
                DEFAULT_POLL_INTERVAL,
            )?,
            initial_jitter_max: parse_duration_var(
                &lookup,
                "ALARMD_SCHEDULER_JITTER_MAX",
                DEFAULT_INITIAL_JITTER_MAX,
            )?,
            batch_size: lookup("ALARMD_SCHEDULER_BATCH_SIZE")
                .and_then(|v| v.trim().parse::<usize>().ok())
                .map(|v| v.clamp(1, 1000))
                .unwrap_or(BATCH_SIZE_DEFAULT),
            mode: lookup("ALARMD_SCHEDULER_MODE")
                .map(|v| v.parse::<SchedulerMode>())
                .transpose()?
                .unwrap_or(SchedulerMode::Cluster),
            lease_ttl: parse_duration_var(&lookup, "ALARMD_LEASE_TTL", DEFAULT_LEASE_TTL)?,
        };
        if scheduler.poll_interval.is_zero() {
            return Err("ALARMD_SCHEDULER_POLL_INTERVAL must be greater than zero".to_string());
        }

        let mail = MailConfig {
            smtp_host: lookup("ALARMD_SMTP_HOST").filter(|v| !v.trim().is_empty()),
            smtp_port: lookup("ALARMD_SMTP_PORT")
                .and_then(|v| v.parse::<u16>().ok())
                .unwrap_or(587),
            smtp_username: lookup("ALARMD_SMTP_USERNAME"),
            smtp_password: lookup("ALARMD_SMTP_PASSWORD"),
            smtp_noop: lookup("ALARMD_SMTP_NOOP")
                .map(|v| is_truthy(&v))
                .unwrap_or(false),
            sender: lookup("ALARMD_MAIL_SENDER")
                .unwrap_or_else(|| "no-reply@localhost".to_string()),
        };

        Ok(Self {
            port: lookup("ALARMD_PORT")
                .unwrap_or_else(|| "3000".to_string())
                .parse()
                .map_err(|e| format!("invalid port: {e}"))?,
            data_dir: lookup("ALARMD_DATA_DIR").unwrap_or_else(|| "./data".to_string()),
            duckdb_memory_limit: lookup("ALARMD_DUCKDB_MEMORY")
                .unwrap_or_else(|| "1GB".to_string()),
            node_id: lookup("ALARMD_NODE_ID")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            scheduler,
            mail,
        })
    }
}

fn parse_duration_var<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => {
            humantime::parse_duration(raw.trim()).map_err(|e| format!("invalid {key}: {e}"))
        }
        None => Ok(default),
    }
}

fn is_truthy(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.eq_ignore_ascii_case("1")
        || trimmed.eq_ignore_ascii_case("true")
        || trimmed.eq_ignore_ascii_case("yes")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config_from(&[]).expect("config");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.scheduler, SchedulerConfig::default());
        assert_eq!(cfg.scheduler.lease_ttl, Duration::from_secs(60));
        assert!(!cfg.mail.smtp_noop);
        assert!(!cfg.node_id.is_empty());
    }

    #[test]
    fn scheduler_values_are_parsed_with_humantime() {
        let cfg = config_from(&[
            ("ALARMD_SCHEDULER_POLL_INTERVAL", "1s"),
            ("ALARMD_SCHEDULER_JITTER_MAX", "100ms"),
            ("ALARMD_SCHEDULER_MODE", "SINGLE"),
            ("ALARMD_LEASE_TTL", "2m"),
            ("ALARMD_SCHEDULER_BATCH_SIZE", "5000"),
        ])
        .expect("config");
        assert_eq!(cfg.scheduler.poll_interval, Duration::from_secs(1));
        assert_eq!(cfg.scheduler.initial_jitter_max, Duration::from_millis(100));
        assert_eq!(cfg.scheduler.mode, SchedulerMode::Single);
        assert_eq!(cfg.scheduler.lease_ttl, Duration::from_secs(120));
        assert_eq!(cfg.scheduler.batch_size, 1000);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(config_from(&[("ALARMD_SCHEDULER_MODE", "both")]).is_err());
        assert!(config_from(&[("ALARMD_LEASE_TTL", "soon")]).is_err());
        assert!(config_from(&[("ALARMD_SCHEDULER_POLL_INTERVAL", "0s")]).is_err());
        assert!(config_from(&[("ALARMD_PORT", "http")]).is_err());
    }

    #[test]
    fn smtp_noop_accepts_truthy_values() {
        for raw in ["1", "true", "YES", " True "] {
            let cfg = config_from(&[("ALARMD_SMTP_NOOP", raw)]).expect("config");
            assert!(cfg.mail.smtp_noop, "{raw} should enable noop");
        }
        let cfg = config_from(&[("ALARMD_SMTP_NOOP", "off")]).expect("config");
        assert!(!cfg.mail.smtp_noop);
    }
}
