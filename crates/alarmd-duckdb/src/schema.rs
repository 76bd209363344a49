/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup.
///
/// `memory_limit` comes from `Config.duckdb_memory_limit`
/// (env `ALARMD_DUCKDB_MEMORY`, default `"1GB"`). Always set an explicit
/// limit: the DuckDB default of 80% of system RAM is not acceptable for a
/// long-running server process.
///
/// Instants are stored as BIGINT milliseconds since the Unix epoch so the
/// due-alarm range query compares plain integers.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- ALARM EVENTS
-- ===========================================
-- One pending alarm per (event_uid, recipient). Written by the calendar
-- backend when an event with an EMAIL VALARM is saved; consumed by the
-- scheduler, which deletes the row after delivery or replaces it with the
-- next occurrence of a recurring event.
CREATE TABLE IF NOT EXISTS alarm_events (
    event_uid         VARCHAR NOT NULL,
    recipient         VARCHAR NOT NULL,              -- lower-cased address
    alarm_time        BIGINT NOT NULL,               -- epoch millis
    event_start_time  BIGINT NOT NULL,               -- epoch millis
    recurring         BOOLEAN NOT NULL DEFAULT false,
    recurrence_id     VARCHAR,                       -- NULL for non-recurring events
    ics               VARCHAR NOT NULL,
    PRIMARY KEY (event_uid, recipient)
);
CREATE INDEX IF NOT EXISTS idx_alarm_events_alarm_time ON alarm_events(alarm_time);
CREATE INDEX IF NOT EXISTS idx_alarm_events_start_time ON alarm_events(event_start_time);

-- ===========================================
-- ALARM LEASES
-- ===========================================
-- Short-lived mutual exclusion records. A row whose expires_at has passed is
-- treated as absent and may be taken over by any holder.
CREATE TABLE IF NOT EXISTS alarm_leases (
    lease_key   VARCHAR PRIMARY KEY,
    holder      VARCHAR NOT NULL,
    expires_at  BIGINT NOT NULL                      -- epoch millis
);

-- ===========================================
-- DOMAINS / USER SETTINGS
-- ===========================================
-- Read-only from the scheduler's point of view. Keys stored in user_settings:
--   'core.language'        – e.g. 'en', 'fr'
--   'core.datetime'        – IANA timezone, e.g. 'Europe/Paris'
--   'calendar.alarmEmails' – 'true' / 'false'
CREATE TABLE IF NOT EXISTS domains (
    name        VARCHAR PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS user_settings (
    username    VARCHAR NOT NULL,                    -- lower-cased address
    key         VARCHAR NOT NULL,
    value       VARCHAR NOT NULL,
    PRIMARY KEY (username, key)
);
"#
    )
}

/// Migrations tracking table SQL.
///
/// Run before [`init_sql`]. Tracks which numbered migrations have been
/// applied so restarts don't re-run them.
pub const MIGRATIONS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS _migrations (
    id          VARCHAR PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;

/// Identifier recorded in `_migrations` once [`init_sql`] has run.
pub const INITIAL_MIGRATION_ID: &str = "0001_alarm_tables";
