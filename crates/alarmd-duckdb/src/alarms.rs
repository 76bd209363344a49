use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use alarmd_core::event::AlarmEvent;
use alarmd_core::store::AlarmStore;

use crate::backend::{from_millis, to_millis};
use crate::DuckDbBackend;

fn map_alarm_row(row: &duckdb::Row<'_>) -> duckdb::Result<AlarmEvent> {
    Ok(AlarmEvent {
        event_uid: row.get(0)?,
        recipient: row.get(1)?,
        alarm_time: from_millis(row.get(2)?)?,
        event_start_time: from_millis(row.get(3)?)?,
        recurring: row.get(4)?,
        recurrence_id: row.get(5)?,
        ics: row.get(6)?,
    })
}

fn normalize_recipient(recipient: &str) -> String {
    recipient.trim().to_ascii_lowercase()
}

#[async_trait]
impl AlarmStore for DuckDbBackend {
    async fn find(&self, event_uid: &str, recipient: &str) -> Result<Option<AlarmEvent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT event_uid, recipient, alarm_time, event_start_time, recurring, recurrence_id, ics
             FROM alarm_events WHERE event_uid = ?1 AND recipient = ?2",
        )?;
        let mut rows = stmt.query_map(
            duckdb::params![event_uid, normalize_recipient(recipient)],
            map_alarm_row,
        )?;
        Ok(rows.next().transpose()?)
    }

    async fn create(&self, alarm: &AlarmEvent) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO alarm_events
                 (event_uid, recipient, alarm_time, event_start_time, recurring, recurrence_id, ics)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            duckdb::params![
                alarm.event_uid,
                normalize_recipient(&alarm.recipient),
                to_millis(alarm.alarm_time),
                to_millis(alarm.event_start_time),
                alarm.recurring,
                alarm.recurrence_id,
                alarm.ics,
            ],
        )?;
        Ok(())
    }

    async fn update(&self, alarm: &AlarmEvent) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO alarm_events
                   (event_uid, recipient, alarm_time, event_start_time, recurring, recurrence_id, ics)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
               ON CONFLICT (event_uid, recipient) DO UPDATE SET
                   alarm_time = EXCLUDED.alarm_time,
                   event_start_time = EXCLUDED.event_start_time,
                   recurring = EXCLUDED.recurring,
                   recurrence_id = EXCLUDED.recurrence_id,
                   ics = EXCLUDED.ics"#,
            duckdb::params![
                alarm.event_uid,
                normalize_recipient(&alarm.recipient),
                to_millis(alarm.alarm_time),
                to_millis(alarm.event_start_time),
                alarm.recurring,
                alarm.recurrence_id,
                alarm.ics,
            ],
        )?;
        Ok(())
    }

    async fn delete(&self, event_uid: &str, recipient: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM alarm_events WHERE event_uid = ?1 AND recipient = ?2",
            duckdb::params![event_uid, normalize_recipient(recipient)],
        )?;
        Ok(())
    }

    async fn find_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<AlarmEvent>> {
        let bounded_limit = i64::try_from(limit).unwrap_or(i64::MAX).clamp(1, 1000);
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"
            SELECT event_uid, recipient, alarm_time, event_start_time, recurring, recurrence_id, ics
            FROM alarm_events
            WHERE alarm_time <= ?1
              AND event_start_time > ?2
            ORDER BY alarm_time ASC
            LIMIT ?3
            "#,
        )?;
        let mut out = Vec::new();
        let now_millis = to_millis(now);
        for row in stmt.query_map(
            duckdb::params![now_millis, now_millis, bounded_limit],
            map_alarm_row,
        )? {
            out.push(row?);
        }
        Ok(out)
    }
}
