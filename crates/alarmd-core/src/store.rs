use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::event::AlarmEvent;

/// Persistence for pending alarms, keyed by (`event_uid`, `recipient`).
#[async_trait]
pub trait AlarmStore: Send + Sync + 'static {
    async fn find(&self, event_uid: &str, recipient: &str) -> anyhow::Result<Option<AlarmEvent>>;

    /// Insert a new row. Fails if one already exists for the same identity.
    async fn create(&self, alarm: &AlarmEvent) -> anyhow::Result<()>;

    /// Insert or replace the row for the alarm's identity.
    async fn update(&self, alarm: &AlarmEvent) -> anyhow::Result<()>;

    /// Remove the row; a missing row is not an error.
    async fn delete(&self, event_uid: &str, recipient: &str) -> anyhow::Result<()>;

    /// Rows with `alarm_time <= now` whose event has not started yet,
    /// earliest trigger first, at most `limit` of them.
    async fn find_due(&self, now: DateTime<Utc>, limit: usize) -> anyhow::Result<Vec<AlarmEvent>>;
}

fn identity(event_uid: &str, recipient: &str) -> (String, String) {
    (event_uid.to_string(), recipient.to_ascii_lowercase())
}

/// In-process store used by tests and single-binary embeddings.
#[derive(Default)]
pub struct MemoryAlarmStore {
    rows: RwLock<BTreeMap<(String, String), AlarmEvent>>,
}

impl MemoryAlarmStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl AlarmStore for MemoryAlarmStore {
    async fn find(&self, event_uid: &str, recipient: &str) -> anyhow::Result<Option<AlarmEvent>> {
        Ok(self
            .rows
            .read()
            .await
            .get(&identity(event_uid, recipient))
            .cloned())
    }

    async fn create(&self, alarm: &AlarmEvent) -> anyhow::Result<()> {
        let mut rows = self.rows.write().await;
        let key = identity(&alarm.event_uid, &alarm.recipient);
        if rows.contains_key(&key) {
            anyhow::bail!("alarm {alarm} already exists");
        }
        rows.insert(key, alarm.clone());
        Ok(())
    }

    async fn update(&self, alarm: &AlarmEvent) -> anyhow::Result<()> {
        self.rows
            .write()
            .await
            .insert(identity(&alarm.event_uid, &alarm.recipient), alarm.clone());
        Ok(())
    }

    async fn delete(&self, event_uid: &str, recipient: &str) -> anyhow::Result<()> {
        self.rows
            .write()
            .await
            .remove(&identity(event_uid, recipient));
        Ok(())
    }

    async fn find_due(&self, now: DateTime<Utc>, limit: usize) -> anyhow::Result<Vec<AlarmEvent>> {
        let rows = self.rows.read().await;
        let mut due: Vec<AlarmEvent> = rows
            .values()
            .filter(|alarm| alarm.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|alarm| alarm.alarm_time);
        due.truncate(limit);
        Ok(due)
    }
}
