use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::error::LeaseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub key: String,
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

/// Cluster-wide mutual exclusion on alarm keys.
#[async_trait]
pub trait LeaseProvider: Send + Sync + 'static {
    /// Take the lease for `ttl`. Fails with [`LeaseError::AlreadyHeld`] while
    /// another holder's lease on `key` is unexpired.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Lease, LeaseError>;

    /// Drop this holder's lease on `key`. Releasing an absent or foreign
    /// lease is a no-op.
    async fn release(&self, key: &str) -> Result<(), LeaseError>;

    /// Delete every expired lease, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize, LeaseError> {
        Ok(0)
    }
}

pub(crate) fn expiry(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, LeaseError> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| LeaseError::Backend(anyhow::anyhow!("invalid lease ttl: {e}")))?;
    Ok(now + ttl)
}

/// Always grants; used in single-node mode.
pub struct NoopLeaseProvider;

#[async_trait]
impl LeaseProvider for NoopLeaseProvider {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Lease, LeaseError> {
        Ok(Lease {
            key: key.to_string(),
            holder: "local".to_string(),
            expires_at: expiry(Utc::now(), ttl)?,
        })
    }

    async fn release(&self, _key: &str) -> Result<(), LeaseError> {
        Ok(())
    }
}

/// In-process lease table. Providers created with [`MemoryLeaseProvider::for_holder`]
/// share the table, which lets one process stand in for several cluster nodes.
#[derive(Clone)]
pub struct MemoryLeaseProvider {
    table: Arc<Mutex<HashMap<String, Lease>>>,
    clock: Arc<dyn Clock>,
    holder: String,
}

impl MemoryLeaseProvider {
    pub fn new(clock: Arc<dyn Clock>, holder: impl Into<String>) -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
            clock,
            holder: holder.into(),
        }
    }

    /// Another node's view of the same table.
    pub fn for_holder(&self, holder: impl Into<String>) -> Self {
        Self {
            table: Arc::clone(&self.table),
            clock: Arc::clone(&self.clock),
            holder: holder.into(),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub async fn current(&self, key: &str) -> Option<Lease> {
        let now = self.clock.now();
        self.table
            .lock()
            .await
            .get(key)
            .filter(|lease| lease.expires_at > now)
            .cloned()
    }
}

#[async_trait]
impl LeaseProvider for MemoryLeaseProvider {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Lease, LeaseError> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;
        // An expired lease is fair game, even for its previous holder.
        table.retain(|_, lease| lease.expires_at > now);
        if table.contains_key(key) {
            return Err(LeaseError::AlreadyHeld(key.to_string()));
        }
        let lease = Lease {
            key: key.to_string(),
            holder: self.holder.clone(),
            expires_at: expiry(now, ttl)?,
        };
        table.insert(key.to_string(), lease.clone());
        Ok(lease)
    }

    async fn release(&self, key: &str) -> Result<(), LeaseError> {
        let mut table = self.table.lock().await;
        if table.get(key).is_some_and(|lease| lease.holder == self.holder) {
            table.remove(key);
        }
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, LeaseError> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;
        let before = table.len();
        table.retain(|_, lease| lease.expires_at > now);
        Ok(before - table.len())
    }
}

#[cfg(test)]
impl MemoryLeaseProvider {
    pub(crate) async fn table_len(&self) -> usize {
        self.table.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::clock::ManualClock;

    fn setup() -> (ManualClock, MemoryLeaseProvider) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 2, 2, 8, 0, 0).unwrap());
        let provider = MemoryLeaseProvider::new(Arc::new(clock.clone()), "node-a");
        (clock, provider)
    }

    #[tokio::test]
    async fn second_acquire_is_rejected_as_already_held() {
        let (_clock, node_a) = setup();
        let node_b = node_a.for_holder("node-b");
        node_a
            .acquire("k", Duration::from_secs(60))
            .await
            .expect("first acquire");
        let err = node_b
            .acquire("k", Duration::from_secs(60))
            .await
            .expect_err("second acquire must fail");
        assert!(matches!(err, LeaseError::AlreadyHeld(ref key) if key == "k"));
        // Same holder is also rejected: a lease is not re-entrant.
        assert!(matches!(
            node_a.acquire("k", Duration::from_secs(60)).await,
            Err(LeaseError::AlreadyHeld(_))
        ));
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken_by_anyone() {
        let (clock, node_a) = setup();
        let node_b = node_a.for_holder("node-b");
        node_a
            .acquire("k", Duration::from_secs(60))
            .await
            .expect("acquire");
        clock.advance(chrono::Duration::seconds(61));
        let lease = node_b
            .acquire("k", Duration::from_secs(60))
            .await
            .expect("acquire after expiry");
        assert_eq!(lease.holder, "node-b");
    }

    #[tokio::test]
    async fn release_only_removes_own_lease_and_is_idempotent() {
        let (_clock, node_a) = setup();
        let node_b = node_a.for_holder("node-b");
        node_a
            .acquire("k", Duration::from_secs(60))
            .await
            .expect("acquire");

        node_b.release("k").await.expect("foreign release");
        assert!(node_a.current("k").await.is_some());

        node_a.release("k").await.expect("release");
        node_a.release("k").await.expect("second release");
        node_a.release("never-taken").await.expect("absent release");
        assert!(node_a.current("k").await.is_none());

        node_b
            .acquire("k", Duration::from_secs(60))
            .await
            .expect("acquire after release");
    }

    #[tokio::test]
    async fn expired_entries_do_not_accumulate() {
        let (clock, node_a) = setup();
        for key in ["a", "b", "c"] {
            node_a
                .acquire(key, Duration::from_secs(60))
                .await
                .expect("acquire");
        }
        assert_eq!(node_a.table_len().await, 3);

        clock.advance(chrono::Duration::seconds(61));
        node_a
            .acquire("d", Duration::from_secs(60))
            .await
            .expect("acquire");
        assert_eq!(node_a.table_len().await, 1);

        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(node_a.purge_expired().await.expect("purge"), 1);
        assert_eq!(node_a.table_len().await, 0);
    }

    #[tokio::test]
    async fn noop_provider_always_grants() {
        let provider = NoopLeaseProvider;
        provider.acquire("k", Duration::from_secs(1)).await.expect("first");
        provider.acquire("k", Duration::from_secs(1)).await.expect("second");
        provider.release("k").await.expect("release");
    }
}
