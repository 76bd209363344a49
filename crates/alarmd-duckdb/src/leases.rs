use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use alarmd_core::clock::Clock;
use alarmd_core::error::LeaseError;
use alarmd_core::lease::{Lease, LeaseProvider};

use crate::backend::{from_millis, to_millis};
use crate::DuckDbBackend;

/// Lease table stored next to the alarm rows. Every scheduler that shares the
/// backend sees the same leases, which is what cluster mode relies on.
pub struct DuckDbLeaseProvider {
    backend: Arc<DuckDbBackend>,
    clock: Arc<dyn Clock>,
    holder: String,
}

impl DuckDbLeaseProvider {
    pub fn new(backend: Arc<DuckDbBackend>, clock: Arc<dyn Clock>, holder: impl Into<String>) -> Self {
        Self {
            backend,
            clock,
            holder: holder.into(),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// The unexpired lease on `key`, if any.
    pub async fn current(&self, key: &str) -> anyhow::Result<Option<Lease>> {
        let now = to_millis(self.clock.now());
        let conn = self.backend.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT lease_key, holder, expires_at FROM alarm_leases
             WHERE lease_key = ?1 AND expires_at > ?2",
        )?;
        let mut rows = stmt.query_map(duckdb::params![key, now], |row| {
            Ok(Lease {
                key: row.get(0)?,
                holder: row.get(1)?,
                expires_at: from_millis(row.get(2)?)?,
            })
        })?;
        Ok(rows.next().transpose()?)
    }
}

fn backend_error(err: duckdb::Error) -> LeaseError {
    LeaseError::Backend(err.into())
}

#[async_trait]
impl LeaseProvider for DuckDbLeaseProvider {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Lease, LeaseError> {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| LeaseError::Backend(anyhow::anyhow!("invalid lease ttl: {e}")))?;
        let expires_at = now + ttl;

        let mut conn = self.backend.conn.lock().await;
        let tx = conn.transaction().map_err(backend_error)?;
        // Expired rows never block, so clear them before checking for a holder.
        tx.execute(
            "DELETE FROM alarm_leases WHERE expires_at <= ?1",
            duckdb::params![to_millis(now)],
        )
        .map_err(backend_error)?;
        let held = {
            let mut stmt = tx
                .prepare("SELECT 1 FROM alarm_leases WHERE lease_key = ?1")
                .map_err(backend_error)?;
            let mut rows = stmt
                .query_map(duckdb::params![key], |row| row.get::<_, i32>(0))
                .map_err(backend_error)?;
            let found = rows.next().transpose().map_err(backend_error)?;
            found.is_some()
        };
        if held {
            return Err(LeaseError::AlreadyHeld(key.to_string()));
        }
        tx.execute(
            "INSERT INTO alarm_leases (lease_key, holder, expires_at) VALUES (?1, ?2, ?3)",
            duckdb::params![key, self.holder, to_millis(expires_at)],
        )
        .map_err(backend_error)?;
        tx.commit().map_err(backend_error)?;
        debug!(key, holder = %self.holder, "lease acquired");

        Ok(Lease {
            key: key.to_string(),
            holder: self.holder.clone(),
            expires_at,
        })
    }

    async fn release(&self, key: &str) -> Result<(), LeaseError> {
        let conn = self.backend.conn.lock().await;
        conn.execute(
            "DELETE FROM alarm_leases WHERE lease_key = ?1 AND holder = ?2",
            duckdb::params![key, self.holder],
        )
        .map_err(backend_error)?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, LeaseError> {
        let now = to_millis(self.clock.now());
        let conn = self.backend.conn.lock().await;
        conn.execute(
            "DELETE FROM alarm_leases WHERE expires_at <= ?1",
            duckdb::params![now],
        )
        .map_err(backend_error)
    }
}
