use anyhow::Result;
use async_trait::async_trait;

use alarmd_core::error::SettingsError;
use alarmd_core::settings::{ResolvedSettings, SettingsResolver};

use crate::DuckDbBackend;

fn domain_of(address: &str) -> Option<&str> {
    address
        .trim()
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .filter(|domain| !domain.is_empty())
}

impl DuckDbBackend {
    /// Register a tenant domain. Safe to call repeatedly.
    pub async fn register_domain(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO domains (name) VALUES (?1)",
            duckdb::params![name.trim().to_ascii_lowercase()],
        )?;
        Ok(())
    }

    pub async fn set_user_setting(&self, username: &str, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO user_settings (username, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (username, key) DO UPDATE SET value = EXCLUDED.value",
            duckdb::params![username.trim().to_ascii_lowercase(), key, value],
        )?;
        Ok(())
    }
}

#[async_trait]
impl SettingsResolver for DuckDbBackend {
    async fn resolve(&self, recipient: &str) -> Result<Option<ResolvedSettings>, SettingsError> {
        let username = recipient.trim().to_ascii_lowercase();
        let domain = domain_of(&username)
            .ok_or_else(|| SettingsError::DomainNotFound(username.clone()))?
            .to_string();

        let conn = self.conn.lock().await;
        let known: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM domains WHERE name = ?1",
                duckdb::params![domain],
                |row| row.get(0),
            )
            .map_err(|e| SettingsError::Backend(e.into()))?;
        if known == 0 {
            return Err(SettingsError::DomainNotFound(domain));
        }

        let mut stmt = conn
            .prepare("SELECT key, value FROM user_settings WHERE username = ?1")
            .map_err(|e| SettingsError::Backend(e.into()))?;
        let mut pairs: Vec<(String, String)> = Vec::new();
        for row in stmt
            .query_map(duckdb::params![username], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| SettingsError::Backend(e.into()))?
        {
            pairs.push(row.map_err(|e| SettingsError::Backend(e.into()))?);
        }

        if pairs.is_empty() {
            return Ok(None);
        }
        Ok(Some(ResolvedSettings::from_pairs(
            pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        )))
    }
}
