//! Operator commands: direct insertion, admin flags, and legacy import.
//!
//! Each `run_*` function opens the configured database, performs one
//! operation through [`LicenseStore`], and prints a short report. The
//! store-level helpers take `&dyn LicenseStore` so tests can use the
//! in-memory store.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Deserialize;
use std::path::Path;

use crate::config::Config;
use crate::db;
use crate::models::{parse_expiry, LicenseRecord, LicenseStatus};
use crate::store::sqlite::SqliteLicenseStore;
use crate::store::LicenseStore;

async fn open_store(config: &Config) -> Result<SqliteLicenseStore> {
    Ok(SqliteLicenseStore::new(db::connect(config).await?))
}

// ============ capos add ============

pub async fn run_add(config: &Config, key: &str, owner: &str, expires: Option<&str>) -> Result<()> {
    let key = key.trim();
    if key.is_empty() {
        bail!("license key must not be empty");
    }
    if let Some(expires) = expires {
        if parse_expiry(expires).is_none() {
            bail!("invalid --expires '{}': expected YYYY-MM-DD", expires);
        }
    }

    let store = open_store(config).await?;
    if store.create(key, owner, expires).await? {
        println!("Added {} (owner: {}, expires: {})", key, display_owner(owner), expires.unwrap_or("never"));
    } else {
        println!("{} already exists; nothing changed", key);
    }
    store.pool().close().await;
    Ok(())
}

fn display_owner(owner: &str) -> &str {
    if owner.is_empty() {
        "-"
    } else {
        owner
    }
}

// ============ capos admin ============

/// Set the admin flag on the `n` oldest keys. Returns the keys updated.
pub async fn grant_first(store: &dyn LicenseStore, n: usize) -> Result<Vec<String>> {
    let mut updated = Vec::new();
    for key in store.first_keys(n).await? {
        if store.set_admin(&key, true).await? {
            updated.push(key);
        }
    }
    Ok(updated)
}

pub async fn run_admin_set(config: &Config, key: &str, is_admin: bool) -> Result<()> {
    let store = open_store(config).await?;
    let found = store.set_admin(key, is_admin).await?;
    store.pool().close().await;
    if !found {
        bail!("license key not found: {}", key);
    }
    if is_admin {
        println!("{} is now an admin (no rate limits, no expiry)", key);
    } else {
        println!("{} is no longer an admin", key);
    }
    Ok(())
}

pub async fn run_admin_first(config: &Config, n: usize) -> Result<()> {
    let store = open_store(config).await?;
    let updated = grant_first(&store, n).await?;
    store.pool().close().await;

    for key in &updated {
        println!("  admin: {}", key);
    }
    println!("Granted admin to {} key(s)", updated.len());
    Ok(())
}

// ============ capos import ============

/// One entry of the legacy `users.json` map.
#[derive(Debug, Deserialize, Default)]
pub struct LegacyUser {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub connected: Option<bool>,
    #[serde(default)]
    pub expire: Option<String>,
    #[serde(default)]
    pub notion_token: Option<String>,
}

impl LegacyUser {
    /// Imported users are customers already, so the status is `active`.
    pub fn into_record(self, key: &str) -> LicenseRecord {
        let mut record = LicenseRecord::new(key);
        record.owner = self.owner.unwrap_or_default();
        record.connected = self.connected.unwrap_or(false);
        record.expiry = self.expire.filter(|e| !e.trim().is_empty());
        record.external_token = self.notion_token.filter(|t| !t.trim().is_empty());
        record.status = LicenseStatus::Active;
        record.updated_at = Utc::now().timestamp();
        record
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub failed: usize,
}

/// Insert or replace every entry of a legacy `key → user` JSON object.
/// Entries that fail to decode or store are logged and skipped.
pub async fn import_legacy(store: &dyn LicenseStore, json: &str) -> Result<ImportReport> {
    let entries: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(json).context("legacy file must be a JSON object of key → user")?;

    let mut report = ImportReport::default();
    for (key, value) in entries {
        let user: LegacyUser = match serde_json::from_value(value) {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(license = %key, error = %e, "skipping malformed legacy entry");
                report.failed += 1;
                continue;
            }
        };
        match store.upsert_legacy(&user.into_record(&key)).await {
            Ok(()) => report.imported += 1,
            Err(e) => {
                tracing::warn!(license = %key, error = %format!("{:#}", e), "failed to import entry");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read legacy file: {}", path.display()))?;
    let store = open_store(config).await?;
    let report = import_legacy(&store, &json).await?;
    let total = store.count().await?;
    store.pool().close().await;

    println!("Imported {} record(s) from {}", report.imported, path.display());
    if report.failed > 0 {
        println!("  {} record(s) failed; see log", report.failed);
    }
    println!("  Total keys in database: {}", total);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryLicenseStore;

    #[tokio::test]
    async fn import_replaces_and_activates() {
        let store = InMemoryLicenseStore::new();
        let mut existing = LicenseRecord::new("OLD-1");
        existing.owner = "stale".into();
        store.insert(existing);

        let json = r#"{
            "OLD-1": {"owner": "alice", "connected": true, "expire": "2030-01-01", "notion_token": "secret"},
            "OLD-2": {},
            "OLD-3": "not an object"
        }"#;
        let report = import_legacy(&store, json).await.unwrap();

        assert_eq!(report, ImportReport { imported: 2, failed: 1 });
        let one = store.find_by_key("OLD-1").await.unwrap().unwrap();
        assert_eq!(one.owner, "alice");
        assert!(one.connected);
        assert_eq!(one.external_token.as_deref(), Some("secret"));
        assert_eq!(one.status, LicenseStatus::Active);
        let two = store.find_by_key("OLD-2").await.unwrap().unwrap();
        assert_eq!(two.status, LicenseStatus::Active);
        assert!(two.expiry.is_none());
        assert!(store.find_by_key("OLD-3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn import_rejects_non_object() {
        let store = InMemoryLicenseStore::new();
        assert!(import_legacy(&store, "[1, 2]").await.is_err());
    }

    #[tokio::test]
    async fn grant_first_takes_oldest() {
        let store = InMemoryLicenseStore::new();
        for key in ["A", "B", "C"] {
            store.insert(LicenseRecord::new(key));
        }
        let updated = grant_first(&store, 2).await.unwrap();
        assert_eq!(updated, vec!["A".to_string(), "B".to_string()]);
        assert!(store.find_by_key("B").await.unwrap().unwrap().is_admin);
        assert!(!store.find_by_key("C").await.unwrap().unwrap().is_admin);
    }
}
