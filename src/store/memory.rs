//! In-memory [`LicenseStore`] implementation for tests.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Insertion order stands in
//! for `created_at` ordering.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use super::LicenseStore;
use crate::models::{LicenseRecord, LicenseStatus};

#[derive(Default)]
struct Inner {
    records: HashMap<String, LicenseRecord>,
    order: Vec<String>,
}

/// In-memory license store.
#[derive(Default)]
pub struct InMemoryLicenseStore {
    inner: RwLock<Inner>,
}

impl InMemoryLicenseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a complete record, replacing any record with the same key.
    pub fn insert(&self, record: LicenseRecord) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if !inner.records.contains_key(&record.key) {
            inner.order.push(record.key.clone());
        }
        inner.records.insert(record.key.clone(), record);
    }

    fn update<F>(&self, key: &str, f: F) -> bool
    where
        F: FnOnce(&mut LicenseRecord) -> bool,
    {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match inner.records.get_mut(key) {
            Some(record) => {
                let changed = f(record);
                if changed {
                    record.updated_at = Utc::now().timestamp();
                }
                changed
            }
            None => false,
        }
    }
}

#[async_trait]
impl LicenseStore for InMemoryLicenseStore {
    async fn find_by_key(&self, key: &str) -> Result<Option<LicenseRecord>> {
        Ok(self.inner.read().unwrap_or_else(|e| e.into_inner()).records.get(key).cloned())
    }

    async fn bind_token(&self, key: &str, token: &str) -> Result<bool> {
        Ok(self.update(key, |r| {
            r.external_token = Some(token.to_string());
            r.connected = true;
            r.status = LicenseStatus::Active;
            true
        }))
    }

    async fn bind_database(&self, key: &str, database_id: &str) -> Result<bool> {
        Ok(self.update(key, |r| {
            if r.database_id.as_deref() == Some(database_id) {
                return false;
            }
            r.database_id = Some(database_id.to_string());
            true
        }))
    }

    async fn create(&self, key: &str, owner: &str, expiry: Option<&str>) -> Result<bool> {
        if self.inner.read().unwrap_or_else(|e| e.into_inner()).records.contains_key(key) {
            return Ok(false);
        }
        let mut record = LicenseRecord::new(key);
        record.owner = owner.to_string();
        record.expiry = expiry.map(str::to_string);
        self.insert(record);
        Ok(true)
    }

    async fn create_batch_key(&self, key: &str, batch_id: &str) -> Result<bool> {
        if self.inner.read().unwrap_or_else(|e| e.into_inner()).records.contains_key(key) {
            return Ok(false);
        }
        let mut record = LicenseRecord::new(key);
        record.batch_id = Some(batch_id.to_string());
        self.insert(record);
        Ok(true)
    }

    async fn upsert_legacy(&self, record: &LicenseRecord) -> Result<()> {
        self.insert(record.clone());
        Ok(())
    }

    async fn set_admin(&self, key: &str, is_admin: bool) -> Result<bool> {
        Ok(self.update(key, |r| {
            r.is_admin = is_admin;
            true
        }))
    }

    async fn first_keys(&self, n: usize) -> Result<Vec<String>> {
        Ok(self.inner.read().unwrap_or_else(|e| e.into_inner()).order.iter().take(n).cloned().collect())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.inner.read().unwrap_or_else(|e| e.into_inner()).records.len() as u64)
    }

    async fn count_by_status(&self, status: LicenseStatus) -> Result<u64> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner.records.values().filter(|r| r.status == status).count() as u64)
    }

    async fn count_by_batch(&self, batch_id: &str) -> Result<u64> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .records
            .values()
            .filter(|r| r.batch_id.as_deref() == Some(batch_id))
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_token_activates() {
        let store = InMemoryLicenseStore::new();
        store.create_batch_key("CAP-1", "TB-20260101").await.unwrap();

        let before = store.find_by_key("CAP-1").await.unwrap().unwrap();
        assert_eq!(before.status, LicenseStatus::Unused);
        assert!(!before.connected);

        assert!(store.bind_token("CAP-1", "secret").await.unwrap());
        let after = store.find_by_key("CAP-1").await.unwrap().unwrap();
        assert_eq!(after.status, LicenseStatus::Active);
        assert!(after.connected);
        assert_eq!(after.external_token.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn bind_database_same_id_is_noop() {
        let store = InMemoryLicenseStore::new();
        store.create("CAP-1", "", None).await.unwrap();
        assert!(store.bind_database("CAP-1", "db-a").await.unwrap());
        assert!(!store.bind_database("CAP-1", "db-a").await.unwrap());
        assert!(store.bind_database("CAP-1", "db-b").await.unwrap());
        let r = store.find_by_key("CAP-1").await.unwrap().unwrap();
        assert_eq!(r.database_id.as_deref(), Some("db-b"));
    }

    #[tokio::test]
    async fn missing_key_updates_nothing() {
        let store = InMemoryLicenseStore::new();
        assert!(!store.bind_token("nope", "t").await.unwrap());
        assert!(!store.bind_database("nope", "d").await.unwrap());
        assert!(!store.set_admin("nope", true).await.unwrap());
    }

    #[tokio::test]
    async fn first_keys_follow_insertion_order() {
        let store = InMemoryLicenseStore::new();
        for k in ["A", "B", "C"] {
            store.create(k, "", None).await.unwrap();
        }
        assert!(!store.create("A", "again", None).await.unwrap());
        assert_eq!(store.first_keys(2).await.unwrap(), vec!["A", "B"]);
    }
}
