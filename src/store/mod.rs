//! Entitlement storage for license keys.
//!
//! The [`LicenseStore`] trait is the keyed record store behind every
//! license check. [`sqlite::SqliteLicenseStore`] is used by the server and
//! CLI; [`memory::InMemoryLicenseStore`] backs unit and integration tests.
//!
//! Each mutation touches exactly one record and is atomic on its own.
//! Nothing here spans calls, so two capture jobs for the same key may
//! race on [`bind_database`](LicenseStore::bind_database); the last write wins.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{LicenseRecord, LicenseStatus};

/// Keyed record store for license keys and their binding state.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`find_by_key`](LicenseStore::find_by_key) | Look up a record |
/// | [`bind_token`](LicenseStore::bind_token) | Store the partner token and activate |
/// | [`bind_database`](LicenseStore::bind_database) | Cache the target database id |
/// | [`create`](LicenseStore::create) | Direct insertion |
/// | [`create_batch_key`](LicenseStore::create_batch_key) | Insertion by key generation |
/// | [`upsert_legacy`](LicenseStore::upsert_legacy) | Insert-or-replace for imports |
/// | [`set_admin`](LicenseStore::set_admin) | Toggle the admin flag |
#[async_trait]
pub trait LicenseStore: Send + Sync {
    async fn find_by_key(&self, key: &str) -> Result<Option<LicenseRecord>>;

    /// Write the token, set `connected` and move the status to `active`.
    ///
    /// Returns `false` if no record has this key.
    async fn bind_token(&self, key: &str, token: &str) -> Result<bool>;

    /// Write the cached database id.
    ///
    /// Returns `true` only when the stored value changed; rewriting the same
    /// id is a no-op.
    async fn bind_database(&self, key: &str, database_id: &str) -> Result<bool>;

    /// Insert a key with an owner and optional expiry. Returns `false` if the
    /// key already exists.
    async fn create(&self, key: &str, owner: &str, expiry: Option<&str>) -> Result<bool>;

    /// Insert an `unused` key tagged with its generation batch.
    async fn create_batch_key(&self, key: &str, batch_id: &str) -> Result<bool>;

    /// Insert or fully replace a record.
    async fn upsert_legacy(&self, record: &LicenseRecord) -> Result<()>;

    async fn set_admin(&self, key: &str, is_admin: bool) -> Result<bool>;

    /// The oldest `n` keys by creation time.
    async fn first_keys(&self, n: usize) -> Result<Vec<String>>;

    async fn count(&self) -> Result<u64>;

    async fn count_by_status(&self, status: LicenseStatus) -> Result<u64>;

    async fn count_by_batch(&self, batch_id: &str) -> Result<u64>;
}

/// True when the record carries an expiry that lies before `now`.
pub fn is_expired_at(record: &LicenseRecord, now: DateTime<Utc>) -> bool {
    match record.expires_at() {
        Some(expiry) => expiry < now,
        None => false,
    }
}

pub fn is_expired(record: &LicenseRecord) -> bool {
    is_expired_at(record, Utc::now())
}

pub fn is_admin(record: &LicenseRecord) -> bool {
    record.is_admin
}

/// Expired and not exempt. Admins never expire.
pub fn is_expired_for_access(record: &LicenseRecord) -> bool {
    !is_admin(record) && is_expired(record)
}
