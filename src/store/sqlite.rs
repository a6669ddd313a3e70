//! SQLite-backed [`LicenseStore`] implementation.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::LicenseStore;
use crate::models::{LicenseRecord, LicenseStatus};

const SELECT_COLUMNS: &str = "SELECT license_key, owner, connected, expire, notion_token, status, \
     batch_id, is_admin, database_id, created_at, updated_at FROM licenses";

/// Wraps a [`SqlitePool`] over the `licenses` table created by
/// [`migrate_pool`](crate::migrate::migrate_pool).
pub struct SqliteLicenseStore {
    pool: SqlitePool,
}

impl SqliteLicenseStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_record(row: &SqliteRow) -> LicenseRecord {
    LicenseRecord {
        key: row.get("license_key"),
        owner: row.get::<Option<String>, _>("owner").unwrap_or_default(),
        connected: row.get::<i64, _>("connected") != 0,
        expiry: row.get("expire"),
        external_token: row.get("notion_token"),
        status: LicenseStatus::parse(&row.get::<String, _>("status")),
        batch_id: row.get("batch_id"),
        is_admin: row.get::<i64, _>("is_admin") != 0,
        database_id: row.get("database_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl LicenseStore for SqliteLicenseStore {
    async fn find_by_key(&self, key: &str) -> Result<Option<LicenseRecord>> {
        let row = sqlx::query(&format!("{} WHERE license_key = ?", SELECT_COLUMNS))
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_record))
    }

    async fn bind_token(&self, key: &str, token: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE licenses
            SET notion_token = ?, connected = 1, status = 'active', updated_at = ?
            WHERE license_key = ?
            "#,
        )
        .bind(token)
        .bind(Utc::now().timestamp())
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn bind_database(&self, key: &str, database_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE licenses
            SET database_id = ?, updated_at = ?
            WHERE license_key = ? AND database_id IS NOT ?
            "#,
        )
        .bind(database_id)
        .bind(Utc::now().timestamp())
        .bind(key)
        .bind(database_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create(&self, key: &str, owner: &str, expiry: Option<&str>) -> Result<bool> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO licenses (license_key, owner, expire, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(key)
        .bind(owner)
        .bind(expiry)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_batch_key(&self, key: &str, batch_id: &str) -> Result<bool> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO licenses (license_key, batch_id, status, created_at, updated_at)
            VALUES (?, ?, 'unused', ?, ?)
            "#,
        )
        .bind(key)
        .bind(batch_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_legacy(&self, record: &LicenseRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO licenses (license_key, owner, connected, expire, notion_token,
                                             status, batch_id, is_admin, database_id,
                                             created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.key)
        .bind(&record.owner)
        .bind(record.connected as i64)
        .bind(&record.expiry)
        .bind(&record.external_token)
        .bind(record.status.as_str())
        .bind(&record.batch_id)
        .bind(record.is_admin as i64)
        .bind(&record.database_id)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_admin(&self, key: &str, is_admin: bool) -> Result<bool> {
        let result =
            sqlx::query("UPDATE licenses SET is_admin = ?, updated_at = ? WHERE license_key = ?")
                .bind(is_admin as i64)
                .bind(Utc::now().timestamp())
                .bind(key)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn first_keys(&self, n: usize) -> Result<Vec<String>> {
        let keys = sqlx::query_scalar(
            "SELECT license_key FROM licenses ORDER BY created_at ASC, rowid ASC LIMIT ?",
        )
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    async fn count(&self) -> Result<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM licenses")
            .fetch_one(&self.pool)
            .await?;
        Ok(total as u64)
    }

    async fn count_by_status(&self, status: LicenseStatus) -> Result<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM licenses WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(total as u64)
    }

    async fn count_by_batch(&self, batch_id: &str) -> Result<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM licenses WHERE batch_id = ?")
            .bind(batch_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(total as u64)
    }
}
