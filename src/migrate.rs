use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

/// Columns added after the first release, with their DDL.
const ADDED_COLUMNS: &[(&str, &str)] = &[
    ("status", "ALTER TABLE licenses ADD COLUMN status TEXT NOT NULL DEFAULT 'unused'"),
    ("batch_id", "ALTER TABLE licenses ADD COLUMN batch_id TEXT"),
    ("is_admin", "ALTER TABLE licenses ADD COLUMN is_admin INTEGER NOT NULL DEFAULT 0"),
    ("database_id", "ALTER TABLE licenses ADD COLUMN database_id TEXT"),
];

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create or upgrade the schema on an open pool. Idempotent.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS licenses (
            license_key TEXT PRIMARY KEY,
            owner TEXT NOT NULL DEFAULT '',
            connected INTEGER NOT NULL DEFAULT 0,
            expire TEXT,
            notion_token TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Older databases predate these columns
    let existing: Vec<String> = sqlx::query("PRAGMA table_info(licenses)")
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect();

    for (column, ddl) in ADDED_COLUMNS {
        if !existing.iter().any(|c| c == column) {
            sqlx::query(ddl).execute(pool).await?;
            tracing::info!(column, "added column to licenses");
        }
    }

    for ddl in [
        "CREATE INDEX IF NOT EXISTS idx_licenses_connected ON licenses(connected)",
        "CREATE INDEX IF NOT EXISTS idx_licenses_expire ON licenses(expire)",
        "CREATE INDEX IF NOT EXISTS idx_licenses_status ON licenses(status)",
        "CREATE INDEX IF NOT EXISTS idx_licenses_batch ON licenses(batch_id)",
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(())
}
