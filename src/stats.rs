//! License database overview for `capos stats`.
//!
//! Totals, the unused/active split, binding progress, and a per-batch
//! breakdown so a sales channel's activation rate is visible at a glance.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::models::LicenseStatus;
use crate::store::sqlite::SqliteLicenseStore;
use crate::store::LicenseStore;

/// Per-batch breakdown row.
#[derive(Debug, PartialEq, Eq)]
pub struct BatchStats {
    pub batch_id: String,
    pub total: i64,
    pub active: i64,
}

pub async fn batch_breakdown(pool: &SqlitePool) -> Result<Vec<BatchStats>> {
    let rows = sqlx::query(
        r#"
        SELECT
            COALESCE(batch_id, '(none)') AS batch,
            COUNT(*) AS total,
            SUM(CASE WHEN status = 'active' THEN 1 ELSE 0 END) AS active
        FROM licenses
        GROUP BY batch
        ORDER BY total DESC, batch ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| BatchStats {
            batch_id: row.get("batch"),
            total: row.get("total"),
            active: row.get("active"),
        })
        .collect())
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteLicenseStore::new(pool.clone());

    let total = store.count().await?;
    let unused = store.count_by_status(LicenseStatus::Unused).await?;
    let active = store.count_by_status(LicenseStatus::Active).await?;

    let with_database: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM licenses WHERE database_id IS NOT NULL")
            .fetch_one(&pool)
            .await?;
    let admins: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM licenses WHERE is_admin = 1")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Capture OS: License Stats");
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Keys:        {}", total);
    println!("  Unused:      {}", unused);
    println!("  Active:      {}", active);
    println!("  DB bound:    {}", with_database);
    println!("  Admins:      {}", admins);

    let batches = batch_breakdown(&pool).await?;
    if !batches.is_empty() {
        println!();
        println!("  By batch:");
        println!("  {:<24} {:>6} {:>8} {:>6}", "BATCH", "KEYS", "ACTIVE", "RATE");
        println!("  {}", "-".repeat(48));
        for b in &batches {
            let rate = if b.total > 0 { b.active * 100 / b.total } else { 0 };
            println!(
                "  {:<24} {:>6} {:>8} {:>5}%",
                b.batch_id, b.total, b.active, rate
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
