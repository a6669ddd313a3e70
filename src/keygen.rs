//! Batch license-key issuance (`capos keygen`).
//!
//! Keys look like `CAP-XXXX-XXXX-XXXX`: twelve uppercase hex digits taken
//! from a v4 UUID. Each run belongs to a batch `<CHANNEL>-<YYYYMMDD>` and
//! leaves a plain-text export, one key per line, for the storefront.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::store::sqlite::SqliteLicenseStore;
use crate::store::LicenseStore;

/// Fresh draws allowed per slot before the slot is skipped.
pub const MAX_COLLISION_RETRIES: usize = 10;

pub fn generate_key() -> String {
    let uuid = Uuid::new_v4();
    let hex = hex::encode_upper(&uuid.as_bytes()[..6]);
    format!("CAP-{}-{}-{}", &hex[0..4], &hex[4..8], &hex[8..12])
}

pub fn batch_id(channel: &str, date: NaiveDate) -> String {
    format!("{}-{}", channel.trim().to_uppercase(), date.format("%Y%m%d"))
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub created: Vec<String>,
    /// Draws that hit an existing key.
    pub collisions: usize,
    /// Slots abandoned after [`MAX_COLLISION_RETRIES`].
    pub skipped: usize,
}

/// Insert `count` new unused keys under `batch`, drawing candidates from `draw`.
pub async fn issue_batch(
    store: &dyn LicenseStore,
    count: usize,
    batch: &str,
    mut draw: impl FnMut() -> String,
) -> Result<BatchOutcome> {
    let mut outcome = BatchOutcome::default();

    for _ in 0..count {
        let mut key = draw();
        let mut retries = 0;
        while store.find_by_key(&key).await?.is_some() && retries < MAX_COLLISION_RETRIES {
            outcome.collisions += 1;
            key = draw();
            retries += 1;
        }
        if retries >= MAX_COLLISION_RETRIES {
            tracing::warn!(batch, "collided {} times in a row, skipping slot", retries);
            outcome.skipped += 1;
            continue;
        }

        match store.create_batch_key(&key, batch).await {
            Ok(true) => outcome.created.push(key),
            Ok(false) => {
                outcome.collisions += 1;
                outcome.skipped += 1;
            }
            Err(e) => tracing::error!(key = %key, error = %e, "failed to insert key"),
        }
    }

    Ok(outcome)
}

/// Write `keys` one per line to `<dir>/keys_<batch>_<unix_millis>.txt`.
pub fn write_export(dir: &Path, batch: &str, keys: &[String]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create export directory: {}", dir.display()))?;
    let path = dir.join(format!(
        "keys_{}_{}.txt",
        batch,
        Utc::now().timestamp_millis()
    ));
    std::fs::write(&path, keys.join("\n"))
        .with_context(|| format!("Failed to write export file: {}", path.display()))?;
    Ok(path)
}

/// Run the keygen command: issue a batch, export it, and print a summary.
pub async fn run_keygen(config: &Config, count: usize, channel: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteLicenseStore::new(pool);
    let batch = batch_id(channel, Utc::now().date_naive());

    println!("Capture OS: Key Generator");
    println!("==========================");
    println!("  Batch:    {}", batch);
    println!("  Count:    {}", count);
    println!();

    let outcome = issue_batch(&store, count, &batch, generate_key).await?;
    let export = write_export(&config.keygen.exports_dir, &batch, &outcome.created)?;
    let total = store.count().await?;

    println!("  Created:  {} / {}", outcome.created.len(), count);
    if outcome.collisions > 0 {
        println!("  Collisions: {}", outcome.collisions);
    }
    if outcome.skipped > 0 {
        println!("  Skipped:  {}", outcome.skipped);
    }
    println!("  Export:   {}", export.display());
    println!("  Total keys in database: {}", total);

    store.pool().close().await;
    Ok(())
}
