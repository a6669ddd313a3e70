//! Target-database resolution for a license key.
//!
//! A freshly authorized token usually cannot see its databases straight
//! away: the partner's search index lags token issuance. Discovery is a
//! single state machine shared by the OAuth callback and the browser poll
//! endpoint:
//!
//! ```text
//!   Retrying{1} ─empty─▶ Retrying{2} ─ … ─▶ Retrying{N} ─empty─▶ Pending
//!        │                    │                  │                 │
//!        └──────────hit───────┴────────hit───────┴──────hit(poll)──┴─▶ Resolved
//! ```
//!
//! The callback drives `Retrying` synchronously ([`DatabaseResolver::discover_after_authorization`]).
//! Each browser poll is one `Pending` step ([`DatabaseResolver::poll`]). The
//! resolver keeps no poll counter; the browser owns the attempt ceiling.
//! `Resolved` is backed by the `database_id` cached on the license record,
//! which short-circuits all later discovery.
//!
//! Captures use [`DatabaseResolver::resolve_target`]: explicit id on the
//! request, then the cached id, then one discovery search.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DiscoveryConfig;
use crate::models::LicenseRecord;
use crate::notion::{DatabaseSummary, WorkspaceApi};
use crate::store::LicenseStore;

/// A database chosen for a license. `title` is only known when discovery
/// produced the id in this call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDatabase {
    pub id: String,
    pub title: Option<String>,
}

impl From<DatabaseSummary> for ResolvedDatabase {
    fn from(db: DatabaseSummary) -> Self {
        Self {
            id: db.id,
            title: Some(db.title),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryState {
    Retrying { attempt: u32 },
    Pending,
    Resolved(ResolvedDatabase),
}

/// Where a capture's target database id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSource {
    Explicit,
    Cached,
    Discovered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub database_id: String,
    pub source: TargetSource,
}

pub struct DatabaseResolver {
    store: Arc<dyn LicenseStore>,
    workspace: Arc<dyn WorkspaceApi>,
    config: DiscoveryConfig,
}

impl DatabaseResolver {
    pub fn new(
        store: Arc<dyn LicenseStore>,
        workspace: Arc<dyn WorkspaceApi>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            store,
            workspace,
            config,
        }
    }

    /// One discovery search. Failures read as "nothing visible yet".
    async fn search_once(&self, key: &str, token: &str) -> Option<DatabaseSummary> {
        match self
            .workspace
            .search_databases(token, self.config.page_size)
            .await
        {
            Ok(found) => found.into_iter().next(),
            Err(e) => {
                tracing::warn!(license = key, error = %e, "database discovery search failed");
                None
            }
        }
    }

    /// Search once and cache a hit on the license record.
    async fn discover_step(&self, key: &str, token: &str) -> Result<Option<ResolvedDatabase>> {
        let Some(db) = self.search_once(key, token).await else {
            return Ok(None);
        };
        self.store.bind_database(key, &db.id).await?;
        tracing::info!(license = key, database_id = %db.id, title = %db.title, "database discovered");
        Ok(Some(db.into()))
    }

    /// Run the synchronous post-authorization phase: up to `attempts`
    /// searches spaced `delay_ms` apart. Ends in `Resolved` or `Pending`.
    pub async fn discover_after_authorization(
        &self,
        key: &str,
        token: &str,
    ) -> Result<DiscoveryState> {
        let delay = Duration::from_millis(self.config.delay_ms);
        let mut state = DiscoveryState::Retrying { attempt: 1 };

        loop {
            state = match state {
                DiscoveryState::Retrying { attempt } => {
                    tracing::debug!(license = key, attempt, max = self.config.attempts, "discovery attempt");
                    if let Some(db) = self.discover_step(key, token).await? {
                        DiscoveryState::Resolved(db)
                    } else if attempt >= self.config.attempts {
                        tracing::info!(
                            license = key,
                            attempts = attempt,
                            "no database visible yet, handing over to client polling"
                        );
                        DiscoveryState::Pending
                    } else {
                        tokio::time::sleep(delay).await;
                        DiscoveryState::Retrying {
                            attempt: attempt + 1,
                        }
                    }
                }
                settled => return Ok(settled),
            };
        }
    }

    /// One `Pending` step. A cached id resolves immediately without searching.
    pub async fn poll(&self, record: &LicenseRecord) -> Result<DiscoveryState> {
        if let Some(id) = &record.database_id {
            return Ok(DiscoveryState::Resolved(ResolvedDatabase {
                id: id.clone(),
                title: None,
            }));
        }
        let Some(token) = record.external_token.as_deref() else {
            return Ok(DiscoveryState::Pending);
        };
        Ok(match self.discover_step(&record.key, token).await? {
            Some(db) => DiscoveryState::Resolved(db),
            None => DiscoveryState::Pending,
        })
    }

    /// Pick the database a capture writes into.
    ///
    /// Returns `None` when nothing is explicit, nothing is cached, and
    /// discovery finds nothing.
    pub async fn resolve_target(
        &self,
        explicit: Option<&str>,
        record: &LicenseRecord,
    ) -> Result<Option<Target>> {
        if let Some(id) = explicit {
            return Ok(Some(Target {
                database_id: id.to_string(),
                source: TargetSource::Explicit,
            }));
        }
        if let Some(id) = &record.database_id {
            return Ok(Some(Target {
                database_id: id.clone(),
                source: TargetSource::Cached,
            }));
        }
        let Some(token) = record.external_token.as_deref() else {
            return Ok(None);
        };
        Ok(self
            .discover_step(&record.key, token)
            .await?
            .map(|db| Target {
                database_id: db.id,
                source: TargetSource::Discovered,
            }))
    }

    /// Manual override: jump straight to `Resolved` with the given id.
    pub async fn override_database(&self, key: &str, database_id: &str) -> Result<bool> {
        let changed = self.store.bind_database(key, database_id).await?;
        tracing::info!(license = key, database_id, changed, "database id set manually");
        Ok(changed)
    }
}
