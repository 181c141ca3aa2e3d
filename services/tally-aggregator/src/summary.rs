//! Summary counters from the registration store
//!
//! Total voters and total candidates are owned by an external store and are
//! passed through to display unmodified. They are read once and cached; a
//! failed read leaves the cache empty so the next cycle tries again, and the
//! cycle that failed publishes a degraded snapshot.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::info;
use types::tally::SummaryCounters;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SummaryStoreError {
    #[error("failed to read summary counters from {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("invalid summary counters: {0}")]
    Parse(String),

    #[error("summary store unavailable: {0}")]
    Unavailable(String),
}

/// Read-only source of the summary counters.
#[async_trait]
pub trait SummaryStore: Send + Sync {
    async fn fetch(&self) -> Result<SummaryCounters, SummaryStoreError>;
}

/// Fixed counters.
#[derive(Debug, Clone, Copy)]
pub struct StaticSummary(pub SummaryCounters);

#[async_trait]
impl SummaryStore for StaticSummary {
    async fn fetch(&self) -> Result<SummaryCounters, SummaryStoreError> {
        Ok(self.0)
    }
}

/// Stands in when no store is configured; every read fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSummary;

#[async_trait]
impl SummaryStore for NoSummary {
    async fn fetch(&self) -> Result<SummaryCounters, SummaryStoreError> {
        Err(SummaryStoreError::Unavailable("no summary store configured".to_string()))
    }
}

/// Counters exported to a JSON file: `{"total_voters": n, "total_candidates": m}`.
#[derive(Debug, Clone)]
pub struct JsonFileSummary {
    path: PathBuf,
}

impl JsonFileSummary {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SummaryStore for JsonFileSummary {
    async fn fetch(&self) -> Result<SummaryCounters, SummaryStoreError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|err| SummaryStoreError::Io {
            path: self.path.display().to_string(),
            reason: err.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|err| SummaryStoreError::Parse(err.to_string()))
    }
}

/// Read-once cache over a [`SummaryStore`].
#[derive(Debug, Default)]
pub struct SummaryCache {
    cell: OnceCell<SummaryCounters>,
}

impl SummaryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_fetch(&self, store: &dyn SummaryStore) -> Result<SummaryCounters, SummaryStoreError> {
        self.cell
            .get_or_try_init(|| async {
                let counters = store.fetch().await?;
                info!(
                    total_voters = counters.total_voters,
                    total_candidates = counters.total_candidates,
                    "Summary counters loaded"
                );
                Ok::<_, SummaryStoreError>(counters)
            })
            .await
            .copied()
    }
}
