//! Refresh coordination for the tally aggregator
//!
//! Drives one ingestion-and-snapshot cycle per trigger. Timer ticks and
//! explicit requests share a single entry point, `trigger_refresh`, which
//! enforces the Idle/Running state machine:
//!
//! - Idle → Running on any trigger
//! - Running → Idle when the cycle completes or fails
//! - a trigger that arrives while Running is coalesced (dropped, not queued)
//!
//! A cycle polls both topics concurrently, applies every decodable record
//! to the store, and only then builds, merges and publishes a snapshot.
//! Each cycle runs on its own task, so a caller that stops waiting cannot
//! cancel a cycle halfway through.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use types::ids::{CandidateId, RegionKey};
use types::tally::{CandidateAggregate, LocationAggregate};

use crate::decoder::{DecodedEvent, EventDecoder};
use crate::geo::{GeometryCache, GeometryProvider, ReferenceDataError, ReferenceGeometry};
use crate::metrics::ServiceMetrics;
use crate::snapshot::{Snapshot, SnapshotBuilder};
use crate::source::{EventSource, Topic};
use crate::store::AggregationStore;
use crate::summary::{SummaryCache, SummaryStore};

/// What asked for a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Timer,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Idle,
    Running,
}

/// Read-only view of the coordinator for display collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub state: CoordinatorState,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub last_snapshot_version: Option<u64>,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub triggers_coalesced: u64,
    pub last_error: Option<String>,
}

impl Default for CoordinatorStatus {
    fn default() -> Self {
        Self {
            state: CoordinatorState::Idle,
            last_completed_at: None,
            last_snapshot_version: None,
            cycles_completed: 0,
            cycles_failed: 0,
            triggers_coalesced: 0,
            last_error: None,
        }
    }
}

/// Result of a trigger.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// A new snapshot was built and published.
    Published(Arc<Snapshot>),
    /// Nothing arrived; the previous snapshot stays current.
    Unchanged(Arc<Snapshot>),
    /// A cycle was already running; this trigger was dropped. Carries the
    /// latest published snapshot, if any.
    Coalesced(Option<Arc<Snapshot>>),
}

impl RefreshOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RefreshOutcome::Published(_) => "published",
            RefreshOutcome::Unchanged(_) => "unchanged",
            RefreshOutcome::Coalesced(_) => "coalesced",
        }
    }

    pub fn snapshot(&self) -> Option<&Arc<Snapshot>> {
        match self {
            RefreshOutcome::Published(snapshot) | RefreshOutcome::Unchanged(snapshot) => Some(snapshot),
            RefreshOutcome::Coalesced(latest) => latest.as_ref(),
        }
    }
}

/// Errors that abort a cycle. The previously published snapshot stays
/// current and the next trigger retries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("reference geometry unavailable: {0}")]
    ReferenceData(#[from] ReferenceDataError),

    #[error("refresh cycle aborted: {0}")]
    CycleAborted(String),
}

/// Configuration for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Bound on each topic poll.
    pub poll_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(1000),
        }
    }
}

/// Per-topic ingestion tally for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct BatchReport {
    polled: u64,
    applied: u64,
    changed: u64,
    discarded: u64,
}

/// Owns the refresh state machine and the pipeline it drives.
pub struct RefreshCoordinator {
    source: Arc<dyn EventSource>,
    geometry_provider: Arc<dyn GeometryProvider>,
    summary_store: Arc<dyn SummaryStore>,
    config: CoordinatorConfig,
    decoder: EventDecoder,
    store: Arc<AggregationStore>,
    builder: Mutex<SnapshotBuilder>,
    geometry: GeometryCache,
    summary: SummaryCache,
    metrics: Arc<ServiceMetrics>,
    running: AtomicBool,
    status: RwLock<CoordinatorStatus>,
    published: watch::Sender<Option<Arc<Snapshot>>>,
}

impl RefreshCoordinator {
    /// Create an Idle coordinator with an empty store and no snapshot.
    pub fn new(
        source: Arc<dyn EventSource>,
        geometry_provider: Arc<dyn GeometryProvider>,
        summary_store: Arc<dyn SummaryStore>,
        config: CoordinatorConfig,
    ) -> Self {
        info!(
            poll_timeout_ms = config.poll_timeout.as_millis() as u64,
            "RefreshCoordinator initialized"
        );

        let (published, _) = watch::channel(None);
        Self {
            source,
            geometry_provider,
            summary_store,
            config,
            decoder: EventDecoder::new(),
            store: Arc::new(AggregationStore::new()),
            builder: Mutex::new(SnapshotBuilder::new()),
            geometry: GeometryCache::new(),
            summary: SummaryCache::new(),
            metrics: Arc::new(ServiceMetrics::new()),
            running: AtomicBool::new(false),
            status: RwLock::new(CoordinatorStatus::default()),
            published,
        }
    }

    /// Share an externally owned metrics registry.
    pub fn with_metrics(mut self, metrics: Arc<ServiceMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Run one refresh cycle unless one is already running.
    pub async fn trigger_refresh(self: &Arc<Self>, trigger: Trigger) -> Result<RefreshOutcome, RefreshError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.metrics.record_coalesced_trigger();
            write(&self.status).triggers_coalesced += 1;
            debug!(?trigger, "Refresh already running; trigger coalesced");
            return Ok(RefreshOutcome::Coalesced(self.latest()));
        }
        write(&self.status).state = CoordinatorState::Running;

        let coordinator = Arc::clone(self);
        let cycle = tokio::spawn(async move {
            let _idle = IdleOnDrop(Arc::clone(&coordinator));
            coordinator.run_cycle(trigger).await
        });

        match cycle.await {
            Ok(result) => result,
            Err(join_err) => {
                let err = RefreshError::CycleAborted(join_err.to_string());
                error!(error = %err, "Refresh cycle task failed");
                self.record_failure(&err);
                Err(err)
            }
        }
    }

    /// Issue `Trigger::Timer` every `interval` until `shutdown` flips to true
    /// or its sender is dropped.
    pub async fn run_scheduler(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "Refresh scheduler started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.trigger_refresh(Trigger::Timer).await {
                        Ok(outcome) => debug!(outcome = outcome.label(), "Timer refresh finished"),
                        Err(err) => warn!(error = %err, "Timer refresh failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Refresh scheduler stopped");
    }

    /// Latest published snapshot, if any.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.published.borrow().clone()
    }

    /// Receiver that observes every publication.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.published.subscribe()
    }

    pub fn status(&self) -> CoordinatorStatus {
        read(&self.status).clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Current aggregate for one candidate, read outside any snapshot. The
    /// store itself is never handed out; only refresh cycles write to it.
    pub fn candidate(&self, id: &CandidateId) -> Option<CandidateAggregate> {
        self.store.candidate(id)
    }

    /// Current aggregate for one region, read outside any snapshot.
    pub fn location(&self, key: &RegionKey) -> Option<LocationAggregate> {
        self.store.location(key)
    }

    /// Reference set used by published snapshots, once loaded.
    pub fn reference_geometry(&self) -> Option<Arc<ReferenceGeometry>> {
        self.geometry.get()
    }

    pub fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }

    pub fn decoder(&self) -> &EventDecoder {
        &self.decoder
    }

    async fn run_cycle(&self, trigger: Trigger) -> Result<RefreshOutcome, RefreshError> {
        let started = Instant::now();
        debug!(?trigger, "Refresh cycle started");

        // Disjoint keyspaces: both topics ingest concurrently, and both
        // finish before anything reads the store.
        let (votes, turnout) = tokio::join!(
            self.ingest(Topic::CandidateVotes),
            self.ingest(Topic::LocationTurnout)
        );
        let received = votes.polled + turnout.polled;

        if received == 0 {
            if let Some(previous) = self.latest().filter(|snapshot| !snapshot.is_degraded()) {
                debug!(version = previous.version, "No new records; snapshot unchanged");
                self.record_completion(previous.version, started);
                return Ok(RefreshOutcome::Unchanged(previous));
            }
        }

        let reference = match self.geometry.get_or_load(self.geometry_provider.as_ref()).await {
            Ok(reference) => reference,
            Err(err) => {
                let err = RefreshError::from(err);
                error!(error = %err, "Refresh cycle failed; keeping previous snapshot");
                self.record_failure(&err);
                return Err(err);
            }
        };

        let summary = match self.summary.get_or_fetch(self.summary_store.as_ref()).await {
            Ok(counters) => Some(counters),
            Err(err) => {
                warn!(error = %err, "Summary store unavailable; publishing degraded snapshot");
                None
            }
        };

        let snapshot = {
            let mut builder = self.builder.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::new(builder.build(&self.store, &reference, summary, Utc::now()))
        };

        self.metrics.set_unmatched_regions(snapshot.unmatched_regions.len() as u64);
        self.metrics.record_snapshot(snapshot.is_degraded());
        self.published.send_replace(Some(Arc::clone(&snapshot)));
        self.record_completion(snapshot.version, started);

        match snapshot.leader() {
            Some(leader) => info!(
                version = snapshot.version,
                leader = %leader.candidate_id,
                leader_votes = leader.total_votes,
                candidates = snapshot.leaderboard.len(),
                locations = snapshot.locations.len(),
                records = received,
                "Snapshot published"
            ),
            None => info!(
                version = snapshot.version,
                locations = snapshot.locations.len(),
                "Snapshot published; no candidate data yet"
            ),
        }

        Ok(RefreshOutcome::Published(snapshot))
    }

    async fn ingest(&self, topic: Topic) -> BatchReport {
        let records = match self.source.poll(topic, self.config.poll_timeout).await {
            Ok(records) => records,
            Err(err) => {
                self.metrics.record_poll_failure();
                warn!(topic = %topic, error = %err, "Poll failed; treating as empty batch");
                return BatchReport::default();
            }
        };

        let mut report = BatchReport {
            polled: records.len() as u64,
            ..BatchReport::default()
        };

        for record in &records {
            let applied = match self.decoder.decode(record) {
                DecodedEvent::Votes(event) => self.store.apply_votes(&event),
                DecodedEvent::Turnout(event) => self.store.apply_turnout(&event),
                DecodedEvent::Malformed(_) => {
                    report.discarded += 1;
                    continue;
                }
            };

            match applied {
                Ok(outcome) => {
                    report.applied += 1;
                    if outcome.changed() {
                        report.changed += 1;
                    }
                }
                Err(err) => {
                    report.discarded += 1;
                    warn!(topic = %topic, offset = record.offset, error = %err, "Record rejected by store");
                }
            }
        }

        self.metrics.record_batch(report.polled, report.applied, report.discarded);
        if report.polled > 0 {
            debug!(
                topic = %topic,
                polled = report.polled,
                applied = report.applied,
                changed = report.changed,
                discarded = report.discarded,
                "Batch ingested"
            );
        }
        report
    }

    fn record_completion(&self, version: u64, started: Instant) {
        self.metrics.record_cycle_completed(started.elapsed().as_micros() as u64);

        let mut status = write(&self.status);
        status.last_completed_at = Some(Utc::now());
        status.last_snapshot_version = Some(version);
        status.cycles_completed += 1;
        status.last_error = None;
    }

    fn record_failure(&self, err: &RefreshError) {
        self.metrics.record_cycle_failed();

        let mut status = write(&self.status);
        status.cycles_failed += 1;
        status.last_error = Some(err.to_string());
    }
}

/// Returns the coordinator to Idle however the cycle ends.
struct IdleOnDrop(Arc<RefreshCoordinator>);

impl Drop for IdleOnDrop {
    fn drop(&mut self) {
        write(&self.0.status).state = CoordinatorState::Idle;
        self.0.running.store(false, Ordering::Release);
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
