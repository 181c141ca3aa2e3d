//! Snapshot construction for the tally aggregator
//!
//! A snapshot is the immutable, versioned view handed to display
//! collaborators once per refresh cycle: the ranked leaderboard, the
//! location table, the map rows and the summary counters. It is built from
//! owned copies of the store's state and never aliases it.
//!
//! Leaderboard order: `total_votes` descending, then `candidate_id`
//! ascending, so equal totals always rank the same way.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use types::ids::{CandidateId, RegionKey};
use types::tally::{CandidateAggregate, LocationAggregate, SummaryCounters};
use uuid::Uuid;

use crate::geo::{self, GeoMerge, GeoRow, ReferenceGeometry};
use crate::store::AggregationStore;

/// Point-in-time view of the aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique snapshot identifier (UUID v7).
    pub id: Uuid,
    /// Monotonic snapshot version within this process.
    pub version: u64,
    pub built_at: DateTime<Utc>,
    /// Candidates in rank order; the head is the leader.
    pub leaderboard: Vec<CandidateAggregate>,
    pub locations: BTreeMap<RegionKey, LocationAggregate>,
    /// One row per reference region.
    pub geo_rows: Vec<GeoRow>,
    /// Turnout regions that have no reference region.
    pub unmatched_regions: Vec<RegionKey>,
    /// `None` when the summary store could not be read (degraded snapshot).
    pub summary: Option<SummaryCounters>,
    /// SHA-256 over leaderboard and location content.
    pub checksum: String,
}

impl Snapshot {
    /// The leading candidate, or `None` when no votes have been seen yet.
    pub fn leader(&self) -> Option<&CandidateAggregate> {
        self.leaderboard.first()
    }

    pub fn has_data(&self) -> bool {
        !self.leaderboard.is_empty() || !self.locations.is_empty()
    }

    pub fn is_degraded(&self) -> bool {
        self.summary.is_none()
    }

    /// Each candidate's percentage of all votes, in leaderboard order.
    pub fn vote_shares(&self) -> Vec<VoteShare> {
        // Individual totals are u64, so their sum is not
        let total: u128 = self.leaderboard.iter().map(|c| u128::from(c.total_votes)).sum();
        self.leaderboard
            .iter()
            .map(|candidate| VoteShare {
                candidate_id: candidate.candidate_id.clone(),
                percent: if total == 0 {
                    0.0
                } else {
                    candidate.total_votes as f64 * 100.0 / total as f64
                },
            })
            .collect()
    }

    /// One page of the location table.
    pub fn location_page(&self, query: &LocationQuery) -> LocationPage {
        let page_size = query.page_size.max(1);
        let mut rows: Vec<&LocationAggregate> = self.locations.values().collect();

        match query.sort {
            LocationSortField::State => {
                if query.direction == SortDirection::Descending {
                    rows.reverse();
                }
            }
            LocationSortField::Count => rows.sort_by(|a, b| {
                let by_count = match query.direction {
                    SortDirection::Ascending => a.count.cmp(&b.count),
                    SortDirection::Descending => b.count.cmp(&a.count),
                };
                by_count.then_with(|| a.state.cmp(&b.state))
            }),
        }

        let total_items = rows.len();
        let total_pages = total_items.div_ceil(page_size).max(1);
        let offset = query.page.saturating_mul(page_size);
        let items: Vec<LocationAggregate> = rows
            .into_iter()
            .skip(offset)
            .take(page_size)
            .cloned()
            .collect();

        LocationPage {
            items,
            page: query.page,
            page_size,
            total_items,
            total_pages,
            has_more: offset.saturating_add(page_size) < total_items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteShare {
    pub candidate_id: CandidateId,
    pub percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationSortField {
    #[default]
    State,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Page request for the location table. `page` is 0-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationQuery {
    pub page: usize,
    pub page_size: usize,
    pub sort: LocationSortField,
    pub direction: SortDirection,
}

impl Default for LocationQuery {
    fn default() -> Self {
        Self {
            page: 0,
            page_size: 10,
            sort: LocationSortField::State,
            direction: SortDirection::Ascending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationPage {
    pub items: Vec<LocationAggregate>,
    pub page: usize,
    pub page_size: usize,
    pub total_items: usize,
    pub total_pages: usize,
    pub has_more: bool,
}

/// Builds versioned snapshots from the store.
pub struct SnapshotBuilder {
    /// Current snapshot version counter.
    version_counter: u64,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self { version_counter: 0 }
    }

    /// Build a snapshot of the store's current state.
    pub fn build(
        &mut self,
        store: &AggregationStore,
        reference: &ReferenceGeometry,
        summary: Option<SummaryCounters>,
        built_at: DateTime<Utc>,
    ) -> Snapshot {
        self.version_counter += 1;

        let leaderboard = rank_candidates(store.snapshot_candidates());
        let locations = store.snapshot_locations();
        let GeoMerge { rows, unmatched } = geo::merge(reference, &locations);
        let checksum = compute_checksum(&leaderboard, &locations);

        Snapshot {
            id: Uuid::now_v7(),
            version: self.version_counter,
            built_at,
            leaderboard,
            locations,
            geo_rows: rows,
            unmatched_regions: unmatched,
            summary,
            checksum,
        }
    }

    /// Current snapshot version.
    pub fn current_version(&self) -> u64 {
        self.version_counter
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Sort candidates into leaderboard order.
pub fn rank_candidates(mut candidates: Vec<CandidateAggregate>) -> Vec<CandidateAggregate> {
    candidates.sort_by(leaderboard_order);
    candidates
}

fn leaderboard_order(a: &CandidateAggregate, b: &CandidateAggregate) -> Ordering {
    b.total_votes
        .cmp(&a.total_votes)
        .then_with(|| a.candidate_id.cmp(&b.candidate_id))
}

/// Compute a SHA-256 checksum over leaderboard and location content,
/// including each candidate's descriptive fields.
fn compute_checksum(
    leaderboard: &[CandidateAggregate],
    locations: &BTreeMap<RegionKey, LocationAggregate>,
) -> String {
    let mut hasher = Sha256::new();

    for candidate in leaderboard {
        for field in [
            candidate.candidate_id.as_str(),
            candidate.candidate_name.as_str(),
            candidate.party_affiliation.as_str(),
            candidate.photo_url.as_str(),
        ] {
            // Length prefix keeps field boundaries unambiguous
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.update(candidate.total_votes.to_le_bytes());
        hasher.update(b"|");
    }
    hasher.update(b"---");

    for (state, location) in locations {
        hasher.update(state.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(location.count.to_le_bytes());
        hasher.update(b"|");
    }

    format!("{:x}", hasher.finalize())
}

/// Verify that a snapshot's checksum matches its content.
pub fn verify_snapshot_integrity(snapshot: &Snapshot) -> bool {
    snapshot.checksum == compute_checksum(&snapshot.leaderboard, &snapshot.locations)
}
