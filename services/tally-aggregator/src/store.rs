//! Aggregation store: best-known value per key
//!
//! Holds two independent keyspaces, candidates by `CandidateId` and
//! locations by normalized `RegionKey`. Every update goes through the same
//! monotone-maximum rule:
//!
//! - unknown key → insert
//! - strictly larger total → replace (descriptive fields follow the new max)
//! - equal or smaller total → keep what is stored (first writer wins ties)
//!
//! Upstream messages are cumulative "total so far" values that may be
//! redelivered or arrive out of order. Taking the maximum makes the final
//! state independent of arrival order and duplication.
//!
//! Uses `BTreeMap` so snapshots iterate in key order.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use types::errors::ValidationError;
use types::ids::{CandidateId, RegionKey};
use types::tally::{CandidateAggregate, CandidateVoteEvent, LocationAggregate, LocationTurnoutEvent};

/// Effect of applying one event to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyOutcome {
    /// First observation for the key.
    Inserted,
    /// The stored value was replaced by a larger one.
    Raised { previous: u64 },
    /// Stale, duplicate or tied observation; nothing changed.
    Unchanged,
}

impl ApplyOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, ApplyOutcome::Unchanged)
    }
}

/// Process-wide aggregate state.
///
/// Each keyspace has its own lock, so the two streams can be ingested in
/// parallel while writes within a keyspace stay serialized.
#[derive(Debug, Default)]
pub struct AggregationStore {
    candidates: RwLock<BTreeMap<CandidateId, CandidateAggregate>>,
    locations: RwLock<BTreeMap<RegionKey, LocationAggregate>>,
}

impl AggregationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a candidate vote event into the store.
    pub fn apply_votes(&self, event: &CandidateVoteEvent) -> Result<ApplyOutcome, ValidationError> {
        event.validate()?;

        let mut candidates = write(&self.candidates);
        let outcome = match candidates.entry(event.candidate_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(CandidateAggregate::from(event.clone()));
                ApplyOutcome::Inserted
            }
            Entry::Occupied(mut slot) => {
                let previous = slot.get().total_votes;
                if event.total_votes > previous {
                    slot.insert(CandidateAggregate::from(event.clone()));
                    ApplyOutcome::Raised { previous }
                } else {
                    ApplyOutcome::Unchanged
                }
            }
        };
        Ok(outcome)
    }

    /// Merge a turnout event into the store under its normalized region key.
    pub fn apply_turnout(&self, event: &LocationTurnoutEvent) -> Result<ApplyOutcome, ValidationError> {
        let key = event.region_key()?;

        let mut locations = write(&self.locations);
        let outcome = match locations.entry(key) {
            Entry::Vacant(slot) => {
                let state = slot.key().clone();
                slot.insert(LocationAggregate {
                    state,
                    count: event.count,
                });
                ApplyOutcome::Inserted
            }
            Entry::Occupied(mut slot) => {
                let previous = slot.get().count;
                if event.count > previous {
                    slot.get_mut().count = event.count;
                    ApplyOutcome::Raised { previous }
                } else {
                    ApplyOutcome::Unchanged
                }
            }
        };
        Ok(outcome)
    }

    /// Owned copy of every candidate aggregate, in candidate-id order.
    pub fn snapshot_candidates(&self) -> Vec<CandidateAggregate> {
        read(&self.candidates).values().cloned().collect()
    }

    /// Owned copy of the location table.
    pub fn snapshot_locations(&self) -> BTreeMap<RegionKey, LocationAggregate> {
        read(&self.locations).clone()
    }

    /// Current aggregate for one candidate.
    pub fn candidate(&self, id: &CandidateId) -> Option<CandidateAggregate> {
        read(&self.candidates).get(id).cloned()
    }

    /// Current aggregate for one region.
    pub fn location(&self, key: &RegionKey) -> Option<LocationAggregate> {
        read(&self.locations).get(key).cloned()
    }

    pub fn candidate_count(&self) -> usize {
        read(&self.candidates).len()
    }

    pub fn location_count(&self) -> usize {
        read(&self.locations).len()
    }

    /// Whether neither keyspace has seen an event.
    pub fn is_empty(&self) -> bool {
        self.candidate_count() == 0 && self.location_count() == 0
    }
}

// Every write is a single insert or field update, so a map behind a
// poisoned lock still holds a state the reduction can continue from.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
