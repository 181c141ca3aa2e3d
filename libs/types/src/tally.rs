//! Tally stream events and the aggregates they reduce into
//!
//! Both event kinds carry cumulative totals ("aggregated so far"), never
//! increments. An aggregate therefore only ever moves to a larger total.

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::ids::{CandidateId, RegionKey};

/// Latest cumulative vote count reported for a candidate.
///
/// Wire shape of the `aggregated_votes_per_candidate` topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateVoteEvent {
    pub candidate_id: CandidateId,
    pub candidate_name: String,
    pub party_affiliation: String,
    pub photo_url: String,
    pub total_votes: u64,
}

impl CandidateVoteEvent {
    /// Check that the event can be keyed.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.candidate_id.as_str().trim().is_empty() {
            return Err(ValidationError::BlankCandidateId);
        }
        Ok(())
    }
}

/// Cumulative turnout for a region.
///
/// Wire shape of the `aggregated_turnout_by_location` topic. `state` is kept
/// as sent; use [`LocationTurnoutEvent::region_key`] to key it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationTurnoutEvent {
    pub state: String,
    pub count: u64,
}

impl LocationTurnoutEvent {
    /// Normalized key for this event's region.
    pub fn region_key(&self) -> Result<RegionKey, ValidationError> {
        RegionKey::try_new(&self.state).ok_or_else(|| ValidationError::BlankRegion {
            raw: self.state.clone(),
        })
    }
}

/// Best-known state of a candidate: the maximum observation so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateAggregate {
    pub candidate_id: CandidateId,
    pub candidate_name: String,
    pub party_affiliation: String,
    pub photo_url: String,
    pub total_votes: u64,
}

impl From<CandidateVoteEvent> for CandidateAggregate {
    fn from(event: CandidateVoteEvent) -> Self {
        Self {
            candidate_id: event.candidate_id,
            candidate_name: event.candidate_name,
            party_affiliation: event.party_affiliation,
            photo_url: event.photo_url,
            total_votes: event.total_votes,
        }
    }
}

/// Best-known turnout of a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationAggregate {
    pub state: RegionKey,
    pub count: u64,
}

/// Totals read from the registration store, passed through to display as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SummaryCounters {
    pub total_voters: u64,
    pub total_candidates: u64,
}
