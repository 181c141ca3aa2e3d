//! Record decoding for the tally aggregator
//!
//! Turns raw stream records into typed tally events. Decoding is keyed by
//! topic: the topic a record arrived on decides which schema it must match.
//! A record that fails is counted and discarded; it never aborts the batch
//! it came in.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;
use types::errors::ValidationError;
use types::tally::{CandidateVoteEvent, LocationTurnoutEvent};

use crate::source::{RawRecord, Topic};

/// Why a record was discarded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("record at {topic}@{offset} does not match schema: {reason}")]
    Schema {
        topic: Topic,
        offset: u64,
        reason: String,
    },

    #[error("record at {topic}@{offset} is invalid: {source}")]
    Invalid {
        topic: Topic,
        offset: u64,
        #[source]
        source: ValidationError,
    },
}

/// Outcome of decoding one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    Votes(CandidateVoteEvent),
    Turnout(LocationTurnoutEvent),
    Malformed(DecodeError),
}

impl DecodedEvent {
    /// Label for logging.
    pub fn kind_label(&self) -> &'static str {
        match self {
            DecodedEvent::Votes(_) => "Votes",
            DecodedEvent::Turnout(_) => "Turnout",
            DecodedEvent::Malformed(_) => "Malformed",
        }
    }
}

/// Schema-keyed decoder with running decode/discard counters.
#[derive(Debug, Default)]
pub struct EventDecoder {
    decoded: AtomicU64,
    discarded: AtomicU64,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a raw record according to its topic.
    pub fn decode(&self, record: &RawRecord) -> DecodedEvent {
        let event = match record.topic {
            Topic::CandidateVotes => decode_votes(record),
            Topic::LocationTurnout => decode_turnout(record),
        };

        match &event {
            DecodedEvent::Malformed(err) => {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                warn!(
                    topic = %record.topic,
                    offset = record.offset,
                    error = %err,
                    "Discarding malformed record"
                );
            }
            _ => {
                self.decoded.fetch_add(1, Ordering::Relaxed);
            }
        }

        event
    }

    /// Total records decoded successfully since creation.
    pub fn decoded(&self) -> u64 {
        self.decoded.load(Ordering::Relaxed)
    }

    /// Total records discarded since creation.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

fn decode_votes(record: &RawRecord) -> DecodedEvent {
    match serde_json::from_slice::<CandidateVoteEvent>(&record.payload) {
        Ok(event) => match event.validate() {
            Ok(()) => DecodedEvent::Votes(event),
            Err(source) => DecodedEvent::Malformed(DecodeError::Invalid {
                topic: record.topic,
                offset: record.offset,
                source,
            }),
        },
        Err(err) => DecodedEvent::Malformed(schema_error(record, &err)),
    }
}

fn decode_turnout(record: &RawRecord) -> DecodedEvent {
    match serde_json::from_slice::<LocationTurnoutEvent>(&record.payload) {
        Ok(event) => match event.region_key() {
            Ok(_) => DecodedEvent::Turnout(event),
            Err(source) => DecodedEvent::Malformed(DecodeError::Invalid {
                topic: record.topic,
                offset: record.offset,
                source,
            }),
        },
        Err(err) => DecodedEvent::Malformed(schema_error(record, &err)),
    }
}

fn schema_error(record: &RawRecord, err: &serde_json::Error) -> DecodeError {
    DecodeError::Schema {
        topic: record.topic,
        offset: record.offset,
        reason: err.to_string(),
    }
}
