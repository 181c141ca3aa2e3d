//! Tally Aggregator
//!
//! Consumes two append-only streams of pre-aggregated election tallies and
//! produces:
//! - Per-candidate vote totals, reduced by monotone maximum
//! - Per-region turnout counts under a normalized region key
//! - A ranked leaderboard with a well-defined leader
//! - Map rows: turnout left-joined onto a reference region set, zero-filled
//! - Versioned, immutable snapshots published once per refresh cycle
//!
//! Records may arrive late, repeat, or go backwards; the reduction only
//! ever keeps the largest value seen per key, so the result is independent
//! of delivery order.
//!
//! # Architecture
//!
//! ```text
//!  aggregated_votes_per_candidate   aggregated_turnout_by_location
//!                │                              │
//!            ┌───▼───┐                      ┌───▼───┐
//!            │ Poll  │ ← bounded, joined ─→ │ Poll  │
//!            └───┬───┘                      └───┬───┘
//!                │                              │
//!            ┌───▼──────────────────────────────▼───┐
//!            │   Decode  (malformed → discarded)    │
//!            └───┬──────────────────────────────┬───┘
//!                │                              │
//!          ┌─────▼──────┐                ┌──────▼─────┐
//!          │ Candidates │                │  Regions   │  ← max per key
//!          └─────┬──────┘                └──────┬─────┘
//!                │                              │
//!          ┌─────▼──────┐                ┌──────▼─────┐
//!          │ Leaderboard│                │ Geo merge  │ ← reference set
//!          └─────┬──────┘                └──────┬─────┘
//!                │                              │
//!            ┌───▼──────────────────────────────▼───┐
//!            │  Snapshot (+ summary counters)       │
//!            └──────────────────┬───────────────────┘
//!                               │
//!                     watch channel / HTTP
//! ```
//!
//! A [`coordinator::RefreshCoordinator`] drives the whole pipeline; at most
//! one cycle runs at a time.

pub mod api;
pub mod config;
pub mod coordinator;
pub mod decoder;
pub mod geo;
pub mod metrics;
pub mod snapshot;
pub mod source;
pub mod store;
pub mod summary;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
