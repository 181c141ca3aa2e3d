use std::collections::BTreeMap;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use types::tally::CandidateAggregate;

use super::error::AppError;
use super::state::AppState;
use crate::coordinator::{CoordinatorStatus, Trigger};
use crate::geo;
use crate::snapshot::{LocationPage, LocationQuery, Snapshot, VoteShare};
use crate::source::Topic;

/// Upper bound on the location table page size.
const MAX_PAGE_SIZE: usize = 1000;

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub topic: &'static str,
    pub offset: u64,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub outcome: &'static str,
    pub version: Option<u64>,
}

#[derive(Debug, Serialize)]
struct SnapshotView<'a> {
    #[serde(flatten)]
    snapshot: &'a Snapshot,
    leader: Option<&'a CandidateAggregate>,
    vote_shares: Vec<VoteShare>,
    degraded: bool,
}

pub async fn publish_record(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<PublishResponse>), AppError> {
    let topic: Topic = topic.parse()?;
    if body.is_empty() {
        return Err(AppError::BadRequest("empty payload".into()));
    }

    // Payloads are not inspected here; malformed records are discarded at decode time.
    let offset = state.producer.publish(topic, body.to_vec())?;

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            topic: topic.as_str(),
            offset,
        }),
    ))
}

pub async fn refresh(State(state): State<AppState>) -> Result<Json<RefreshResponse>, AppError> {
    let outcome = state.coordinator.trigger_refresh(Trigger::Manual).await?;

    Ok(Json(RefreshResponse {
        outcome: outcome.label(),
        version: outcome.snapshot().map(|snapshot| snapshot.version),
    }))
}

pub async fn snapshot(State(state): State<AppState>) -> Result<Response, AppError> {
    let snapshot = state.coordinator.latest().ok_or(AppError::NoData)?;

    let view = SnapshotView {
        snapshot: &snapshot,
        leader: snapshot.leader(),
        vote_shares: snapshot.vote_shares(),
        degraded: snapshot.is_degraded(),
    };
    Ok(Json(view).into_response())
}

pub async fn locations(
    State(state): State<AppState>,
    Query(query): Query<LocationQuery>,
) -> Result<Json<LocationPage>, AppError> {
    if query.page_size == 0 || query.page_size > MAX_PAGE_SIZE {
        return Err(AppError::BadRequest(format!(
            "page_size must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }

    let snapshot = state.coordinator.latest().ok_or(AppError::NoData)?;
    Ok(Json(snapshot.location_page(&query)))
}

/// Map layer for the latest snapshot as a GeoJSON FeatureCollection.
pub async fn geometry(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let snapshot = state.coordinator.latest().ok_or(AppError::NoData)?;
    let reference = state.coordinator.reference_geometry().ok_or(AppError::NoData)?;

    Ok(Json(geo::feature_collection(&reference, &snapshot.geo_rows)))
}

pub async fn status(State(state): State<AppState>) -> Json<CoordinatorStatus> {
    Json(state.coordinator.status())
}

pub async fn metrics(State(state): State<AppState>) -> Json<BTreeMap<String, u64>> {
    Json(state.coordinator.metrics().export())
}
