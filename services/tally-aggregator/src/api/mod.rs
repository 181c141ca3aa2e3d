//! HTTP surface: record ingest, manual refresh, and read-only views of the
//! latest snapshot for display collaborators.

mod error;
mod handlers;
mod state;

pub use error::AppError;
pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/topics/:topic/records", post(handlers::publish_record))
        .route("/refresh", post(handlers::refresh))
        .route("/snapshot", get(handlers::snapshot))
        .route("/snapshot/locations", get(handlers::locations))
        .route("/geometry", get(handlers::geometry))
        .route("/status", get(handlers::status))
        .route("/metrics", get(handlers::metrics));

    Router::new()
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{CoordinatorConfig, RefreshCoordinator};
    use crate::geo::{ReferenceGeometry, ReferenceRegion, StaticGeometry};
    use crate::source::{self, ChannelSourceConfig};
    use crate::summary::StaticSummary;
    use axum::body::{self, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;
    use types::tally::SummaryCounters;

    fn app() -> Router {
        let (producer, source) = source::channel(ChannelSourceConfig::default());
        let regions = ["Goa", "Kerala", "Punjab"].iter().map(|name| ReferenceRegion {
            region_name: name.to_string(),
            geometry: json!({"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [0.0, 0.0]]]}),
        });
        let coordinator = RefreshCoordinator::new(
            Arc::new(source),
            Arc::new(StaticGeometry(ReferenceGeometry::new(regions).unwrap())),
            Arc::new(StaticSummary(SummaryCounters {
                total_voters: 900,
                total_candidates: 2,
            })),
            CoordinatorConfig {
                poll_timeout: Duration::from_millis(20),
            },
        );
        create_router(AppState::new(Arc::new(coordinator), producer))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn publish_votes(app: &Router, id: &str, total: u64) {
        let payload = format!(
            r#"{{"candidate_id":"{}","candidate_name":"Name {}","party_affiliation":"Party","photo_url":"","total_votes":{}}}"#,
            id, id, total
        );
        let (status, _) = send(app, "POST", "/v1/topics/aggregated_votes_per_candidate/records", &payload).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    async fn publish_turnout(app: &Router, state: &str, count: u64) {
        let payload = format!(r#"{{"state":"{}","count":{}}}"#, state, count);
        let (status, _) = send(app, "POST", "/v1/topics/aggregated_turnout_by_location/records", &payload).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_snapshot_before_first_publish() {
        let app = app();

        let (status, body) = send(&app, "GET", "/v1/snapshot", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "NO_DATA");

        let (status, body) = send(&app, "GET", "/v1/status", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "idle");
        assert_eq!(body["last_completed_at"], Value::Null);
    }

    #[tokio::test]
    async fn test_unknown_topic() {
        let app = app();
        let (status, body) = send(&app, "POST", "/v1/topics/presidential_polls/records", "{}").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_empty_payload_rejected() {
        let app = app();
        let (status, body) = send(&app, "POST", "/v1/topics/aggregated_votes_per_candidate/records", "").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_ingest_refresh_and_read() {
        let app = app();
        publish_votes(&app, "c1", 10).await;
        publish_votes(&app, "c2", 15).await;
        publish_votes(&app, "c1", 8).await;
        publish_turnout(&app, " goa", 3).await;
        publish_turnout(&app, "Atlantis", 2).await;

        let (status, body) = send(&app, "POST", "/v1/refresh", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "published");
        assert_eq!(body["version"], 1);

        let (status, body) = send(&app, "GET", "/v1/snapshot", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["leader"]["candidate_id"], "c2");
        assert_eq!(body["leaderboard"][1]["candidate_id"], "c1");
        assert_eq!(body["leaderboard"][1]["total_votes"], 10);
        assert_eq!(body["geo_rows"][0]["region_name"], "Goa");
        assert_eq!(body["geo_rows"][0]["count"], 3);
        assert_eq!(body["geo_rows"][1]["count"], 0);
        assert_eq!(body["unmatched_regions"][0], "atlantis");
        assert_eq!(body["summary"]["total_voters"], 900);
        assert_eq!(body["degraded"], false);

        let (_, body) = send(&app, "GET", "/v1/metrics", "").await;
        assert_eq!(body["records_polled"], 5);
        assert_eq!(body["unmatched_regions"], 1);
    }

    #[tokio::test]
    async fn test_geometry_layer_passes_shapes_through() {
        let app = app();

        let (status, body) = send(&app, "GET", "/v1/geometry", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "NO_DATA");

        publish_turnout(&app, "KERALA", 4).await;
        send(&app, "POST", "/v1/refresh", "").await;

        let (status, body) = send(&app, "GET", "/v1/geometry", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "FeatureCollection");
        let features = body["features"].as_array().unwrap();
        assert_eq!(features.len(), 3);
        assert_eq!(features[1]["properties"]["region_name"], "Kerala");
        assert_eq!(features[1]["properties"]["count"], 4);
        assert_eq!(features[1]["geometry"]["type"], "Polygon");
        assert_eq!(features[1]["geometry"]["coordinates"][0][1], json!([1.0, 0.0]));
    }

    #[tokio::test]
    async fn test_location_page_query() {
        let app = app();
        publish_turnout(&app, "Goa", 3).await;
        publish_turnout(&app, "Kerala", 9).await;
        publish_turnout(&app, "Punjab", 5).await;
        send(&app, "POST", "/v1/refresh", "").await;

        let (status, body) = send(
            &app,
            "GET",
            "/v1/snapshot/locations?page=0&page_size=2&sort=count&direction=descending",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"][0]["state"], "kerala");
        assert_eq!(body["items"][1]["state"], "punjab");
        assert_eq!(body["total_pages"], 2);
        assert_eq!(body["has_more"], true);

        let (status, _) = send(&app, "GET", "/v1/snapshot/locations?page_size=0", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
