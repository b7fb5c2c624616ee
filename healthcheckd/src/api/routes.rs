use std::sync::Arc;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use shared::protocol::{API_PREFIX, HEALTHCHECK_PATH};
use shared::types::{HeartbeatRequest, IntakeResponse, ServerRecord};
use crate::archive::{ArchiveStats, ArchiveStatsSnapshot};
use crate::reconcile::ReconcilerStatus;
use crate::store::ServerStore;
use crate::tracker::LivenessTracker;
use crate::transport::{PublishError, TopicPublisher};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ServerStore>,
    pub publisher: TopicPublisher,
    pub tracker: Arc<LivenessTracker>,
    pub reconciler: watch::Receiver<ReconcilerStatus>,
    pub archive_stats: Arc<ArchiveStats>,
}

/// Whether an address has reported in the current window
#[derive(Serialize)]
pub struct AddressLiveness {
    pub address: String,
    pub seen: bool,
}

#[derive(Serialize)]
pub struct LivenessResponse {
    pub window_size: usize,
    pub reconciler: ReconcilerStatus,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(HEALTHCHECK_PATH, post(post_heartbeat))
        .route(&format!("{}/servers", API_PREFIX), get(get_servers))
        .route(&format!("{}/servers/:address", API_PREFIX), get(get_server))
        .route(&format!("{}/liveness", API_PREFIX), get(get_liveness))
        .route(&format!("{}/liveness/:address", API_PREFIX), get(get_address_liveness))
        .route(&format!("{}/archive/stats", API_PREFIX), get(get_archive_stats))
        .with_state(state)
}

fn reply(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<IntakeResponse>) {
    (
        status,
        Json(IntakeResponse {
            code: status.as_u16(),
            message: message.into(),
        }),
    )
}

async fn post_heartbeat(State(state): State<AppState>, body: Bytes) -> (StatusCode, Json<IntakeResponse>) {
    let request: HeartbeatRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return reply(StatusCode::BAD_REQUEST, format!("invalid heartbeat: {}", e)),
    };
    if request.ip.trim().is_empty() {
        return reply(StatusCode::BAD_REQUEST, "invalid heartbeat: empty ip");
    }

    let message = request.into_message(Utc::now().timestamp_millis());
    let payload = match serde_json::to_vec(&message) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!("Failed to encode heartbeat from {}: {}", message.ip, e);
            return reply(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode heartbeat");
        }
    };

    match state.publisher.publish(payload) {
        Ok(()) => reply(StatusCode::OK, "OK"),
        Err(e @ PublishError::Full(_)) => {
            tracing::warn!("Rejecting heartbeat from {}: {}", message.ip, e);
            reply(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        Err(e @ PublishError::Closed(_)) => {
            tracing::error!("Failed to publish heartbeat from {}: {}", message.ip, e);
            reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn get_servers(State(state): State<AppState>) -> Result<Json<Vec<ServerRecord>>, StatusCode> {
    state.store.list().await.map(Json).map_err(|e| {
        tracing::error!("Failed to query servers: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn get_server(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<ServerRecord>, StatusCode> {
    state
        .store
        .find_by_address(&address)
        .await
        .map_err(|e| {
            tracing::error!("Failed to query server: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_liveness(State(state): State<AppState>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        window_size: state.tracker.len(),
        reconciler: state.reconciler.borrow().clone(),
    })
}

async fn get_address_liveness(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Json<AddressLiveness> {
    Json(AddressLiveness {
        seen: state.tracker.contains(&address),
        address,
    })
}

async fn get_archive_stats(State(state): State<AppState>) -> Json<ArchiveStatsSnapshot> {
    Json(state.archive_stats.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use serde_json::Value;
    use shared::types::{ServerStatus, Signal};
    use tower::ServiceExt;
    use crate::testing::sqlite_store;
    use crate::transport::{LocalTopic, SignalSource, TopicSubscription};

    fn test_app(capacity: usize) -> (Router, TopicSubscription, Arc<dyn ServerStore>, Arc<LivenessTracker>) {
        let (publisher, subscription) = LocalTopic::new("healthcheck", capacity);
        let store: Arc<dyn ServerStore> = Arc::new(sqlite_store());
        let tracker = Arc::new(LivenessTracker::new());
        let (_status_tx, status_rx) = watch::channel(ReconcilerStatus::default());
        let state = AppState {
            store: store.clone(),
            publisher,
            tracker: tracker.clone(),
            reconciler: status_rx,
            archive_stats: Arc::new(ArchiveStats::default()),
        };
        (router(state), subscription, store, tracker)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_heartbeat_is_published_with_server_time() {
        let (app, subscription, _store, _tracker) = test_app(4);
        let before = Utc::now().timestamp_millis();

        let (status, body) = send(&app, Method::POST, "/healthcheck", r#"{"ip":"10.0.0.5","duration":15,"time":1}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 200);
        assert_eq!(body["message"], "OK");

        let signal = Signal::decode(&subscription.recv().await.unwrap()).unwrap();
        assert_eq!(signal.address, "10.0.0.5");
        assert_eq!(signal.duration_seconds, 15);
        assert!(signal.observed_at_millis >= before);
    }

    #[tokio::test]
    async fn test_invalid_heartbeat_is_rejected() {
        let (app, _subscription, _store, _tracker) = test_app(4);

        let (status, body) = send(&app, Method::POST, "/healthcheck", r#"{"duration":15}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], 400);

        let (status, _) = send(&app, Method::POST, "/healthcheck", r#"{"ip":" ","duration":15}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_full_topic_is_unavailable() {
        let (app, _subscription, _store, _tracker) = test_app(1);
        let heartbeat = r#"{"ip":"10.0.0.5","duration":15}"#;

        let (status, _) = send(&app, Method::POST, "/healthcheck", heartbeat).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&app, Method::POST, "/healthcheck", heartbeat).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], 503);
    }

    #[tokio::test]
    async fn test_server_queries() {
        let (app, _subscription, store, _tracker) = test_app(4);
        store.create("10.0.0.5", "10.0.0.5", ServerStatus::Up).await.unwrap();

        let (status, body) = send(&app, Method::GET, "/v1/servers", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, body) = send(&app, Method::GET, "/v1/servers/10.0.0.5", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["address"], "10.0.0.5");
        assert_eq!(body["status"], "up");

        let (status, _) = send(&app, Method::GET, "/v1/servers/10.9.9.9", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_liveness_and_archive_stats() {
        let (app, _subscription, _store, tracker) = test_app(4);
        tracker.mark_seen("10.0.0.5");
        tracker.mark_seen("10.0.0.6");

        let (status, body) = send(&app, Method::GET, "/v1/liveness", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["window_size"], 2);
        assert_eq!(body["reconciler"]["state"], "idle");
        assert!(body["reconciler"]["last_run"].is_null());

        let (status, body) = send(&app, Method::GET, "/v1/liveness/10.0.0.5", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["address"], "10.0.0.5");
        assert_eq!(body["seen"], true);

        let (_, body) = send(&app, Method::GET, "/v1/liveness/10.0.0.9", "").await;
        assert_eq!(body["seen"], false);

        let (status, body) = send(&app, Method::GET, "/v1/archive/stats", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["submitted"], 0);
        assert_eq!(body["failed_flushes"], 0);
    }
}
