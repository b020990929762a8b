//! HTTP router: WebSocket endpoint plus the REST surface for feeds,
//! operators, and monitoring.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json, Router,
};
use serde::Deserialize;

use crate::alerts::{self, AlertSubmission, NearbyAlert};
use crate::auth::AuthedUser;
use crate::metrics::MetricsSnapshot;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", axum::routing::get(ws_handler::ws_upgrade))
        .route("/api/alerts", axum::routing::post(submit_alert))
        .route("/api/alerts/nearby", axum::routing::get(nearby))
        .route("/api/system/message", axum::routing::post(system_message))
        .route("/api/metrics", axum::routing::get(metrics))
        .route("/healthz", axum::routing::get(health_check))
        .with_state(state)
}

/// POST /api/alerts — alert submission from operators and external feeds
/// (weather/seismic collaborators call this same contract).
/// Coordinator or admin token required. Returns the assigned alert id.
async fn submit_alert(
    State(state): State<AppState>,
    user: AuthedUser,
    Json(submission): Json<AlertSubmission>,
) -> Result<(StatusCode, Json<serde_json::Value>), StatusCode> {
    if !user.role.is_coordinator() {
        return Err(StatusCode::FORBIDDEN);
    }

    let alert = submission.into_alert(&user.user_id);
    let alert_id = alert.id.clone();
    match state.broadcaster.broadcast(alert).await {
        Ok(()) => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "id": alert_id })),
        )),
        Err(e) => {
            // Not partially delivered: the submitter must be told it failed.
            tracing::error!(alert_id = %alert_id, error = %e, "Alert broadcast failed");
            Err(StatusCode::BAD_GATEWAY)
        }
    }
}

#[derive(Debug, Deserialize)]
struct NearbyQuery {
    lat: f64,
    lng: f64,
    radius_km: Option<f64>,
}

/// GET /api/alerts/nearby?lat=..&lng=..[&radius_km=..] — any authenticated
/// role. Same scan the WebSocket path runs on a location update.
async fn nearby(
    State(state): State<AppState>,
    _user: AuthedUser,
    Query(q): Query<NearbyQuery>,
) -> Result<Json<Vec<NearbyAlert>>, StatusCode> {
    let radius = q.radius_km.unwrap_or(state.settings.nearby_radius_km);
    alerts::nearby_alerts(&state.store, q.lat, q.lng, radius)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!(error = %e, "Nearby alert query failed");
            StatusCode::BAD_GATEWAY
        })
}

#[derive(Debug, Deserialize)]
struct SystemMessageRequest {
    message: String,
}

/// POST /api/system/message — operator broadcast to every connection on
/// every process. Coordinator or admin token required.
async fn system_message(
    State(state): State<AppState>,
    user: AuthedUser,
    Json(body): Json<SystemMessageRequest>,
) -> Result<StatusCode, StatusCode> {
    if !user.role.is_coordinator() {
        return Err(StatusCode::FORBIDDEN);
    }

    state
        .broadcaster
        .broadcast_system(body.message)
        .await
        .map(|()| StatusCode::ACCEPTED)
        .map_err(|e| {
            tracing::error!(error = %e, "System broadcast failed");
            StatusCode::BAD_GATEWAY
        })
}

/// GET /api/metrics — latest collector snapshot.
async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.get_metrics().await)
}

/// Basic liveness probe.
async fn health_check() -> &'static str {
    "ok"
}
