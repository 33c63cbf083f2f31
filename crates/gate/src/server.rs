//! HTTP surface over the gate actor.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::commands::EvaluationOutcome;
use crate::dashboard;
use crate::handle::GateHandle;

/// Builds the full router: proposal, heartbeat, status, admin and dashboard.
#[must_use]
pub fn router(handle: GateHandle) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/proposal", post(submit_proposal))
        .route("/v1/heartbeat", post(heartbeat))
        .route("/v1/status", get(status))
        .route("/v1/admin/lock", post(lock))
        .route("/v1/admin/unlock", post(unlock))
        .route("/v1/admin/liquidate", post(liquidate))
        .route("/v1/admin/calendar", post(calendar))
        .route("/v1/admin/report", post(report))
        .route("/", get(index))
        .with_state(handle)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn submit_proposal(
    State(handle): State<GateHandle>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let signature = headers
        .get("X-GW-Signature")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    match handle.evaluate(body, signature).await {
        Ok(outcome) => {
            let status = match &outcome {
                EvaluationOutcome::Approved { .. } => StatusCode::OK,
                EvaluationOutcome::Rejected { .. } => StatusCode::FORBIDDEN,
                EvaluationOutcome::ExecutionFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                EvaluationOutcome::Malformed { .. } => StatusCode::BAD_REQUEST,
            };
            let body = serde_json::to_value(&outcome).unwrap_or_else(|_| json!({}));
            (status, Json(body))
        }
        Err(err) => {
            error!(%err, "evaluation request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal error"})),
            )
        }
    }
}

#[derive(Deserialize, Default)]
struct HeartbeatBody {
    #[serde(default)]
    state: Option<Value>,
}

async fn heartbeat(
    State(handle): State<GateHandle>,
    body: Option<Json<HeartbeatBody>>,
) -> (StatusCode, Json<Value>) {
    let state = body.and_then(|Json(b)| b.state);
    match handle.heartbeat(state).await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "OK"}))),
        Err(err) => {
            error!(%err, "heartbeat failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal error"})),
            )
        }
    }
}

async fn status(State(handle): State<GateHandle>) -> (StatusCode, Json<Value>) {
    match handle.status().await {
        Ok(view) => (
            StatusCode::OK,
            Json(serde_json::to_value(&view).unwrap_or_else(|_| json!({}))),
        ),
        Err(err) => {
            error!(%err, "status failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal error"})),
            )
        }
    }
}

#[derive(Deserialize, Default)]
struct LockBody {
    #[serde(default)]
    reason: Option<String>,
}

async fn lock(
    State(handle): State<GateHandle>,
    body: Option<Json<LockBody>>,
) -> (StatusCode, Json<Value>) {
    let reason = body.and_then(|Json(b)| b.reason);
    match handle.lock(reason.clone()).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({"status": "LOCKED", "reason": reason})),
        ),
        Err(err) => {
            error!(%err, "lock failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal error"})),
            )
        }
    }
}

async fn unlock(State(handle): State<GateHandle>) -> (StatusCode, Json<Value>) {
    match handle.unlock().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "UNLOCKED"}))),
        Err(err) => {
            error!(%err, "unlock failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal error"})),
            )
        }
    }
}

async fn liquidate(State(handle): State<GateHandle>) -> (StatusCode, Json<Value>) {
    match handle.liquidate().await {
        Ok(results) => (
            StatusCode::OK,
            Json(json!({"status": "LOCKED", "results": results})),
        ),
        Err(err) => {
            error!(%err, "liquidate failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal error"})),
            )
        }
    }
}

#[derive(Deserialize)]
struct CalendarBody {
    dates: Vec<NaiveDate>,
}

async fn calendar(
    State(handle): State<GateHandle>,
    Json(body): Json<CalendarBody>,
) -> (StatusCode, Json<Value>) {
    match handle.update_calendar(body.dates).await {
        Ok(count) => (
            StatusCode::OK,
            Json(json!({"status": "UPDATED", "count": count})),
        ),
        Err(err) => {
            error!(%err, "calendar update failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal error"})),
            )
        }
    }
}

async fn report(State(handle): State<GateHandle>) -> (StatusCode, Json<Value>) {
    match handle.eod_report().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "OK"}))),
        Err(err) => {
            error!(%err, "report trigger failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal error"})),
            )
        }
    }
}

async fn index(State(handle): State<GateHandle>) -> Html<String> {
    // The dashboard gets one second; a busy actor renders as unavailable
    // rather than holding the page open.
    match tokio::time::timeout(std::time::Duration::from_secs(1), handle.status()).await {
        Ok(Ok(view)) => Html(dashboard::render(&view)),
        _ => Html("<html><body><h1>gate unavailable</h1></body></html>".to_string()),
    }
}
