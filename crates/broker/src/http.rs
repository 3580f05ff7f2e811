//! HTTP front door
//!
//! Thin request/response wrapper over the broker's API: worker listing,
//! prompt submission, graceful shutdown, and Prometheus metrics. Mutating
//! endpoints check the configured shared secret; a mismatch is a 401 and
//! nothing else happens.

use crate::registry::WorkerRegistry;
use crate::scheduler::{DispatchRequest, Scheduler};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use modelgrid_common::{ModelGridError, METRICS};
use modelgrid_proto::ResourceSnapshot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<WorkerRegistry>,
    pub scheduler: Arc<Scheduler>,
    pub api_key: Arc<str>,
    pub shutdown: watch::Sender<bool>,
}

/// Build the front-door router.
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/workers", get(list_workers))
        .route("/dispatch", post(dispatch))
        .route("/shutdown", post(shutdown))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// One connected worker as reported by `GET /workers`.
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub id: String,
    pub remote_addr: String,
    pub models: Vec<ModelSummary>,
    pub resources: ResourceSnapshot,
    pub outstanding: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelSummary {
    pub id: String,
    pub context_window: u32,
    pub busy: bool,
}

async fn list_workers(State(state): State<AppState>) -> Json<Vec<WorkerSummary>> {
    let workers = state.registry.list().await;

    let summaries = workers
        .iter()
        .map(|worker| WorkerSummary {
            id: worker.id().to_string(),
            remote_addr: worker.remote_addr().to_string(),
            models: worker
                .model_slots()
                .into_iter()
                .map(|slot| ModelSummary {
                    id: slot.descriptor.id,
                    context_window: slot.descriptor.context_window,
                    busy: slot.busy,
                })
                .collect(),
            resources: worker.resources(),
            outstanding: worker.outstanding(),
        })
        .collect();

    Json(summaries)
}

#[derive(Debug, Deserialize)]
pub struct DispatchBody {
    pub prompt: String,
    #[serde(default)]
    pub context: String,
    #[serde(default = "default_max_tokens")]
    pub n: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    pub api_key: String,
}

fn default_max_tokens() -> u32 {
    128
}

fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DispatchReply {
    pub status: String,
    pub response: String,
}

async fn dispatch(
    State(state): State<AppState>,
    Json(body): Json<DispatchBody>,
) -> (StatusCode, Json<DispatchReply>) {
    if body.api_key.as_str() != &*state.api_key {
        return unauthorized();
    }

    let request = DispatchRequest {
        prompt: body.prompt,
        context: body.context,
        n: body.n,
        temperature: body.temperature,
    };

    match state.scheduler.dispatch(request).await {
        Ok(text) => (
            StatusCode::OK,
            Json(DispatchReply {
                status: "ok".to_string(),
                response: text,
            }),
        ),
        Err(err) => (
            error_status(&err),
            Json(DispatchReply {
                status: err.status_label().to_string(),
                response: err.to_string(),
            }),
        ),
    }
}

#[derive(Debug, Deserialize)]
pub struct ShutdownBody {
    pub api_key: String,
}

async fn shutdown(
    State(state): State<AppState>,
    Json(body): Json<ShutdownBody>,
) -> (StatusCode, Json<DispatchReply>) {
    if body.api_key.as_str() != &*state.api_key {
        return unauthorized();
    }

    info!("Shutdown requested via HTTP");
    state.registry.shutdown_drain().await;
    let _ = state.shutdown.send(true);

    (
        StatusCode::OK,
        Json(DispatchReply {
            status: "ok".to_string(),
            response: "shutting down".to_string(),
        }),
    )
}

async fn metrics() -> String {
    METRICS.gather()
}

fn unauthorized() -> (StatusCode, Json<DispatchReply>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(DispatchReply {
            status: "unauthorized".to_string(),
            response: "invalid api key".to_string(),
        }),
    )
}

fn error_status(err: &ModelGridError) -> StatusCode {
    match err {
        ModelGridError::NoCandidate(_) | ModelGridError::ShuttingDown => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ModelGridError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ModelGridError::SendFailed(_) | ModelGridError::Inference(_) => StatusCode::BAD_GATEWAY,
        ModelGridError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
