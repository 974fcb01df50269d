//! HTTP surface: one SSE stream per submitted job, plus the durable read.
//!
//! Routes:
//! - `POST /api/roadmaps` validate, debit quota, start the job, stream events
//! - `GET /api/roadmaps/:job_id` the persisted artifact
//! - `GET /health`

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::anthropic::ModelClient;
use crate::events::StageEvent;
use crate::job::{GenerationRequest, RequestError, Requester};
use crate::orchestrator::Pipeline;
use crate::persistence::{ArtifactStore, PersistedArtifact};
use crate::quota::{QuotaError, QuotaGate};

pub const USER_HEADER: &str = "x-user-id";
pub const TRIAL_HEADER: &str = "x-trial-id";
pub const JOB_ID_HEADER: &str = "x-job-id";

/// Shared handles for every request.
pub struct AppState<M> {
    pub pipeline: Arc<Pipeline<M>>,
    pub quota: Arc<dyn QuotaGate>,
    pub store: Arc<dyn ArtifactStore>,
}

impl<M> Clone for AppState<M> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
            quota: Arc::clone(&self.quota),
            store: Arc::clone(&self.store),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// Request failures, each mapped to a status and a stable code.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("missing identity header")]
    MissingIdentity,
    #[error("quota exhausted for {0}")]
    QuotaExhausted(String),
    #[error("quota unavailable: {0}")]
    QuotaUnavailable(String),
    #[error("roadmap {0} not found")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::InvalidRequest(detail) => {
                (StatusCode::BAD_REQUEST, "INVALID_REQUEST", detail.clone())
            }
            ApiError::MissingIdentity => (
                StatusCode::UNAUTHORIZED,
                "MISSING_IDENTITY",
                format!("send an {USER_HEADER} or {TRIAL_HEADER} header"),
            ),
            ApiError::QuotaExhausted(_) => (
                StatusCode::TOO_MANY_REQUESTS,
                "QUOTA_EXHAUSTED",
                "no roadmap generations left".to_string(),
            ),
            ApiError::QuotaUnavailable(detail) => {
                tracing::error!(detail = %detail, "quota gate unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "QUOTA_UNAVAILABLE",
                    "quota service unavailable, try again later".to_string(),
                )
            }
            ApiError::NotFound(job_id) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("no roadmap with id {job_id}"),
            ),
            ApiError::Internal(detail) => {
                tracing::error!(detail = %detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "an internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}

impl From<RequestError> for ApiError {
    fn from(e: RequestError) -> Self {
        ApiError::InvalidRequest(e.to_string())
    }
}

impl From<QuotaError> for ApiError {
    fn from(e: QuotaError) -> Self {
        match e {
            QuotaError::Exhausted { requester } => ApiError::QuotaExhausted(requester),
            QuotaError::Unavailable(detail) => ApiError::QuotaUnavailable(detail),
        }
    }
}

pub fn router<M: ModelClient + 'static>(state: AppState<M>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/roadmaps", post(create_roadmap::<M>))
        .route("/api/roadmaps/:job_id", get(get_roadmap::<M>))
        .with_state(state)
}

/// Bind and serve until ctrl-c, then drain pending artifact writes.
pub async fn serve<M: ModelClient + 'static>(
    state: AppState<M>,
    bind_addr: &str,
) -> std::io::Result<()> {
    let writer = state.pipeline.writer().clone();
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "roadmap server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down");
        })
        .await?;

    writer.flush().await;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// `x-user-id` wins over `x-trial-id`. Blank values count as absent.
pub fn requester_from_headers(headers: &HeaderMap) -> Option<Requester> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    header(USER_HEADER)
        .map(Requester::User)
        .or_else(|| header(TRIAL_HEADER).map(Requester::Trial))
}

async fn create_roadmap<M: ModelClient + 'static>(
    State(state): State<AppState<M>>,
    headers: HeaderMap,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let requester = requester_from_headers(&headers).ok_or(ApiError::MissingIdentity)?;
    let Json(request) = payload.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
    request.validate()?;

    let token = state.quota.authorize_and_debit(&requester)?;
    let (job_id, rx) = state.pipeline.spawn(request, token);
    tracing::info!(job_id = %job_id, requester = %requester, "roadmap stream opened");

    let sse = Sse::new(event_stream(rx)).keep_alive(KeepAlive::default());
    Ok(([(JOB_ID_HEADER, job_id)], sse).into_response())
}

async fn get_roadmap<M: ModelClient + 'static>(
    State(state): State<AppState<M>>,
    Path(job_id): Path<String>,
) -> Result<Json<PersistedArtifact>, ApiError> {
    let store = Arc::clone(&state.store);
    let lookup_id = job_id.clone();
    let found = tokio::task::spawn_blocking(move || store.get(&lookup_id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    found.map(Json).ok_or(ApiError::NotFound(job_id))
}

/// Job events as SSE frames, in emission order. Ends after the terminal event.
fn event_stream(
    mut rx: mpsc::Receiver<StageEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            match Event::default().event(event.event_name()).json_data(&event) {
                Ok(frame) => yield Ok(frame),
                Err(e) => {
                    tracing::error!(job_id = %event.job_id(), error = %e, "failed to encode event");
                }
            }
        }
    }
}
