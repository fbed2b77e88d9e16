//! HTTP boundary of the intake side.
//!
//! ## Routes
//!
//! - `POST /` forwards the raw body to the publisher and answers `201 Created`
//!   with an empty body. Bodies are never validated here.
//! - `GET /health` answers `{ "status": "ok", "version": ... }`.

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::{debug, info};

use super::publisher::OrderPublisher;
use crate::config::ServerSettings;
use crate::order::summarize;

/// Shared state of the intake routes.
#[derive(Debug, Clone)]
pub struct IntakeState {
    pub publisher: OrderPublisher,
    pub version: String,
    /// Answer `202 Accepted` with a warning when the publish failed.
    pub report_degraded: bool,
}

impl IntakeState {
    pub fn new(publisher: OrderPublisher, server: &ServerSettings) -> Self {
        Self {
            publisher,
            version: server.app_version.clone(),
            report_degraded: server.report_degraded,
        }
    }
}

pub fn router(state: IntakeState) -> Router {
    Router::new()
        .route("/", post(submit_order))
        .route("/health", get(health))
        .with_state(Arc::new(state))
}

/// Bind `addr` and serve the intake routes until `shutdown` resolves.
pub async fn serve<F>(addr: &str, state: IntakeState, shutdown: F) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %listener.local_addr()?, "order intake listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn submit_order(State(state): State<Arc<IntakeState>>, body: Bytes) -> Response {
    debug!(summary = %summarize(&body), "order received");

    match state.publisher.publish(&body).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) if state.report_degraded => (
            StatusCode::ACCEPTED,
            Json(json!({ "warning": format!("order accepted but not queued: {e}") })),
        )
            .into_response(),
        // already logged by the publisher
        Err(_) => StatusCode::CREATED.into_response(),
    }
}

async fn health(State(state): State<Arc<IntakeState>>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": state.version }))
}
