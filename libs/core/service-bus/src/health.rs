//! Health check handlers for bus workers.
//!
//! - Liveness probes (`/health`, `/healthz`)
//! - Readiness probes (`/ready`, `/readyz`)
//! - Entity monitoring (`/entity/info`)
//! - Prometheus metrics (`/metrics`)

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::watch;

use crate::client::BusClient;
use crate::entity::EntityPath;
use crate::metrics;
use crate::processor::ProcessorState;

/// Shared state for health endpoints.
#[derive(Clone)]
pub struct HealthState {
    pub client: Arc<dyn BusClient>,
    pub app_name: String,
    pub app_version: String,
    /// Entity the worker consumes from
    pub entity: EntityPath,
    /// Processor lifecycle, when the worker runs one
    pub processor: Option<watch::Receiver<ProcessorState>>,
}

impl HealthState {
    pub fn new(
        client: Arc<dyn BusClient>,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
        entity: EntityPath,
    ) -> Self {
        Self {
            client,
            app_name: app_name.into(),
            app_version: app_version.into(),
            entity,
            processor: None,
        }
    }

    /// Readiness also requires the processor to be `Running`
    pub fn with_processor(mut self, state: watch::Receiver<ProcessorState>) -> Self {
        self.processor = Some(state);
        self
    }
}

/// Health response for liveness probes.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "healthy" if responding
    pub status: &'static str,
    pub name: String,
    pub version: String,
}

/// Liveness probe handler. Always OK while the server runs.
pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        name: state.app_name,
        version: state.app_version,
    })
}

/// Readiness probe handler.
///
/// Ready when the broker answers and, if a processor is attached, it is running.
pub async fn ready_handler(
    State(state): State<HealthState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let broker = match state.client.health_check().await {
        Ok(()) => "ok".to_string(),
        Err(e) => format!("error: {}", e),
    };

    let processor = state.processor.as_ref().map(|rx| *rx.borrow());
    let processor_ok = processor.map_or(true, |s| s == ProcessorState::Running);

    let mut checks = json!({ "broker": broker });
    if let Some(s) = processor {
        checks["processor"] = json!(s.as_ref());
    }

    if broker == "ok" && processor_ok {
        Ok((
            StatusCode::OK,
            Json(json!({ "status": "ready", "checks": checks })),
        ))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready", "checks": checks })),
        ))
    }
}

/// Message counts for the consumed entity.
///
/// Queues report no counts; only subscriptions carry properties.
pub async fn entity_info_handler(
    State(state): State<HealthState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let Some(subscription) = state.entity.subscription_name() else {
        return Ok(Json(json!({ "entity": state.entity.to_string() })));
    };

    match state
        .client
        .subscription_properties(state.entity.entity(), subscription)
        .await
    {
        Ok(props) => Ok(Json(json!({
            "entity": state.entity.to_string(),
            "active_message_count": props.active_message_count,
            "dead_letter_message_count": props.dead_letter_message_count,
        }))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": format!("Failed to get entity info: {}", e)
            })),
        )),
    }
}

/// Prometheus metrics in text format.
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized. Call init_metrics() at startup.".to_string(),
        )
            .into_response(),
    }
}

/// Standard health router: `/health`, `/healthz`, `/ready`, `/readyz`,
/// `/entity/info` and `/metrics`.
pub fn health_router(state: HealthState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/entity/info", get(entity_info_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
