//! Routes owned by the app itself rather than the domain.

use axum::{
    Router,
    extract::State,
    response::{IntoResponse, Response},
    routing::get,
};
use axum_helpers::server::{HealthCheckFuture, run_health_checks};

use crate::state::AppState;

/// Readiness: the queue backend must answer a ping
pub async fn ready_handler(State(state): State<AppState>) -> Response {
    let checks: Vec<(&str, HealthCheckFuture<'_>)> = vec![(
        "queue",
        Box::pin(async {
            state
                .bus
                .health_check()
                .await
                .map_err(|e| format!("Queue ping failed: {}", e))
        }),
    )];

    match run_health_checks(checks).await {
        Ok((status, json)) => (status, json).into_response(),
        Err((status, json)) => (status, json).into_response(),
    }
}

pub fn ready_router(state: AppState) -> Router {
    Router::new()
        .route("/ready", get(ready_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Environment};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use core_config::{app_info, server::ServerConfig};
    use database::redis::RedisConfig;
    use domain_tasks::TaskBusConfig;
    use http_body_util::BodyExt;
    use service_bus::{
        BusClient, BusError, BusResult, EntityPath, InMemoryBus, MessageReceiver, MessageSender,
        ReceiverOptions, SubscriptionProperties,
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    struct DownBus;

    #[async_trait]
    impl BusClient for DownBus {
        async fn queue_sender(&self, _: &str) -> BusResult<Arc<dyn MessageSender>> {
            Err(BusError::transient("down"))
        }
        async fn topic_sender(&self, _: &str) -> BusResult<Arc<dyn MessageSender>> {
            Err(BusError::transient("down"))
        }
        async fn receiver(
            &self,
            _: EntityPath,
            _: ReceiverOptions,
        ) -> BusResult<Arc<dyn MessageReceiver>> {
            Err(BusError::transient("down"))
        }
        async fn ensure_subscription(&self, _: &str, _: &str) -> BusResult<()> {
            Err(BusError::transient("down"))
        }
        async fn subscription_properties(
            &self,
            _: &str,
            _: &str,
        ) -> BusResult<SubscriptionProperties> {
            Err(BusError::transient("down"))
        }
        async fn health_check(&self) -> BusResult<()> {
            Err(BusError::transient("connection refused"))
        }
    }

    fn state(bus: Arc<dyn BusClient>) -> AppState {
        AppState {
            config: Config {
                app: app_info!(),
                redis: RedisConfig::new("redis://127.0.0.1:6379"),
                server: ServerConfig::default(),
                bus: TaskBusConfig::default(),
                environment: Environment::Development,
            },
            bus,
        }
    }

    async fn ready(bus: Arc<dyn BusClient>) -> (StatusCode, serde_json::Value) {
        let response = ready_router(state(bus))
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_ready_when_queue_answers() {
        let (status, body) = ready(Arc::new(InMemoryBus::new())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
        assert_eq!(body["queue"], "connected");
    }

    #[tokio::test]
    async fn test_not_ready_when_queue_is_down() {
        let (status, body) = ready(Arc::new(DownBus)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "not ready");
        assert_eq!(body["queue"], "disconnected");
    }
}
