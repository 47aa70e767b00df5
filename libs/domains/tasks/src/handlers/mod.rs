mod admin;
mod tasks;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;

use crate::admin::DeadLetterAdmin;
use crate::models::{
    CreateTaskRequest, DeadLetterInspection, DeadLetterRecord, ReplayFailure, ReplayOutcome,
    TaskAcceptedResponse, TaskCreatedEvent,
};
use crate::publisher::TaskPublisher;

/// Shared state for the tasks and admin handlers
pub struct TasksState {
    pub publisher: TaskPublisher,
    pub admin: DeadLetterAdmin,
}

/// OpenAPI documentation for the tasks and dead-letter admin endpoints.
/// Paths are relative to the `/api` base.
#[derive(OpenApi)]
#[openapi(
    paths(
        tasks::tasks_status,
        tasks::create_task,
        admin::list_dead_letters,
        admin::get_dead_letters,
        admin::replay_dead_letters,
    ),
    components(
        schemas(
            CreateTaskRequest,
            TaskAcceptedResponse,
            TaskCreatedEvent,
            DeadLetterRecord,
            DeadLetterInspection,
            ReplayOutcome,
            ReplayFailure,
            axum_helpers::ErrorResponse,
        )
    ),
    tags(
        (name = "tasks", description = "Publish task-created events"),
        (name = "admin", description = "Dead-letter inspection and replay")
    )
)]
pub struct TasksApiDoc;

/// Routes relative to the API root (`/api` once nested):
///
/// - `GET|POST /tasks`
/// - `GET /admin/deadletters`
/// - `GET /admin/deadletters/{subscription}`
/// - `POST /admin/deadletters/{subscription}/replay`
pub fn router(state: TasksState) -> Router {
    Router::new()
        .route("/tasks", get(tasks::tasks_status).post(tasks::create_task))
        .route("/admin/deadletters", get(admin::list_dead_letters))
        .route(
            "/admin/deadletters/{subscription}",
            get(admin::get_dead_letters),
        )
        .route(
            "/admin/deadletters/{subscription}/replay",
            post(admin::replay_dead_letters),
        )
        .with_state(Arc::new(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskBusConfig;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use chrono::Utc;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use service_bus::{
        BusClient, BusError, BusResult, EntityPath, InMemoryBus, MessageSender, OutboundMessage,
        ReceivedMessage,
    };
    use tower::ServiceExt;

    const TOPIC: &str = "task-events";

    struct UnavailableSender;

    #[async_trait]
    impl MessageSender for UnavailableSender {
        fn entity(&self) -> &str {
            TOPIC
        }

        async fn send(&self, _message: OutboundMessage) -> BusResult<()> {
            Err(BusError::transient("broker is busy"))
        }
    }

    async fn app() -> (InMemoryBus, Router) {
        let bus = InMemoryBus::new();
        let config = TaskBusConfig::default();
        for sub in &config.subscriptions {
            bus.ensure_subscription(TOPIC, sub).await.unwrap();
        }
        let state = TasksState {
            publisher: TaskPublisher::new(bus.topic_sender(TOPIC).await.unwrap()),
            admin: DeadLetterAdmin::new(Arc::new(bus.clone()), &config),
        };
        (bus, Router::new().nest("/api", router(state)))
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn dead_lettered(body: &[u8]) -> ReceivedMessage {
        ReceivedMessage {
            body: body.to_vec(),
            subject: Some("TaskCreated".into()),
            content_type: Some("application/json".into()),
            message_id: Some("m-1".into()),
            correlation_id: None,
            application_properties: Default::default(),
            sequence_number: None,
            delivery_count: 1,
            enqueued_time: Utc::now(),
            dead_letter_reason: Some("DeserializationFailed".into()),
            dead_letter_error_description: Some("expected value at line 1".into()),
            lock_token: None,
        }
    }

    #[tokio::test]
    async fn test_status_text() {
        let (_bus, app) = app().await;
        let (status, body) = send(app, get("/api/tasks")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Tasks API is running");
    }

    #[tokio::test]
    async fn test_create_task_accepted() {
        let (bus, app) = app().await;
        let (status, body) = send(
            app,
            post_json(
                "/api/tasks",
                json!({"title": "Write docs", "description": "Cover replay", "assigned_to": "John Doe"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["message"], "Task queued for processing");
        assert!(body["task_id"].as_str().is_some());
        assert!(body["created_at"].as_str().is_some());

        let audit = EntityPath::subscription(TOPIC, "audit");
        assert_eq!(bus.message_count(&audit).await, 1);
    }

    #[tokio::test]
    async fn test_create_task_validation_errors() {
        let (bus, app) = app().await;

        let (status, body) = send(
            app.clone(),
            post_json(
                "/api/tasks",
                json!({"title": "x", "description": "d", "assigned_to": "a"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");
        assert!(body["details"]["title"].is_array());

        let (status, body) = send(
            app,
            post_json("/api/tasks", json!({"title": "Write docs"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");

        let audit = EntityPath::subscription(TOPIC, "audit");
        assert_eq!(bus.message_count(&audit).await, 0);
    }

    #[tokio::test]
    async fn test_create_task_transient_failure_is_503() {
        let bus = InMemoryBus::new();
        let state = TasksState {
            publisher: TaskPublisher::new(Arc::new(UnavailableSender)),
            admin: DeadLetterAdmin::new(Arc::new(bus), &TaskBusConfig::default()),
        };
        let app = Router::new().nest("/api", router(state));

        let (status, body) = send(
            app,
            post_json(
                "/api/tasks",
                json!({"title": "Write docs", "description": "d", "assigned_to": "a"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "SERVICE_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_unknown_subscription_is_400() {
        let (_bus, app) = app().await;

        for request in [
            get("/api/admin/deadletters/billing"),
            Request::post("/api/admin/deadletters/billing/replay")
                .body(Body::empty())
                .unwrap(),
        ] {
            let (status, body) = send(app.clone(), request).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["message"], "Subscription 'billing' does not exist.");
        }
    }

    #[tokio::test]
    async fn test_dead_letter_summary_and_detail() {
        let (bus, app) = app().await;
        let dlq = EntityPath::subscription(TOPIC, "email").dead_letter();
        bus.inject(&dlq, dead_lettered(b"not a task")).await;

        let (status, body) = send(app.clone(), get("/api/admin/deadletters")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"analytics": 0, "audit": 0, "email": 1}));

        let (status, body) = send(app, get("/api/admin/deadletters/email")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subscription"], "email");
        assert_eq!(body["total_count"], 1);
        let record = &body["messages"][0];
        assert_eq!(record["message_id"], "m-1");
        assert_eq!(record["raw_body"], "not a task");
        assert!(record.get("body").is_none());
        assert_eq!(record["dead_letter_reason"], "DeserializationFailed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_endpoint() {
        let (bus, app) = app().await;
        let event = TaskCreatedEvent::new("Write docs", "d", "a");
        let dlq = EntityPath::subscription(TOPIC, "audit").dead_letter();
        bus.inject(&dlq, dead_lettered(&serde_json::to_vec(&event).unwrap()))
            .await;

        let (status, body) = send(
            app,
            Request::post("/api/admin/deadletters/audit/replay")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"successful": 1, "failed": 0, "errors": []}));
        assert_eq!(bus.message_count(&dlq).await, 0);
    }

    #[test]
    fn test_openapi_lists_paths() {
        let doc = TasksApiDoc::openapi();
        let paths: Vec<_> = doc.paths.paths.keys().cloned().collect();
        assert!(paths.contains(&"/tasks".to_string()));
        assert!(paths.contains(&"/admin/deadletters/{subscription}/replay".to_string()));
    }
}
