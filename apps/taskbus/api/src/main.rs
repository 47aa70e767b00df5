use axum::Router;
use axum_helpers::server::{create_production_app, create_router, health_router};
use core_config::tracing::{init_tracing, install_color_eyre};
use domain_tasks::{DeadLetterAdmin, TaskPublisher, TasksState};
use eyre::WrapErr;
use service_bus::{BusClient, RedisBus};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

mod config;
mod openapi;
mod routes;
mod state;

use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Install color-eyre first for colored error output (before any fallible operations)
    install_color_eyre();

    let config = Config::from_env()?;

    init_tracing(&config.environment);

    info!("Connecting to Redis queue backend");
    let redis = database::redis::connect_from_config_with_retry(&config.redis, None)
        .await
        .wrap_err("Redis connection failed")?;

    let bus: Arc<dyn BusClient> = Arc::new(RedisBus::new(redis));

    // Subscriptions must exist before the first publish, or the topic drops it
    for subscription in &config.bus.subscriptions {
        bus.ensure_subscription(&config.bus.topic, subscription)
            .await
            .wrap_err_with(|| format!("Failed to create subscription '{}'", subscription))?;
    }
    info!(
        topic = %config.bus.topic,
        subscriptions = ?config.bus.subscriptions,
        "Subscriptions ready"
    );

    let tasks_state = TasksState {
        publisher: TaskPublisher::new(bus.topic_sender(&config.bus.topic).await?),
        admin: DeadLetterAdmin::new(bus.clone(), &config.bus),
    };

    let state = AppState {
        config: config.clone(),
        bus,
    };

    let api_routes: Router = domain_tasks::handlers::router(tasks_state);

    // create_router adds docs and middleware around the API routes
    let router = create_router::<openapi::ApiDoc>(api_routes)?;

    // - /health: liveness with app name/version
    // - /ready: queue backend ping
    let app = router
        .merge(health_router(config.app))
        .merge(routes::ready_router(state.clone()));

    info!("Starting task bus API with graceful shutdown (30s timeout)");

    create_production_app(app, &config.server, Duration::from_secs(30), async move {
        // ConnectionManager closes on drop
        drop(state);
        info!("Queue connection released");
    })
    .await
    .wrap_err("Server error")?;

    info!("Task bus API shutdown complete");
    Ok(())
}
