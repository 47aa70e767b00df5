//! Task Bus Worker
//!
//! Runs one consumer bound to one subscription of the task topic, or to the
//! `tasks` queue in single-queue mode.
//!
//! ## Architecture
//!
//! ```text
//! task-events/Subscriptions/{analytics|audit|email}   (or queue: tasks)
//!   ↓ peek-lock receive
//! MessageProcessor<TaskEventHandler>
//!   ↓ decode → side effect
//! complete | abandon | dead-letter
//! ```
//!
//! ## Features
//!
//! - Serial processing by default; `WORKER_MAX_CONCURRENT_CALLS` raises it
//! - Max-delivery and lock settings from `TASKBUS_*`
//! - Graceful shutdown: in-flight messages settle before the receiver closes
//! - Health, readiness and Prometheus metrics for Kubernetes probes

use axum::Router;
use axum_helpers::ShutdownCoordinator;
use clap::Parser;
use core_config::{Environment, FromEnv, app_info, server::ServerConfig};
use database::redis::RedisConfig;
use domain_tasks::{TaskBusConfig, TaskEventHandler, WorkerKind};
use eyre::{Result, WrapErr};
use service_bus::{
    BusClient, HealthState, MessageProcessor, ProcessorConfig, RedisBus, health_router, metrics,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Command-line and environment settings for one worker process
#[derive(Debug, Clone, Parser)]
#[command(name = "taskbus-worker")]
#[command(about = "Consume task-created events from one subscription")]
pub struct WorkerArgs {
    /// analytics, audit, email, or tasks for the single queue
    #[arg(short, long, env = "WORKER_SUBSCRIPTION")]
    pub subscription: WorkerKind,

    /// Messages handled at the same time
    #[arg(long, env = "WORKER_MAX_CONCURRENT_CALLS", default_value_t = 1)]
    pub max_concurrent_calls: usize,
}

/// Health port: `WORKER_HEALTH_PORT`, then `HEALTH_PORT`, then 8082
pub fn health_server_config() -> Result<ServerConfig> {
    ServerConfig::from_env_with_ports(&["WORKER_HEALTH_PORT", "HEALTH_PORT"], 8082)
        .wrap_err("Invalid health server configuration")
}

pub fn processor_config(args: &WorkerArgs, bus: &TaskBusConfig) -> ProcessorConfig {
    ProcessorConfig::new()
        .with_max_concurrent_calls(args.max_concurrent_calls)
        .with_receiver_options(bus.receiver_options())
}

/// Serve health and metrics until shutdown
async fn start_health_server(
    health_state: HealthState,
    config: ServerConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let app: Router = health_router(health_state);

    let listener = TcpListener::bind(config.address())
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", config.address()))?;

    info!(address = %config.address(), "Health server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// Run the worker
///
/// 1. Sets up structured logging and Prometheus metrics
/// 2. Connects to Redis and makes sure the subscription exists
/// 3. Serves health endpoints in the background
/// 4. Runs the message processor until SIGINT/SIGTERM
///
/// # Errors
///
/// Startup failures (bad configuration, Redis unreachable after retries),
/// or the receiver being closed underneath the processor. Receive errors are
/// retried and message-level failures are settled inside the processor.
pub async fn run(args: WorkerArgs) -> Result<()> {
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    metrics::init_metrics().wrap_err("Failed to install Prometheus recorder")?;

    let app_info = app_info!();
    let kind = args.subscription;

    info!(
        name = %app_info.name,
        version = %app_info.version,
        kind = %kind,
        "Starting task bus worker"
    );

    let bus_config = TaskBusConfig::from_env().wrap_err("Failed to load task bus configuration")?;
    let health_config = health_server_config()?;
    let redis_config = RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;

    info!("Connecting to Redis...");
    let redis = database::redis::connect_from_config_with_retry(&redis_config, None)
        .await
        .wrap_err("Failed to connect to Redis")?;
    info!("Connected to Redis successfully");

    let bus: Arc<dyn BusClient> = Arc::new(RedisBus::new(redis));
    let path = kind.entity_path(&bus_config);

    if kind.is_subscription() {
        bus.ensure_subscription(&bus_config.topic, kind.as_ref())
            .await
            .wrap_err_with(|| format!("Failed to create subscription '{}'", kind))?;
    }

    let config = processor_config(&args, &bus_config);
    info!(
        entity = %path,
        max_concurrent_calls = config.max_concurrent_calls,
        max_delivery_count = config.receiver.max_delivery_count,
        lock_duration = ?config.receiver.lock_duration,
        "Processor configuration loaded"
    );

    let processor = MessageProcessor::new(
        bus.clone(),
        path.clone(),
        TaskEventHandler::new(kind.side_effect()),
        config,
    );

    let (coordinator, shutdown_rx) = ShutdownCoordinator::new();
    let signal_handle = coordinator.clone();
    tokio::spawn(async move {
        signal_handle.wait_for_signal().await;
    });

    let health_state = HealthState::new(bus, app_info.name, app_info.version, path)
        .with_processor(processor.subscribe_state());
    let health_shutdown = coordinator.subscribe();
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, health_config, health_shutdown).await {
            error!(error = %e, "Health server failed");
        }
    });

    info!("{} worker started", kind);
    let result = processor.run(shutdown_rx).await;

    // A closed receiver ends the processor early; take the health server down too
    coordinator.shutdown();
    result.wrap_err("Message processor stopped with an error")?;

    info!("{} worker stopped", kind);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_args_from_flags() {
        temp_env::with_vars_unset(["WORKER_SUBSCRIPTION", "WORKER_MAX_CONCURRENT_CALLS"], || {
            let args =
                WorkerArgs::try_parse_from(["taskbus-worker", "--subscription", "audit"]).unwrap();
            assert_eq!(args.subscription, WorkerKind::Audit);
            assert_eq!(args.max_concurrent_calls, 1);
        });
    }

    #[test]
    fn test_args_from_env() {
        temp_env::with_vars(
            [
                ("WORKER_SUBSCRIPTION", Some("email")),
                ("WORKER_MAX_CONCURRENT_CALLS", Some("4")),
            ],
            || {
                let args = WorkerArgs::try_parse_from(["taskbus-worker"]).unwrap();
                assert_eq!(args.subscription, WorkerKind::Email);
                assert_eq!(args.max_concurrent_calls, 4);
            },
        );
    }

    #[test]
    fn test_unknown_subscription_is_rejected() {
        temp_env::with_var_unset("WORKER_SUBSCRIPTION", || {
            assert!(WorkerArgs::try_parse_from(["taskbus-worker", "-s", "billing"]).is_err());
            assert!(WorkerArgs::try_parse_from(["taskbus-worker"]).is_err());
        });
    }

    #[test]
    fn test_health_port_precedence() {
        temp_env::with_vars(
            [
                ("WORKER_HEALTH_PORT", Some("9101")),
                ("HEALTH_PORT", Some("9000")),
                ("HOST", None),
            ],
            || assert_eq!(health_server_config().unwrap().port, 9101),
        );
        temp_env::with_vars(
            [("WORKER_HEALTH_PORT", None), ("HEALTH_PORT", Some("9000"))],
            || assert_eq!(health_server_config().unwrap().port, 9000),
        );
        temp_env::with_vars_unset(["WORKER_HEALTH_PORT", "HEALTH_PORT"], || {
            assert_eq!(health_server_config().unwrap().port, 8082)
        });
    }

    #[test]
    fn test_processor_config_follows_settings() {
        let args = WorkerArgs {
            subscription: WorkerKind::Analytics,
            max_concurrent_calls: 0,
        };
        let bus = TaskBusConfig {
            max_delivery_count: 3,
            lock_duration: Duration::from_secs(5),
            ..TaskBusConfig::default()
        };

        let config = processor_config(&args, &bus);
        assert_eq!(config.max_concurrent_calls, 1);
        assert_eq!(config.receiver.max_delivery_count, 3);
        assert_eq!(config.receiver.lock_duration, Duration::from_secs(5));
    }
}
