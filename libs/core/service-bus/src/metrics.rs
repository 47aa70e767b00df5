//! Prometheus metrics for message processors

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder.
///
/// Call this once at startup. Later calls return the handle installed first.
pub fn init_metrics() -> Result<&'static PrometheusHandle, BuildError> {
    PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder()?;
        info!("Prometheus metrics initialized");
        Ok(handle)
    })
}

pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Metrics for one processor, labelled by entity and handler
#[derive(Clone)]
pub struct BusMetrics {
    entity: String,
    handler: String,
}

impl BusMetrics {
    pub fn new(entity: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            handler: handler.into(),
        }
    }

    pub fn message_received(&self) {
        counter!(
            "service_bus_messages_received_total",
            "entity" => self.entity.clone(),
            "handler" => self.handler.clone()
        )
        .increment(1);
    }

    /// Record how a message was settled (`complete`, `abandon`, `dead_letter`)
    pub fn message_settled(&self, action: &'static str, duration: Duration) {
        counter!(
            "service_bus_messages_settled_total",
            "entity" => self.entity.clone(),
            "handler" => self.handler.clone(),
            "action" => action
        )
        .increment(1);

        histogram!(
            "service_bus_handler_duration_seconds",
            "entity" => self.entity.clone(),
            "handler" => self.handler.clone()
        )
        .record(duration.as_secs_f64());
    }

    pub fn receive_error(&self, category: &str) {
        counter!(
            "service_bus_receive_errors_total",
            "entity" => self.entity.clone(),
            "category" => category.to_string()
        )
        .increment(1);
    }

    pub fn settle_error(&self, action: &'static str) {
        counter!(
            "service_bus_settle_errors_total",
            "entity" => self.entity.clone(),
            "handler" => self.handler.clone(),
            "action" => action
        )
        .increment(1);
    }
}
