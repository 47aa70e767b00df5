//! Shared application state.

use service_bus::BusClient;
use std::sync::Arc;

/// State for the readiness route. The domain handlers carry their own.
#[derive(Clone)]
pub struct AppState {
    pub config: crate::config::Config,
    /// Queue backend, shared with the publisher and the admin component
    pub bus: Arc<dyn BusClient>,
}
