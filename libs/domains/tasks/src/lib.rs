//! Tasks Domain
//!
//! Task-created events on the bus: publishing them, consuming them, and
//! administering the messages that ended up dead-lettered.
//!
//! # Architecture
//!
//! ```text
//!  POST /api/tasks ──► TaskPublisher ──► topic ──► subscription ──► TaskEventHandler
//!                                          ▲                            │
//!                                          │ replay                     ▼ decode fails /
//!  /api/admin/deadletters ──► DeadLetterAdmin ◄── $deadletterqueue ◄── max deliveries
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_tasks::{DeadLetterAdmin, TaskBusConfig, TaskPublisher, TasksState};
//!
//! let config = TaskBusConfig::from_env()?;
//! let state = TasksState {
//!     publisher: TaskPublisher::new(bus.topic_sender(&config.topic).await?),
//!     admin: DeadLetterAdmin::new(bus.clone(), &config),
//! };
//! let api = domain_tasks::handlers::router(state);
//! ```

pub mod admin;
pub mod config;
pub mod consumer;
pub mod effects;
pub mod error;
pub mod handlers;
pub mod models;
pub mod publisher;

pub use admin::DeadLetterAdmin;
pub use config::TaskBusConfig;
pub use consumer::{DESERIALIZATION_FAILED, TaskEventHandler, TaskSideEffect};
pub use effects::WorkerKind;
pub use error::{TaskError, TaskResult};
pub use handlers::{TasksApiDoc, TasksState};
pub use models::{
    CreateTaskRequest, DeadLetterInspection, DeadLetterRecord, ReplayFailure, ReplayOutcome,
    TaskAcceptedResponse, TaskCreatedEvent,
};
pub use publisher::TaskPublisher;
