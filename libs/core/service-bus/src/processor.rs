//! Message processor: a receive loop that hands each message to a handler and
//! settles it according to the handler's verdict.
//!
//! Lifecycle: `Stopped -> Starting -> Running -> Stopping -> Stopped`.
//! The receiver is acquired in `Starting` and closed on every path out of
//! `Running`, whether the loop ends by shutdown, `stop()` or a closed receiver.
//!
//! Shutdown is checked between receives, so every message a receive returns
//! is handled and settled before the loop exits.

use crate::client::{BusClient, MessageReceiver};
use crate::config::ProcessorConfig;
use crate::entity::EntityPath;
use crate::error::{BusError, BusResult};
use crate::message::ReceivedMessage;
use crate::metrics::BusMetrics;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// How a handler wants a message settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalAction {
    /// Remove the message for good
    Complete,
    /// Release the lock so the message is redelivered
    Abandon,
    /// Park the message in the dead-letter sub-queue; retries cannot help
    DeadLetter { reason: String, description: String },
}

impl TerminalAction {
    pub fn dead_letter(reason: impl Into<String>, description: impl Into<String>) -> Self {
        TerminalAction::DeadLetter {
            reason: reason.into(),
            description: description.into(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalAction::Complete => "complete",
            TerminalAction::Abandon => "abandon",
            TerminalAction::DeadLetter { .. } => "dead_letter",
        }
    }
}

/// Where an error reported to [`MessageHandler::on_error`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorSource {
    Receive,
    Settle,
}

/// Business logic plugged into a [`MessageProcessor`].
///
/// # Example
///
/// ```rust,ignore
/// struct AuditHandler;
///
/// #[async_trait]
/// impl MessageHandler for AuditHandler {
///     async fn on_message(&self, message: &ReceivedMessage) -> TerminalAction {
///         match serde_json::from_slice::<AuditEntry>(&message.body) {
///             Ok(entry) => { write(entry).await; TerminalAction::Complete }
///             Err(e) => TerminalAction::dead_letter("DeserializationFailed", e.to_string()),
///         }
///     }
///
///     fn name(&self) -> &'static str {
///         "audit"
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Decide the fate of one message. Must not panic.
    async fn on_message(&self, message: &ReceivedMessage) -> TerminalAction;

    /// Receive and settlement failures. The loop keeps going after this returns.
    async fn on_error(&self, error: &BusError, source: ErrorSource) {
        warn!(error = %error, source = %source, handler = self.name(), "Message processor error");
    }

    fn name(&self) -> &'static str;
}

/// Lifecycle of a [`MessageProcessor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
pub enum ProcessorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Receives from one entity and dispatches to a [`MessageHandler`].
///
/// At most `max_concurrent_calls` messages are in flight. Shutdown stops
/// further receives, lets in-flight messages settle, then closes the receiver.
/// A stop takes effect within `max_wait_time`.
pub struct MessageProcessor<H: MessageHandler> {
    client: Arc<dyn BusClient>,
    path: EntityPath,
    handler: Arc<H>,
    config: ProcessorConfig,
    metrics: BusMetrics,
    state: watch::Sender<ProcessorState>,
    stop: watch::Sender<bool>,
}

impl<H: MessageHandler> MessageProcessor<H> {
    pub fn new(
        client: Arc<dyn BusClient>,
        path: EntityPath,
        handler: H,
        config: ProcessorConfig,
    ) -> Self {
        let metrics = BusMetrics::new(path.label(), handler.name());
        Self {
            client,
            path,
            handler: Arc::new(handler),
            config,
            metrics,
            state: watch::Sender::new(ProcessorState::Stopped),
            stop: watch::Sender::new(false),
        }
    }

    pub fn entity_path(&self) -> &EntityPath {
        &self.path
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn state(&self) -> ProcessorState {
        *self.state.borrow()
    }

    /// Follow lifecycle transitions (health endpoints use this)
    pub fn subscribe_state(&self) -> watch::Receiver<ProcessorState> {
        self.state.subscribe()
    }

    /// Ask a running processor to stop. Safe to call any number of times,
    /// in any state.
    pub fn stop(&self) {
        let state = self.state();
        if matches!(state, ProcessorState::Stopped | ProcessorState::Stopping) {
            debug!(state = %state, "Stop requested, processor not running");
            return;
        }
        self.stop.send_replace(true);
    }

    fn transition(&self, next: ProcessorState) {
        let previous = self.state.send_replace(next);
        debug!(entity = %self.path, from = %previous, to = %next, "Processor state change");
    }

    /// Run until `shutdown` turns true, [`stop`](Self::stop) is called, or the
    /// receiver reports itself closed.
    ///
    /// Only a failure to acquire the receiver, or [`BusError::Closed`], is
    /// returned. Every other receive error is reported to the handler and
    /// retried after a backoff. Settlement failures never end the loop.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> BusResult<()> {
        if self.state() != ProcessorState::Stopped {
            return Err(BusError::Config(format!(
                "processor for '{}' is already {}",
                self.path,
                self.state()
            )));
        }

        self.stop.send_replace(false);
        self.transition(ProcessorState::Starting);

        let receiver = match self
            .client
            .receiver(self.path.clone(), self.config.receiver.clone())
            .await
        {
            Ok(receiver) => receiver,
            Err(e) => {
                error!(entity = %self.path, error = %e, "Failed to create receiver");
                self.transition(ProcessorState::Stopped);
                return Err(e);
            }
        };

        info!(
            entity = %self.path,
            handler = self.handler.name(),
            max_concurrent_calls = self.config.max_concurrent_calls,
            lock_duration_secs = self.config.receiver.lock_duration.as_secs(),
            max_delivery_count = self.config.receiver.max_delivery_count,
            "Message processor running"
        );
        self.transition(ProcessorState::Running);

        let result = self.receive_loop(receiver.as_ref(), shutdown).await;

        self.transition(ProcessorState::Stopping);
        if let Err(e) = receiver.close().await {
            warn!(entity = %self.path, error = %e, "Failed to close receiver");
        }
        self.transition(ProcessorState::Stopped);

        info!(entity = %self.path, "Message processor stopped");
        result
    }

    async fn receive_loop(
        &self,
        receiver: &dyn MessageReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) -> BusResult<()> {
        let mut stop = self.stop.subscribe();
        let mut consecutive_errors: u32 = 0;

        loop {
            if *shutdown.borrow() || *stop.borrow() {
                info!(entity = %self.path, "Received shutdown signal, stopping processor");
                return Ok(());
            }

            // Not raced against shutdown: a cancelled read could already have
            // locked entries. `max_wait_time` bounds how long a stop waits.
            let received = receiver
                .receive(self.config.max_concurrent_calls, self.config.max_wait_time)
                .await;

            match received {
                Ok(messages) => {
                    if consecutive_errors > 0 {
                        info!(
                            entity = %self.path,
                            "Receive recovered after {} errors", consecutive_errors
                        );
                        consecutive_errors = 0;
                    }

                    futures::stream::iter(messages)
                        .for_each_concurrent(self.config.max_concurrent_calls, |message| {
                            self.dispatch(receiver, message)
                        })
                        .await;
                }
                Err(BusError::Closed) => {
                    error!(entity = %self.path, "Receiver closed underneath the processor");
                    self.handler
                        .on_error(&BusError::Closed, ErrorSource::Receive)
                        .await;
                    return Err(BusError::Closed);
                }
                Err(e) => {
                    let category = e.category();
                    self.metrics.receive_error(category.as_ref());
                    self.handler.on_error(&e, ErrorSource::Receive).await;

                    consecutive_errors += 1;
                    let backoff = category.backoff_delay(consecutive_errors);
                    if e.is_transient() {
                        warn!(
                            entity = %self.path,
                            error = %e,
                            consecutive_errors,
                            backoff_secs = backoff.as_secs(),
                            "Receive failed, backing off"
                        );
                    } else {
                        error!(
                            entity = %self.path,
                            error = %e,
                            consecutive_errors,
                            "Receive failed, retrying"
                        );
                    }

                    tokio::select! {
                        _ = stop_requested(&mut shutdown, &mut stop) => {}
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }

    async fn dispatch(&self, receiver: &dyn MessageReceiver, message: ReceivedMessage) {
        self.metrics.message_received();
        let started = Instant::now();
        let message_id = message.display_id();

        debug!(
            entity = %self.path,
            message_id = %message_id,
            delivery_count = message.delivery_count,
            "Handling message"
        );

        let action = self.handler.on_message(&message).await;

        let settled = match &action {
            TerminalAction::Complete => receiver.complete(&message).await,
            TerminalAction::Abandon => receiver.abandon(&message).await,
            TerminalAction::DeadLetter {
                reason,
                description,
            } => receiver.dead_letter(&message, reason, description).await,
        };

        match settled {
            Ok(()) => {
                self.metrics.message_settled(action.as_str(), started.elapsed());
                debug!(
                    entity = %self.path,
                    message_id = %message_id,
                    action = action.as_str(),
                    "Message settled"
                );
            }
            Err(e) => {
                // The lock runs out and the broker redelivers
                self.metrics.settle_error(action.as_str());
                warn!(
                    entity = %self.path,
                    message_id = %message_id,
                    action = action.as_str(),
                    error = %e,
                    "Failed to settle message"
                );
                self.handler.on_error(&e, ErrorSource::Settle).await;
            }
        }
    }
}

/// Resolves once either flag turns true. A dropped sender never resolves.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>, stop: &mut watch::Receiver<bool>) {
    async fn flag(rx: &mut watch::Receiver<bool>) {
        if rx.wait_for(|set| *set).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    tokio::select! {
        _ = flag(shutdown) => {}
        _ = flag(stop) => {}
    }
}
