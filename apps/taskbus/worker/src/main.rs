//! Task Bus Worker - Entry Point
//!
//! Consumes task-created events from one subscription (or the tasks queue).

use clap::Parser;
use taskbus_worker::WorkerArgs;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    core_config::tracing::install_color_eyre();
    taskbus_worker::run(WorkerArgs::parse()).await
}
