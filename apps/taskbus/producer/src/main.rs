//! Console producer: reads a task title and publishes one task-created event
//! to the tasks queue.

use clap::Parser;
use core_config::tracing::{init_tracing, install_color_eyre};
use core_config::{Environment, FromEnv};
use database::redis::RedisConfig;
use domain_tasks::{TaskBusConfig, TaskPublisher};
use eyre::WrapErr;
use service_bus::{BusClient, RedisBus};
use tokio::io::BufReader;
use tracing::info;

mod prompt;

const DEFAULT_DESCRIPTION: &str =
    "This task was created to demonstrate sending messages through the task bus.";

#[derive(Parser)]
#[command(name = "taskbus-producer")]
#[command(about = "Publish a task-created event to the tasks queue")]
struct Cli {
    /// Title to publish; prompts when omitted
    #[arg(short, long)]
    title: Option<String>,

    #[arg(short, long, default_value = DEFAULT_DESCRIPTION)]
    description: String,

    #[arg(short, long, default_value = "John Doe")]
    assigned_to: String,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    install_color_eyre();
    init_tracing(&Environment::from_env());

    let cli = Cli::parse();
    let bus_config = TaskBusConfig::from_env()?;
    let redis_config = RedisConfig::from_env()?;

    let title = match cli.title.filter(|t| !t.trim().is_empty()) {
        Some(title) => title,
        None => {
            let mut stdin = BufReader::new(tokio::io::stdin());
            let mut stdout = tokio::io::stdout();
            match prompt::read_title(&mut stdin, &mut stdout).await? {
                Some(title) => title,
                None => {
                    info!("No title entered, nothing sent");
                    return Ok(());
                }
            }
        }
    };

    let redis = database::redis::connect_from_config_with_retry(&redis_config, None)
        .await
        .wrap_err("Failed to connect to Redis")?;
    let bus = RedisBus::new(redis);
    let publisher = TaskPublisher::new(bus.queue_sender(&bus_config.queue).await?);

    info!(queue = %publisher.entity(), "Sending task-created event");
    let event = publisher
        .publish(&title, &cli.description, &cli.assigned_to)
        .await
        .wrap_err("Error sending message")?;

    println!("Sent TaskCreatedEvent with task_id: {}", event.task_id);
    Ok(())
}
