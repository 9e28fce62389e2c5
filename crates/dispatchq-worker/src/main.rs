use dispatchq_broker::MemoryBroker;
use dispatchq_core::{ArgKind, Task, TaskArgument};
use dispatchq_worker::handler::{EchoHandler, SleepHandler};
use dispatchq_worker::{Server, TaskConfig, WorkerConfig};

use clap::Parser;
use std::collections::HashMap;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "dq-worker")]
#[command(about = "Task queue worker demo against an in-process broker", long_about = None)]
struct Args {
    /// Worker name (also used as the consumer tag)
    #[arg(long, default_value = "demo-worker")]
    name: String,

    /// Queue to consume
    #[arg(short, long, default_value = "demo")]
    queue: String,

    /// Concurrency limit (0 uses the default of 3)
    #[arg(short, long, default_value = "0")]
    limit: u16,

    /// Path to a YAML worker configuration file
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = if let Some(path) = &args.config {
        WorkerConfig::from_file(path)?
    } else {
        let mut config = WorkerConfig::new(args.name, args.queue);
        config.limit = args.limit;
        config
    };

    let broker = MemoryBroker::new();
    let server = Server::new(Arc::new(broker.clone()));

    let mut tasks = HashMap::new();
    tasks.insert(
        "echo".to_string(),
        TaskConfig::new(Arc::new(EchoHandler), vec![ArgKind::Str, ArgKind::Str])
            .with_task_uuid_as_first_arg(),
    );
    tasks.insert(
        "sleep".to_string(),
        TaskConfig::new(Arc::new(SleepHandler::new(5_000)), vec![]).with_timeout(2),
    );

    let worker = server.new_worker(&config, tasks).await?;
    worker.start(server.connection()).await?;
    tracing::info!(
        "Worker {} consuming {} (limit {})",
        worker.name(),
        worker.queue(),
        worker.limit()
    );

    // Seed a few demonstration tasks.
    for i in 0..3 {
        let task = Task {
            name: "echo".to_string(),
            uuid: uuid::Uuid::new_v4().to_string(),
            args: vec![TaskArgument::new(
                "string",
                serde_json::json!(format!("message {}", i)),
            )],
        };
        broker.publish_to_queue(worker.queue(), task.to_bytes()?)?;
    }
    let slow = Task {
        name: "sleep".to_string(),
        uuid: uuid::Uuid::new_v4().to_string(),
        args: vec![],
    };
    broker.publish_to_queue(worker.queue(), slow.to_bytes()?)?;

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("Received shutdown signal");
    server.close().await;

    Ok(())
}
