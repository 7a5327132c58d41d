//! rebucket - bucket backfill orchestrator

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use rebucket::cli::{Cli, Commands};
use rebucket::config::{load_config, validate_config};
use rebucket::loader::Loader;
use rebucket::notify::{FailureTopic, DEFAULT_SUBSCRIPTION};
use rebucket::orchestrator::{Orchestrator, RunOutcome};
use rebucket::queue::{QueueError, WorkQueue};
use rebucket::storage::{S3Store, StorageError};
use rebucket::worker::{shutdown_signal, wait_for_shutdown_signal, RunnerConfig, WorkerPool};

/// Displays an error with rich context and suggestions if available.
fn display_error(err: &anyhow::Error) {
    for cause in err.chain() {
        if let Some(storage_err) = cause.downcast_ref::<StorageError>() {
            eprintln!("{}", storage_err.display_rich());
            return;
        }
        if let Some(queue_err) = cause.downcast_ref::<QueueError>() {
            eprintln!("{}", queue_err.display_rich());
            return;
        }
    }

    eprintln!("Error: {}", err);
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(e) = run().await {
        display_error(&e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse_args();

    let config = load_config(cli.config.as_deref())?;
    let errors = validate_config(&config);
    if !errors.is_empty() {
        eprintln!("Configuration errors:");
        for error in &errors {
            eprintln!("  - {}", error);
        }
        std::process::exit(1);
    }

    let store = Arc::new(S3Store::new(config.s3_config()).await?);
    let queue = WorkQueue::new(Arc::clone(&store), config.queue_config());

    match cli.command {
        Commands::Run { cursor } => {
            let loader = Loader::new(Arc::clone(&store), queue.clone(), config.loader_config());
            let topic = FailureTopic::new(Arc::clone(&store), config.queue_container.clone());
            let orchestrator = Orchestrator::new(loader, topic, config.orchestrator_config());

            match orchestrator.run(cursor).await? {
                RunOutcome::Success { state } => {
                    println!(
                        "Backfill enumeration complete: {} objects across {} pages",
                        state.objects_enqueued, state.pages_loaded
                    );
                }
                RunOutcome::Failure { record } => {
                    eprintln!(
                        "Backfill failed at cursor {}: {}",
                        record.state.cursor.as_deref().unwrap_or("<start>"),
                        record.error
                    );
                    eprintln!("A failure notice was published for triage.");
                    std::process::exit(1);
                }
            }
        }

        Commands::Work { concurrency } => {
            let runner_config = RunnerConfig {
                concurrency: concurrency.unwrap_or(config.concurrency),
                ..RunnerConfig::default()
            };
            let pool = WorkerPool::new(queue, config.processor_config(), runner_config);

            let (shutdown_tx, shutdown_rx) = shutdown_signal();
            tokio::spawn(wait_for_shutdown_signal(shutdown_tx));

            let report = pool.run(shutdown_rx).await;
            println!(
                "Processed {} messages ({} failed)",
                report.processed, report.failed
            );
        }

        Commands::Dlq { limit, json } => {
            let dead = queue.dead_letters(limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&dead)?);
            } else if dead.is_empty() {
                println!("Dead-letter queue is empty");
            } else {
                for message in &dead {
                    println!(
                        "{} | {} | deliveries: {} | {}",
                        message.id,
                        message.pointer,
                        message.receive_count,
                        message.last_error.as_deref().unwrap_or("-")
                    );
                }
                println!("Total: {} dead-lettered messages", dead.len());
            }
        }

        Commands::Failures { limit, json } => {
            let topic = FailureTopic::new(Arc::clone(&store), config.queue_container.clone());
            let notices = topic.notices(DEFAULT_SUBSCRIPTION, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&notices)?);
            } else if notices.is_empty() {
                println!("No failure notices");
            } else {
                for notice in &notices {
                    println!("[{}] {}", notice.published_at, notice.message);
                }
            }
        }
    }

    Ok(())
}
