//! Worker pool with polling loop and graceful shutdown.
//!
//! Each consumer in the pool is an isolated execution context processing one
//! message at a time: receive, process, acknowledge on success only. A
//! failed message is simply left unacknowledged for the broker to
//! dead-letter. Alongside the consumers runs a periodic visibility sweeper.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::Rng;
use tokio::signal;
use tokio::sync::watch;
use uuid::Uuid;

use crate::queue::WorkQueue;
use crate::storage::ObjectStore;

use super::process::{process_pointer_with_budget, ProcessorConfig};

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Number of concurrent consumers.
    pub concurrency: usize,
    /// Initial poll interval when no messages are found.
    pub poll_interval: Duration,
    /// Maximum poll interval (backoff cap).
    pub max_poll_interval: Duration,
    /// Backoff multiplier when no messages are found.
    pub backoff_multiplier: f64,
    /// How often the embedded sweeper runs.
    pub sweep_interval: Duration,
    /// Grace period for in-flight messages on shutdown.
    pub shutdown_grace_period: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(100),
            max_poll_interval: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            sweep_interval: Duration::from_secs(30),
            shutdown_grace_period: Duration::from_secs(30),
        }
    }
}

/// Lifetime counters for a pool run.
#[derive(Debug, Default, Clone)]
pub struct WorkerReport {
    /// Messages processed and acknowledged.
    pub processed: u64,
    /// Messages whose processing failed (left for dead-lettering).
    pub failed: u64,
}

/// Creates a shutdown signal channel.
///
/// The sender triggers shutdown by sending `true`; consumers watch the
/// receiver between messages.
#[must_use]
pub fn shutdown_signal() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Listens for SIGINT/SIGTERM and triggers shutdown.
///
/// Blocks until a signal is received, then sends `true` through the channel.
pub async fn wait_for_shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    if let Err(e) = shutdown_tx.send(true) {
        tracing::error!("Failed to send shutdown signal: {}", e);
    }
}

/// A pool of independent message consumers plus a visibility sweeper.
pub struct WorkerPool<S> {
    queue: WorkQueue<S>,
    processor: ProcessorConfig,
    config: RunnerConfig,
}

impl<S: ObjectStore + 'static> WorkerPool<S> {
    /// Creates a pool consuming the given queue.
    #[must_use]
    pub const fn new(
        queue: WorkQueue<S>,
        processor: ProcessorConfig,
        config: RunnerConfig,
    ) -> Self {
        Self {
            queue,
            processor,
            config,
        }
    }

    /// Runs consumers until shutdown is signalled, then drains in-flight
    /// work within the grace period.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> WorkerReport {
        let processed = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicU64::new(0));

        let pool_id = short_id();
        tracing::info!(
            pool_id = %pool_id,
            concurrency = self.config.concurrency,
            "Starting worker pool"
        );

        let sweeper = tokio::spawn(sweeper_loop(
            self.queue.clone(),
            self.config.sweep_interval,
            shutdown.clone(),
        ));

        let mut consumers = Vec::with_capacity(self.config.concurrency);
        for index in 0..self.config.concurrency {
            consumers.push(tokio::spawn(consumer_loop(
                format!("worker-{pool_id}-{index}"),
                self.queue.clone(),
                self.processor.clone(),
                self.config.clone(),
                shutdown.clone(),
                Arc::clone(&processed),
                Arc::clone(&failed),
            )));
        }

        // Wait for the shutdown signal, then give in-flight consumers the
        // grace period to drain.
        let mut shutdown_watch = shutdown.clone();
        if !*shutdown_watch.borrow() {
            let _ = shutdown_watch.changed().await;
        }
        let drained =
            tokio::time::timeout(self.config.shutdown_grace_period, join_all(&mut consumers))
                .await;
        if drained.is_err() {
            tracing::warn!("Shutdown grace period elapsed; aborting in-flight consumers");
            for consumer in &consumers {
                consumer.abort();
            }
        }
        sweeper.abort();

        let report = WorkerReport {
            processed: processed.load(Ordering::SeqCst),
            failed: failed.load(Ordering::SeqCst),
        };
        tracing::info!(
            processed = report.processed,
            failed = report.failed,
            "Worker pool stopped"
        );
        report
    }
}

/// One consumer: receive, process within the time budget, acknowledge on
/// success only.
async fn consumer_loop<S: ObjectStore>(
    worker_id: String,
    queue: WorkQueue<S>,
    processor: ProcessorConfig,
    config: RunnerConfig,
    mut shutdown: watch::Receiver<bool>,
    processed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
) {
    let mut idle_backoff = config.poll_interval;

    loop {
        if *shutdown.borrow() {
            break;
        }

        match queue.receive().await {
            Ok(Some(delivery)) => {
                idle_backoff = config.poll_interval;
                let message_id = delivery.message.id;
                let pointer = delivery.message.pointer.clone();

                match process_pointer_with_budget(queue.store().as_ref(), &pointer, &processor)
                    .await
                {
                    Ok(outcome) => match queue.acknowledge(&delivery.receipt).await {
                        Ok(()) => {
                            processed.fetch_add(1, Ordering::SeqCst);
                            tracing::info!(
                                worker_id = %worker_id,
                                message_id = %message_id,
                                pointer = %pointer,
                                ?outcome,
                                "Processed message"
                            );
                        }
                        Err(err) => {
                            // Processing finished but the broker already
                            // reclaimed the message; it will be dead-lettered
                            // despite the late success.
                            failed.fetch_add(1, Ordering::SeqCst);
                            tracing::warn!(
                                worker_id = %worker_id,
                                message_id = %message_id,
                                error = %err,
                                "Processed but could not acknowledge"
                            );
                        }
                    },
                    Err(err) => {
                        // Leave the message unacknowledged: with a single
                        // allowed delivery it goes straight to the
                        // dead-letter queue, and this consumer moves on.
                        failed.fetch_add(1, Ordering::SeqCst);
                        tracing::warn!(
                            worker_id = %worker_id,
                            message_id = %message_id,
                            pointer = %pointer,
                            error = %err,
                            "Processing failed; message left for dead-lettering"
                        );
                    }
                }
            }
            Ok(None) => {
                sleep_or_shutdown(jittered(idle_backoff), &mut shutdown).await;
                idle_backoff = next_backoff(idle_backoff, &config);
            }
            Err(err) => {
                tracing::warn!(worker_id = %worker_id, error = %err, "Receive failed");
                sleep_or_shutdown(jittered(config.max_poll_interval), &mut shutdown).await;
            }
        }
    }
}

/// Periodic visibility/retention sweep.
async fn sweeper_loop<S: ObjectStore>(
    queue: WorkQueue<S>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                match queue.sweep().await {
                    Ok(report) if report.dead_lettered > 0 || report.requeued > 0 || report.purged > 0 => {
                        tracing::info!(
                            dead_lettered = report.dead_lettered,
                            requeued = report.requeued,
                            purged = report.purged,
                            "Sweep pass"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "Sweep failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

fn short_id() -> String {
    let uuid = Uuid::new_v4().to_string();
    uuid.split('-').next().unwrap_or("pool").to_string()
}

fn jittered(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.8..1.2);
    base.mul_f64(factor)
}

fn next_backoff(current: Duration, config: &RunnerConfig) -> Duration {
    current
        .mul_f64(config.backoff_multiplier)
        .min(config.max_poll_interval)
}

async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        () = tokio::time::sleep(duration) => {}
        _ = shutdown.changed() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_to_the_cap() {
        let config = RunnerConfig::default();
        let mut backoff = config.poll_interval;
        for _ in 0..20 {
            backoff = next_backoff(backoff, &config);
        }
        assert_eq!(backoff, config.max_poll_interval);
    }

    #[test]
    fn jitter_stays_near_the_base() {
        let base = Duration::from_millis(100);
        for _ in 0..100 {
            let sample = jittered(base);
            assert!(sample >= Duration::from_millis(80));
            assert!(sample <= Duration::from_millis(120));
        }
    }
}
