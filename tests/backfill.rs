//! End-to-end backfill scenarios against the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;

use rebucket::loader::{Loader, LoaderConfig, LoaderError};
use rebucket::notify::{FailureTopic, DEFAULT_SUBSCRIPTION};
use rebucket::orchestrator::{LoadStep, Orchestrator, OrchestratorConfig, RunOutcome};
use rebucket::queue::{QueueConfig, WorkQueue};
use rebucket::storage::{MemoryStore, ObjectStore, PutCondition};
use rebucket::worker::{
    process_pointer, shutdown_signal, ProcessorConfig, RunnerConfig, WorkerPool,
};
use rebucket::{FailureRecord, OrchestrationState};

const SOURCE: &str = "data";
const QUEUE: &str = "backfill";

async fn seed_source(store: &MemoryStore, count: usize) {
    for i in 0..count {
        store
            .put_object(
                SOURCE,
                &format!("logs/{i:02}.gz"),
                format!("payload-{i}").into_bytes(),
                PutCondition::None,
            )
            .await
            .unwrap();
    }
}

fn build_queue(store: &Arc<MemoryStore>) -> WorkQueue<MemoryStore> {
    WorkQueue::new(
        Arc::clone(store),
        QueueConfig::new(QUEUE).with_visibility_timeout(Duration::minutes(90)),
    )
}

fn build_loader(store: &Arc<MemoryStore>, page_size: i32) -> Loader<MemoryStore> {
    Loader::new(
        Arc::clone(store),
        build_queue(store),
        LoaderConfig::new(SOURCE)
            .with_prefix("logs/")
            .with_page_size(page_size),
    )
}

/// Drains the queue synchronously: receive, process, acknowledge on success
/// only, until no message is available.
async fn drain_queue(
    queue: &WorkQueue<MemoryStore>,
    store: &MemoryStore,
    processor: &ProcessorConfig,
) -> (usize, usize) {
    let mut succeeded = 0;
    let mut failed = 0;

    while let Some(delivery) = queue.receive().await.unwrap() {
        match process_pointer(store, &delivery.message.pointer, processor).await {
            Ok(_) => {
                queue.acknowledge(&delivery.receipt).await.unwrap();
                succeeded += 1;
            }
            Err(_) => {
                // Left unacknowledged for dead-lettering.
                failed += 1;
            }
        }
    }

    (succeeded, failed)
}

#[tokio::test]
async fn happy_path_three_pages_all_workers_succeed() {
    let store = Arc::new(MemoryStore::new());
    seed_source(&store, 5).await;

    // Pages of {2, 2, 1} with page size 2.
    let loader = build_loader(&store, 2);
    let topic = FailureTopic::new(Arc::clone(&store), QUEUE);
    let orchestrator = Orchestrator::new(loader, topic, OrchestratorConfig::default());

    let outcome = orchestrator.run(None).await.unwrap();
    let RunOutcome::Success { state } = outcome else {
        panic!("expected success");
    };
    assert_eq!(state.pages_loaded, 3);
    assert_eq!(state.objects_enqueued, 5);
    assert!(state.cursor.is_none());

    // Fan-out completeness: one message per listed object.
    assert_eq!(store.count(QUEUE, "queue/messages/"), 5);

    let queue = build_queue(&store);
    let (succeeded, failed) = drain_queue(&queue, &store, &ProcessorConfig::default()).await;
    assert_eq!(succeeded, 5);
    assert_eq!(failed, 0);

    // All copies landed, the queue drained, and nothing was dead-lettered.
    assert_eq!(store.count(SOURCE, "logs_processed/"), 5);
    assert_eq!(store.count(QUEUE, "queue/messages/"), 0);
    store.advance(Duration::minutes(91));
    queue.sweep().await.unwrap();
    assert!(queue.dead_letters(10).await.unwrap().is_empty());
}

/// Delegates to the real loader but poisons the listing for one specific
/// call, simulating a pagination failure mid-run.
struct FailingOnCall {
    inner: Loader<MemoryStore>,
    store: Arc<MemoryStore>,
    fail_on_call: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl LoadStep for FailingOnCall {
    async fn load(&self, state: &OrchestrationState) -> Result<OrchestrationState, LoaderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on_call {
            self.store.inject_list_error("listing unavailable");
        }
        self.inner.load_page(state).await
    }
}

#[tokio::test]
async fn fatal_pagination_failure_is_notified_and_earlier_pages_still_process() {
    let store = Arc::new(MemoryStore::new());
    seed_source(&store, 6).await;

    let failing = FailingOnCall {
        inner: build_loader(&store, 2),
        store: Arc::clone(&store),
        fail_on_call: 3,
        calls: AtomicUsize::new(0),
    };
    let topic = FailureTopic::new(Arc::clone(&store), QUEUE);
    let orchestrator = Orchestrator::new(failing, topic, OrchestratorConfig::default());

    let outcome = orchestrator.run(None).await.unwrap();
    let RunOutcome::Failure { record } = outcome else {
        panic!("expected failure");
    };

    // The failing invocation's cursor and error are in the record.
    assert_eq!(record.state.pages_loaded, 2);
    let failing_cursor = record.state.cursor.clone().expect("cursor present");
    assert_eq!(record.error.kind, "list_failed");
    assert!(record.error.message.contains("listing unavailable"));

    // Exactly one durable notice, carrying the payload verbatim.
    let notices = topic_notices(&store).await;
    assert_eq!(notices.len(), 1);
    assert!(notices[0].contains(&failing_cursor));
    let decoded: FailureRecord = serde_json::from_str(&notices[0]).unwrap();
    assert_eq!(decoded, record);

    // The four objects from the first two pages were enqueued before the
    // failure and are processed independently of it.
    let queue = build_queue(&store);
    let (succeeded, failed) = drain_queue(&queue, &store, &ProcessorConfig::default()).await;
    assert_eq!(succeeded, 4);
    assert_eq!(failed, 0);
    assert_eq!(store.count(SOURCE, "logs_processed/"), 4);
}

async fn topic_notices(store: &Arc<MemoryStore>) -> Vec<String> {
    let topic = FailureTopic::new(Arc::clone(store), QUEUE);
    topic
        .notices(DEFAULT_SUBSCRIPTION, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|notice| notice.message)
        .collect()
}

#[tokio::test]
async fn one_bad_object_dead_letters_without_blocking_the_rest() {
    let store = Arc::new(MemoryStore::new());
    seed_source(&store, 3).await;

    let loader = build_loader(&store, 10);
    let topic = FailureTopic::new(Arc::clone(&store), QUEUE);
    Orchestrator::new(loader, topic, OrchestratorConfig::default())
        .run(None)
        .await
        .unwrap();

    // Break one object: gone from the source with no processed copy.
    store.delete_object(SOURCE, "logs/01.gz").await.unwrap();

    let queue = build_queue(&store);
    let (succeeded, failed) = drain_queue(&queue, &store, &ProcessorConfig::default()).await;
    assert_eq!(succeeded, 2);
    assert_eq!(failed, 1);

    // The failed message dead-letters exactly once after its visibility
    // deadline, and is never redelivered.
    store.advance(Duration::minutes(91));
    let report = queue.sweep().await.unwrap();
    assert_eq!(report.dead_lettered, 1);

    let dead = queue.dead_letters(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].pointer.key, "logs/01.gz");
    assert!(queue.receive().await.unwrap().is_none());

    let report = queue.sweep().await.unwrap();
    assert_eq!(report.dead_lettered, 0);
    assert_eq!(queue.dead_letters(10).await.unwrap().len(), 1);

    // The two healthy objects were unaffected.
    assert_eq!(store.count(SOURCE, "logs_processed/"), 2);
}

#[tokio::test]
async fn worker_pool_drains_the_queue_and_reports() {
    let store = Arc::new(MemoryStore::new());
    seed_source(&store, 3).await;

    let loader = build_loader(&store, 10);
    let topic = FailureTopic::new(Arc::clone(&store), QUEUE);
    Orchestrator::new(loader, topic, OrchestratorConfig::default())
        .run(None)
        .await
        .unwrap();

    let pool = WorkerPool::new(
        build_queue(&store),
        ProcessorConfig::default(),
        RunnerConfig {
            concurrency: 2,
            poll_interval: StdDuration::from_millis(5),
            max_poll_interval: StdDuration::from_millis(20),
            sweep_interval: StdDuration::from_millis(50),
            ..RunnerConfig::default()
        },
    );

    let (shutdown_tx, shutdown_rx) = shutdown_signal();
    let pool_task = tokio::spawn(async move { pool.run(shutdown_rx).await });

    // Wait for the pool to finish the backlog, then stop it.
    for _ in 0..200 {
        if store.count(SOURCE, "logs_processed/") == 3
            && store.count(QUEUE, "queue/messages/") == 0
        {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    shutdown_tx.send(true).unwrap();

    let report = pool_task.await.unwrap();
    assert_eq!(report.processed, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(store.count(SOURCE, "logs_processed/"), 3);
}
