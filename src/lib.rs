//! rebucket - bucket backfill orchestration
//!
//! Re-processes every object in a large object-storage container by
//! pagination: a strictly sequential orchestrator enumerates the container
//! in bounded pages, hands each discovered object to a durable work queue,
//! and independently scheduled workers consume one object at a time. The
//! two sides meet only at the queue: workers run fully in parallel with,
//! and independently of, later orchestrator iterations.
//!
//! The broker deliberately never retries. A message gets one delivery; if
//! it is not acknowledged before its visibility deadline, it moves to the
//! dead-letter queue for out-of-band triage. Fatal pagination errors take a
//! separate path: the failing state is published verbatim to a durable
//! notification channel before the run terminates in failure.

pub mod cli;
pub mod config;
pub mod loader;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod queue;
pub mod storage;
pub mod worker;

pub use config::{load_config, validate_config, BackfillConfig, ConfigError};
pub use loader::{Loader, LoaderConfig, LoaderError};
pub use models::{
    ErrorInfo, FailureRecord, MessageStatus, ObjectPointer, OrchestrationState, QueueMessage,
};
pub use notify::{FailureNotice, FailureSink, FailureTopic, NotifyError};
pub use orchestrator::{
    Event, LoadStep, OrchestrationError, Orchestrator, OrchestratorConfig, Phase, RunOutcome,
};
pub use queue::{Delivery, QueueConfig, QueueError, Receipt, SweepReport, WorkQueue};
pub use storage::{MemoryStore, ObjectStore, PutCondition, S3Config, S3Store, StorageError};
pub use worker::{ProcessError, ProcessOutcome, ProcessorConfig, RunnerConfig, WorkerPool};
