//! Message consumers.
//!
//! A worker invocation processes exactly one message: resolve the pointer,
//! copy the object to its destination, optionally delete the source, and
//! acknowledge the message only if every step succeeded. An unacknowledged
//! message is dead-lettered by the broker after its single allowed delivery;
//! the worker never retries and never touches orchestrator state.

pub mod process;
pub mod runner;

pub use process::{
    destination_key, process_pointer, process_pointer_with_budget, ProcessError, ProcessOutcome,
    ProcessorConfig,
};
pub use runner::{
    shutdown_signal, wait_for_shutdown_signal, RunnerConfig, WorkerPool, WorkerReport,
};
