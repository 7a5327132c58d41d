//! Data model for the backfill system.

pub mod message;
pub mod pointer;
pub mod state;

pub use message::{MessageStatus, QueueMessage};
pub use pointer::ObjectPointer;
pub use state::{ErrorInfo, FailureRecord, OrchestrationState};
