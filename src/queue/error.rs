//! Rich error types for work queue operations.

use thiserror::Error;
use uuid::Uuid;

use crate::storage::StorageError;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The message no longer exists in the queue.
    #[error("Message not found: {message_id}")]
    MessageNotFound {
        /// The ID of the message that was not found.
        message_id: Uuid,
    },

    /// The receipt no longer matches the message.
    ///
    /// The broker moved the message on (typically dead-lettered it after the
    /// visibility deadline elapsed) between delivery and acknowledgement.
    #[error("Receipt for message {message_id} is no longer valid")]
    ReceiptSuperseded {
        /// The ID of the message whose receipt was superseded.
        message_id: Uuid,
    },

    /// A stored message could not be decoded.
    #[error("Message {message_id} is corrupt: {detail}")]
    Corrupt {
        /// The ID of the corrupt message.
        message_id: Uuid,
        /// What went wrong while decoding.
        detail: String,
    },

    /// A storage error occurred.
    #[error("{0}")]
    Storage(#[from] StorageError),

    /// Failed to serialize or deserialize a message envelope.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueueError {
    /// Returns a helpful suggestion for resolving this error.
    #[must_use]
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::MessageNotFound { .. } => {
                "The message may already have been acknowledged or purged by \
                 retention. Check the dead-letter queue if you expected it to \
                 still exist."
            }
            Self::ReceiptSuperseded { .. } => {
                "Processing outlived the visibility timeout, so the broker \
                 reclaimed the message. Raise the visibility timeout or lower \
                 the worker time budget - the visibility window should be at \
                 least six times the budget."
            }
            Self::Corrupt { .. } => {
                "The stored message envelope could not be decoded. This usually \
                 indicates a schema mismatch between producer and consumer \
                 versions."
            }
            Self::Storage(err) => err.suggestion(),
            Self::Serialization(_) => {
                "The message envelope could not be serialized. This is likely a \
                 bug in the caller."
            }
        }
    }

    /// Returns a richly formatted error message with context and suggestions.
    #[must_use]
    pub fn display_rich(&self) -> String {
        format!("Error: {}\n\nSuggestion:\n  {}", self, self.suggestion())
    }
}
