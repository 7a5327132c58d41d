//! Processing of a single object pointer.

use std::time::Duration;

use metrics::{counter, histogram};
use thiserror::Error;

use crate::models::ObjectPointer;
use crate::storage::{ObjectStore, StorageError};

/// Default suffix appended to the key's leading path segment to form the
/// destination key.
pub const DEFAULT_PROCESSED_SUFFIX: &str = "_processed";

/// Default per-message time budget.
pub const DEFAULT_TIME_BUDGET: Duration = Duration::from_secs(15 * 60);

/// Configuration for processing object pointers.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Container receiving processed copies; the pointer's own container
    /// when `None`.
    pub dest_container: Option<String>,

    /// Suffix appended to the leading path segment of the source key.
    pub processed_suffix: String,

    /// Whether to delete the source object after a successful copy (move
    /// semantics). Defaults to false for safety.
    pub delete_original: bool,

    /// Upper bound on one message's processing time. The queue's visibility
    /// timeout must exceed this with a safety margin.
    pub time_budget: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            dest_container: None,
            processed_suffix: DEFAULT_PROCESSED_SUFFIX.to_string(),
            delete_original: false,
            time_budget: DEFAULT_TIME_BUDGET,
        }
    }
}

/// Outcome of processing one pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The object was copied to its destination.
    Copied,
    /// A previous delivery already processed this pointer; nothing to do.
    AlreadyProcessed,
}

/// Errors that fail a single worker invocation.
///
/// Any of these leaves the message unacknowledged, which routes it to the
/// dead-letter queue once its visibility deadline elapses.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The source object is missing and no processed copy exists.
    #[error("Source object missing: {uri}")]
    SourceMissing {
        /// URI of the missing source object.
        uri: String,
    },

    /// Copying the object to its destination failed.
    #[error("Failed copying {uri} to {dest}: {source}")]
    Copy {
        /// URI of the source object.
        uri: String,
        /// Destination key the copy was aimed at.
        dest: String,
        /// The underlying storage error.
        #[source]
        source: StorageError,
    },

    /// Deleting the source object after a successful copy failed.
    #[error("Failed deleting source {uri}: {source}")]
    Delete {
        /// URI of the source object.
        uri: String,
        /// The underlying storage error.
        #[source]
        source: StorageError,
    },

    /// Processing exceeded the configured time budget.
    #[error("Processing exceeded the {0:?} time budget")]
    TimedOut(Duration),

    /// A storage error occurred outside copy/delete.
    #[error("{0}")]
    Storage(#[from] StorageError),
}

/// Derives the destination key for a source key.
///
/// The leading path segment gets the suffix: `logs/2024/a.gz` becomes
/// `logs_processed/2024/a.gz`. A key without a separator is suffixed whole.
#[must_use]
pub fn destination_key(key: &str, suffix: &str) -> String {
    match key.split_once('/') {
        Some((first, rest)) => format!("{first}{suffix}/{rest}"),
        None => format!("{key}{suffix}"),
    }
}

/// Processes one pointer: copy to the destination, then optionally delete
/// the source.
///
/// Idempotent under duplicate delivery: re-copying an already-copied object
/// yields the same destination state, and a missing source whose processed
/// copy exists reports [`ProcessOutcome::AlreadyProcessed`] instead of
/// failing (a prior delivery with delete-original enabled got there first).
///
/// # Errors
///
/// Returns `ProcessError` if the source is missing without a processed copy,
/// or if the copy or delete fails.
pub async fn process_pointer<S: ObjectStore>(
    store: &S,
    pointer: &ObjectPointer,
    config: &ProcessorConfig,
) -> Result<ProcessOutcome, ProcessError> {
    let dest_container = config
        .dest_container
        .as_deref()
        .unwrap_or(&pointer.container);
    let dest_key = destination_key(&pointer.key, &config.processed_suffix);

    if !store.head_object(&pointer.container, &pointer.key).await? {
        if store.head_object(dest_container, &dest_key).await? {
            counter!("rebucket.worker.duplicate_delivery").increment(1);
            tracing::info!(pointer = %pointer, "Source already moved; nothing to do");
            return Ok(ProcessOutcome::AlreadyProcessed);
        }
        return Err(ProcessError::SourceMissing {
            uri: pointer.uri(),
        });
    }

    store
        .copy_object(&pointer.container, &pointer.key, dest_container, &dest_key)
        .await
        .map_err(|source| ProcessError::Copy {
            uri: pointer.uri(),
            dest: dest_key.clone(),
            source,
        })?;
    tracing::debug!(pointer = %pointer, dest = %dest_key, "Copied object to processed location");

    if config.delete_original {
        store
            .delete_object(&pointer.container, &pointer.key)
            .await
            .map_err(|source| ProcessError::Delete {
                uri: pointer.uri(),
                source,
            })?;
        tracing::debug!(pointer = %pointer, "Deleted source object");
    }

    Ok(ProcessOutcome::Copied)
}

/// Processes one pointer under the configured time budget.
///
/// # Errors
///
/// Returns `ProcessError::TimedOut` if the budget elapses, or whatever
/// [`process_pointer`] returned otherwise.
pub async fn process_pointer_with_budget<S: ObjectStore>(
    store: &S,
    pointer: &ObjectPointer,
    config: &ProcessorConfig,
) -> Result<ProcessOutcome, ProcessError> {
    let start = std::time::Instant::now();

    let result = match tokio::time::timeout(
        config.time_budget,
        process_pointer(store, pointer, config),
    )
    .await
    {
        Ok(result) => result,
        Err(_elapsed) => Err(ProcessError::TimedOut(config.time_budget)),
    };

    histogram!("rebucket.worker.duration_seconds").record(start.elapsed().as_secs_f64());
    match &result {
        Ok(_) => counter!("rebucket.worker.processed").increment(1),
        Err(_) => counter!("rebucket.worker.failed").increment(1),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, PutCondition};

    #[test]
    fn destination_rewrites_the_leading_segment_only() {
        assert_eq!(
            destination_key("logs/2024/a.gz", "_processed"),
            "logs_processed/2024/a.gz"
        );
        // Repeated segment names stay intact past the first.
        assert_eq!(
            destination_key("logs/logs/a.gz", "_processed"),
            "logs_processed/logs/a.gz"
        );
        assert_eq!(destination_key("orphan.txt", "_processed"), "orphan.txt_processed");
    }

    async fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .put_object("data", "logs/a.gz", b"payload".to_vec(), PutCondition::None)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn copies_and_retains_source_by_default() {
        let store = seeded_store().await;
        let pointer = ObjectPointer::new("data", "logs/a.gz");

        let outcome = process_pointer(&store, &pointer, &ProcessorConfig::default())
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Copied);

        let (copy, _) = store
            .get_object("data", "logs_processed/a.gz")
            .await
            .unwrap();
        assert_eq!(copy, b"payload");
        assert!(store.head_object("data", "logs/a.gz").await.unwrap());
    }

    #[tokio::test]
    async fn delete_original_moves_the_object() {
        let store = seeded_store().await;
        let pointer = ObjectPointer::new("data", "logs/a.gz");
        let config = ProcessorConfig {
            delete_original: true,
            ..Default::default()
        };

        process_pointer(&store, &pointer, &config).await.unwrap();

        assert!(store
            .head_object("data", "logs_processed/a.gz")
            .await
            .unwrap());
        assert!(!store.head_object("data", "logs/a.gz").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_delivery_is_idempotent() {
        let store = seeded_store().await;
        let pointer = ObjectPointer::new("data", "logs/a.gz");
        let config = ProcessorConfig {
            delete_original: true,
            ..Default::default()
        };

        // First delivery moves the object; the duplicate finds the source
        // gone and the copy present, and must not fail.
        process_pointer(&store, &pointer, &config).await.unwrap();
        let outcome = process_pointer(&store, &pointer, &config).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::AlreadyProcessed);

        let (copy, _) = store
            .get_object("data", "logs_processed/a.gz")
            .await
            .unwrap();
        assert_eq!(copy, b"payload");
    }

    #[tokio::test]
    async fn duplicate_copy_semantics_converge() {
        let store = seeded_store().await;
        let pointer = ObjectPointer::new("data", "logs/a.gz");
        let config = ProcessorConfig::default();

        process_pointer(&store, &pointer, &config).await.unwrap();
        let outcome = process_pointer(&store, &pointer, &config).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Copied);

        let (copy, _) = store
            .get_object("data", "logs_processed/a.gz")
            .await
            .unwrap();
        assert_eq!(copy, b"payload");
    }

    #[tokio::test]
    async fn missing_source_without_copy_fails() {
        let store = MemoryStore::new();
        let pointer = ObjectPointer::new("data", "logs/missing.gz");

        let err = process_pointer(&store, &pointer, &ProcessorConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::SourceMissing { .. }));
    }

    #[tokio::test]
    async fn cross_container_destination() {
        let store = seeded_store().await;
        let pointer = ObjectPointer::new("data", "logs/a.gz");
        let config = ProcessorConfig {
            dest_container: Some("archive".to_string()),
            ..Default::default()
        };

        process_pointer(&store, &pointer, &config).await.unwrap();

        assert!(store
            .head_object("archive", "logs_processed/a.gz")
            .await
            .unwrap());
    }
}
