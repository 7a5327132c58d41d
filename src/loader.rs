//! The pagination step: list one page of the source container and fan its
//! entries out into the work queue.
//!
//! One call loads at most one page. The orchestrator threads the returned
//! cursor back in for the next call; an absent cursor in the output means
//! the enumeration is exhausted. A loader call is not idempotent across
//! retries: a crash between enqueue and cursor capture can duplicate a
//! page's worth of pointers, which is why worker processing tolerates
//! duplicates.

use std::sync::Arc;

use metrics::counter;
use thiserror::Error;

use crate::models::{ErrorInfo, ObjectPointer, OrchestrationState};
use crate::queue::{QueueError, WorkQueue};
use crate::storage::{ObjectStore, StorageError};

/// Default number of keys listed per page.
pub const DEFAULT_PAGE_SIZE: i32 = 500;

/// Configuration for the [`Loader`].
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Container being backfilled.
    pub source_container: String,
    /// Only keys under this prefix are enumerated. Empty means the whole
    /// container.
    pub prefix: String,
    /// Maximum keys listed (and enqueued) per call.
    pub page_size: i32,
}

impl LoaderConfig {
    /// Creates a config enumerating the whole container with the default
    /// page size.
    #[must_use]
    pub fn new(source_container: impl Into<String>) -> Self {
        Self {
            source_container: source_container.into(),
            prefix: String::new(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Restricts enumeration to a key prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Overrides the page size.
    #[must_use]
    pub const fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size;
        self
    }
}

/// Errors raised by a load step. Any of these is fatal to the run and is
/// routed through the failure fallback chain by the orchestrator.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// Listing the source container failed.
    #[error("Failed to list {container} under '{prefix}': {source}")]
    List {
        /// The container being listed.
        container: String,
        /// The listing prefix.
        prefix: String,
        /// The underlying storage error.
        #[source]
        source: StorageError,
    },

    /// Enqueueing a discovered pointer failed.
    #[error("Failed to enqueue pointer for {key}: {source}")]
    Enqueue {
        /// The key whose pointer could not be enqueued.
        key: String,
        /// The underlying queue error.
        #[source]
        source: QueueError,
    },
}

impl LoaderError {
    /// Short machine-readable kind for the error payload threaded through
    /// orchestration state.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::List { .. } => "list_failed",
            Self::Enqueue { .. } => "enqueue_failed",
        }
    }
}

impl From<&LoaderError> for ErrorInfo {
    fn from(err: &LoaderError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// Lists pages of the source container and enqueues one pointer per entry.
#[derive(Debug)]
pub struct Loader<S> {
    store: Arc<S>,
    queue: WorkQueue<S>,
    config: LoaderConfig,
}

impl<S> Loader<S> {
    /// Creates a loader feeding the given queue.
    #[must_use]
    pub const fn new(store: Arc<S>, queue: WorkQueue<S>, config: LoaderConfig) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }
}

impl<S: ObjectStore> Loader<S> {
    /// Loads one page starting at the state's cursor (or the beginning when
    /// absent), enqueues a pointer per key, and returns the next state.
    ///
    /// Presence of `cursor` in the returned state signals that more pages
    /// remain.
    ///
    /// # Errors
    ///
    /// Returns `LoaderError` if the listing or any enqueue fails. Pointers
    /// enqueued before the failure stay enqueued.
    pub async fn load_page(
        &self,
        state: &OrchestrationState,
    ) -> Result<OrchestrationState, LoaderError> {
        let page = self
            .store
            .list_page(
                &self.config.source_container,
                &self.config.prefix,
                self.config.page_size,
                state.cursor.as_deref(),
            )
            .await
            .map_err(|source| LoaderError::List {
                container: self.config.source_container.clone(),
                prefix: self.config.prefix.clone(),
                source,
            })?;

        for key in &page.keys {
            let pointer = ObjectPointer::new(self.config.source_container.as_str(), key.as_str());
            self.queue
                .enqueue(pointer)
                .await
                .map_err(|source| LoaderError::Enqueue {
                    key: key.clone(),
                    source,
                })?;
        }

        counter!("rebucket.loader.pages").increment(1);
        counter!("rebucket.loader.objects").increment(page.keys.len() as u64);
        tracing::info!(
            page_keys = page.keys.len(),
            has_more = page.next_token.is_some(),
            "Loaded page into queue"
        );

        Ok(OrchestrationState {
            cursor: page.next_token,
            objects_enqueued: state.objects_enqueued + page.keys.len() as u64,
            pages_loaded: state.pages_loaded + 1,
            error: None,
        })
    }
}
