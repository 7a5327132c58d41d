//! Object storage abstraction.
//!
//! Everything above this module talks to storage through the [`ObjectStore`]
//! trait: the queue, the loader, the worker, and the failure topic are all
//! storage-agnostic. [`S3Store`] is the production implementation;
//! [`MemoryStore`] backs local development and the test suite.

pub mod error;
pub mod memory;
pub mod s3;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use error::StorageError;
pub use memory::MemoryStore;
pub use s3::{S3Config, S3Store};

/// Condition for conditional writes.
#[derive(Debug, Clone)]
pub enum PutCondition {
    /// No condition - unconditional write
    None,
    /// `If-None-Match: *` - Create only if object doesn't exist
    IfNoneMatch,
    /// `If-Match: "etag"` - CAS update only if `ETag` matches
    IfMatch(String),
}

/// One page of a container listing.
#[derive(Debug, Clone)]
pub struct ListPage {
    /// Object keys in this page, in lexicographic order.
    pub keys: Vec<String>,
    /// Continuation token for the next page; `None` when the listing is
    /// exhausted.
    pub next_token: Option<String>,
}

/// Minimal object-store operations the backfill system depends on.
///
/// Implementations address a container (bucket) per call rather than binding
/// one at construction, since a single run touches the source container, an
/// optional destination container, and the queue container.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Uploads an object, optionally guarded by a [`PutCondition`].
    ///
    /// # Returns
    ///
    /// The `ETag` of the created/updated object.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::PreconditionFailed` if the condition is not met.
    async fn put_object(
        &self,
        container: &str,
        key: &str,
        body: Vec<u8>,
        condition: PutCondition,
    ) -> Result<String, StorageError>;

    /// Retrieves an object.
    ///
    /// # Returns
    ///
    /// The object body and its `ETag`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the object doesn't exist.
    async fn get_object(&self, container: &str, key: &str)
        -> Result<(Vec<u8>, String), StorageError>;

    /// Deletes an object. Best-effort: deleting a missing object succeeds.
    async fn delete_object(&self, container: &str, key: &str) -> Result<(), StorageError>;

    /// Copies an object, server-side where the backend supports it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the source object doesn't exist.
    async fn copy_object(
        &self,
        source_container: &str,
        source_key: &str,
        dest_container: &str,
        dest_key: &str,
    ) -> Result<String, StorageError>;

    /// Lists up to `max_keys` objects under `prefix`, resuming from
    /// `continuation_token` when present.
    async fn list_page(
        &self,
        container: &str,
        prefix: &str,
        max_keys: i32,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, StorageError>;

    /// Checks whether an object exists.
    async fn head_object(&self, container: &str, key: &str) -> Result<bool, StorageError>;

    /// Returns the current time as observed by the storage service.
    ///
    /// Visibility deadlines and retention decisions use this clock so that
    /// all consumers agree on time regardless of local clock drift.
    async fn now(&self) -> Result<DateTime<Utc>, StorageError>;
}
