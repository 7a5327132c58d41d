//! In-memory [`ObjectStore`] implementation.
//!
//! Used for local development and the test suite. The clock is manual:
//! [`MemoryStore::advance`] moves time forward so visibility and retention
//! decisions are deterministic. List errors can be injected to exercise
//! pagination failure paths.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::error::StorageError;
use super::{ListPage, ObjectStore, PutCondition};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    etag: String,
}

#[derive(Debug, Default)]
struct Inner {
    containers: HashMap<String, BTreeMap<String, StoredObject>>,
    list_errors: VecDeque<String>,
}

/// An in-memory object store with conditional-write and pagination semantics
/// matching S3 closely enough for the broker and loader to run unchanged.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    clock: Arc<Mutex<DateTime<Utc>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store with the clock set to the current wall time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            clock: Arc::new(Mutex::new(Utc::now())),
        }
    }

    /// Advances the store clock.
    pub fn advance(&self, by: Duration) {
        let mut clock = self.clock.lock().expect("clock lock poisoned");
        *clock = *clock + by;
    }

    /// Queues an error to be returned by the next `list_page` call.
    ///
    /// Each injected error is consumed by exactly one call; subsequent calls
    /// succeed again.
    pub fn inject_list_error(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.list_errors.push_back(message.into());
    }

    /// Returns the number of objects currently stored under a prefix.
    #[must_use]
    pub fn count(&self, container: &str, prefix: &str) -> usize {
        let inner = self.inner.lock().expect("store lock poisoned");
        inner.containers.get(container).map_or(0, |objects| {
            objects.keys().filter(|k| k.starts_with(prefix)).count()
        })
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(
        &self,
        container: &str,
        key: &str,
        body: Vec<u8>,
        condition: PutCondition,
    ) -> Result<String, StorageError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let objects = inner.containers.entry(container.to_string()).or_default();

        match condition {
            PutCondition::None => {}
            PutCondition::IfNoneMatch => {
                if objects.contains_key(key) {
                    return Err(StorageError::PreconditionFailed {
                        container: container.to_string(),
                        key: key.to_string(),
                    });
                }
            }
            PutCondition::IfMatch(ref etag) => match objects.get(key) {
                Some(existing) if existing.etag == *etag => {}
                _ => {
                    return Err(StorageError::PreconditionFailed {
                        container: container.to_string(),
                        key: key.to_string(),
                    });
                }
            },
        }

        let etag = Uuid::new_v4().to_string();
        objects.insert(
            key.to_string(),
            StoredObject {
                body,
                etag: etag.clone(),
            },
        );
        Ok(etag)
    }

    async fn get_object(
        &self,
        container: &str,
        key: &str,
    ) -> Result<(Vec<u8>, String), StorageError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        inner
            .containers
            .get(container)
            .and_then(|objects| objects.get(key))
            .map(|obj| (obj.body.clone(), obj.etag.clone()))
            .ok_or_else(|| StorageError::NotFound {
                container: container.to_string(),
                key: key.to_string(),
            })
    }

    async fn delete_object(&self, container: &str, key: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        if let Some(objects) = inner.containers.get_mut(container) {
            objects.remove(key);
        }
        Ok(())
    }

    async fn copy_object(
        &self,
        source_container: &str,
        source_key: &str,
        dest_container: &str,
        dest_key: &str,
    ) -> Result<String, StorageError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let body = inner
            .containers
            .get(source_container)
            .and_then(|objects| objects.get(source_key))
            .map(|obj| obj.body.clone())
            .ok_or_else(|| StorageError::NotFound {
                container: source_container.to_string(),
                key: source_key.to_string(),
            })?;

        let etag = Uuid::new_v4().to_string();
        inner
            .containers
            .entry(dest_container.to_string())
            .or_default()
            .insert(
                dest_key.to_string(),
                StoredObject {
                    body,
                    etag: etag.clone(),
                },
            );
        Ok(etag)
    }

    async fn list_page(
        &self,
        container: &str,
        prefix: &str,
        max_keys: i32,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, StorageError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        if let Some(message) = inner.list_errors.pop_front() {
            return Err(StorageError::ServiceError(message));
        }

        let max_keys = usize::try_from(max_keys.max(0)).unwrap_or(0);
        let Some(objects) = inner.containers.get(container) else {
            return Ok(ListPage {
                keys: Vec::new(),
                next_token: None,
            });
        };

        // Continuation tokens are the last key of the previous page; BTreeMap
        // iteration order matches S3's lexicographic listing.
        let mut remaining = objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| continuation_token.is_none_or(|token| k.as_str() > token))
            .peekable();

        let mut keys = Vec::new();
        while keys.len() < max_keys {
            let Some(key) = remaining.next() else { break };
            keys.push(key.clone());
        }

        let next_token = if remaining.peek().is_some() {
            keys.last().cloned()
        } else {
            None
        };

        Ok(ListPage { keys, next_token })
    }

    async fn head_object(&self, container: &str, key: &str) -> Result<bool, StorageError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner
            .containers
            .get(container)
            .is_some_and(|objects| objects.contains_key(key)))
    }

    async fn now(&self) -> Result<DateTime<Utc>, StorageError> {
        Ok(*self.clock.lock().expect("clock lock poisoned"))
    }
}
