//! Queue operations: enqueue, receive (atomic claim), acknowledge.

use std::sync::Arc;

use metrics::counter;
use uuid::Uuid;

use crate::models::{MessageStatus, ObjectPointer, QueueMessage};
use crate::storage::{ObjectStore, PutCondition, StorageError};

use super::config::QueueConfig;
use super::error::QueueError;

/// How many ready-index keys a single receive call scans for a claimable
/// message.
const RECEIVE_PAGE_SIZE: i32 = 100;

/// Handle returned with a delivered message; required to acknowledge it.
///
/// The embedded `ETag` pins the exact revision that was claimed, so a
/// consumer whose message was reclaimed by the sweeper cannot acknowledge a
/// message it no longer owns.
#[derive(Debug, Clone)]
pub struct Receipt {
    /// The ID of the delivered message.
    pub message_id: Uuid,
    pub(crate) etag: String,
}

/// One delivered message plus the receipt needed to acknowledge it.
#[derive(Debug)]
pub struct Delivery {
    /// The delivered message.
    pub message: QueueMessage,
    /// Receipt for acknowledging the delivery.
    pub receipt: Receipt,
}

/// The durable work queue.
///
/// Messages are JSON objects under `{prefix}/messages/`, with zero-byte
/// index objects under `{prefix}/ready/` and `{prefix}/inflight/` to keep
/// receive and sweep scans off the message log. Dead letters move to
/// `{prefix}/dlq/`.
#[derive(Debug)]
pub struct WorkQueue<S> {
    store: Arc<S>,
    config: QueueConfig,
}

impl<S> Clone for WorkQueue<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S> WorkQueue<S> {
    /// Creates a queue over the given store.
    #[must_use]
    pub const fn new(store: Arc<S>, config: QueueConfig) -> Self {
        Self { store, config }
    }

    /// The queue configuration.
    #[must_use]
    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub(crate) fn message_key(&self, id: Uuid) -> String {
        format!("{}/messages/{id}.json", self.config.prefix)
    }

    pub(crate) fn ready_key(&self, id: Uuid) -> String {
        format!("{}/ready/{id}", self.config.prefix)
    }

    pub(crate) fn inflight_key(&self, id: Uuid) -> String {
        format!("{}/inflight/{id}", self.config.prefix)
    }

    pub(crate) fn dead_letter_key(&self, id: Uuid) -> String {
        format!("{}/dlq/{id}.json", self.config.prefix)
    }

    pub(crate) fn ready_prefix(&self) -> String {
        format!("{}/ready/", self.config.prefix)
    }

    pub(crate) fn inflight_prefix(&self) -> String {
        format!("{}/inflight/", self.config.prefix)
    }

    pub(crate) fn messages_prefix(&self) -> String {
        format!("{}/messages/", self.config.prefix)
    }

    pub(crate) fn dead_letter_prefix(&self) -> String {
        format!("{}/dlq/", self.config.prefix)
    }
}

/// Extracts the message ID from an index key like `queue/ready/{uuid}`.
pub(crate) fn parse_message_id(index_key: &str) -> Option<Uuid> {
    let raw = index_key.rsplit('/').next()?;
    Uuid::parse_str(raw.trim_end_matches(".json")).ok()
}

impl<S: ObjectStore> WorkQueue<S> {
    /// Enqueues one pointer as a new ready message.
    ///
    /// # Returns
    ///
    /// The ID of the enqueued message.
    ///
    /// # Errors
    ///
    /// Returns `QueueError` if the message or its ready index cannot be
    /// written.
    pub async fn enqueue(&self, pointer: ObjectPointer) -> Result<Uuid, QueueError> {
        let now = self.store.now().await?;
        let message = QueueMessage::new(pointer, now);
        let body = serde_json::to_vec(&message)?;

        self.store
            .put_object(
                &self.config.container,
                &self.message_key(message.id),
                body,
                PutCondition::IfNoneMatch,
            )
            .await?;
        self.store
            .put_object(
                &self.config.container,
                &self.ready_key(message.id),
                Vec::new(),
                PutCondition::None,
            )
            .await?;

        counter!("rebucket.queue.enqueued").increment(1);
        tracing::debug!(message_id = %message.id, pointer = %message.pointer, "Enqueued message");

        Ok(message.id)
    }

    /// Receives the next available message, if any.
    ///
    /// Scans a page of the ready index and attempts to claim each candidate
    /// atomically. Losing a claim race to another consumer is normal; the
    /// scan simply moves on to the next candidate.
    ///
    /// # Errors
    ///
    /// Returns `QueueError` for storage failures. Claim conflicts are not
    /// errors.
    pub async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let page = self
            .store
            .list_page(
                &self.config.container,
                &self.ready_prefix(),
                RECEIVE_PAGE_SIZE,
                None,
            )
            .await?;

        for index_key in &page.keys {
            let Some(id) = parse_message_id(index_key) else {
                let _ = self
                    .store
                    .delete_object(&self.config.container, index_key)
                    .await;
                continue;
            };

            if let Some(delivery) = self.try_claim(id).await? {
                return Ok(Some(delivery));
            }
        }

        Ok(None)
    }

    /// Attempts to claim a single ready message atomically.
    ///
    /// The claim is a `PUT` with `If-Match`: if two consumers race on the
    /// same message, exactly one succeeds and the other observes a
    /// precondition failure.
    async fn try_claim(&self, id: Uuid) -> Result<Option<Delivery>, QueueError> {
        let message_key = self.message_key(id);
        let (body, etag) = match self
            .store
            .get_object(&self.config.container, &message_key)
            .await
        {
            Ok(found) => found,
            Err(StorageError::NotFound { .. }) => {
                // Stale ready index left behind by a crashed consumer.
                let _ = self
                    .store
                    .delete_object(&self.config.container, &self.ready_key(id))
                    .await;
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        let mut message: QueueMessage =
            serde_json::from_slice(&body).map_err(|err| QueueError::Corrupt {
                message_id: id,
                detail: err.to_string(),
            })?;

        if message.status != MessageStatus::Ready {
            let _ = self
                .store
                .delete_object(&self.config.container, &self.ready_key(id))
                .await;
            return Ok(None);
        }

        let now = self.store.now().await?;
        message.status = MessageStatus::InFlight;
        message.receive_count += 1;
        message.visible_deadline = Some(now + self.config.visibility_timeout);
        message.updated_at = now;

        let updated = serde_json::to_vec(&message)?;
        let new_etag = match self
            .store
            .put_object(
                &self.config.container,
                &message_key,
                updated,
                PutCondition::IfMatch(etag),
            )
            .await
        {
            Ok(etag) => etag,
            Err(StorageError::PreconditionFailed { .. }) => {
                // Another consumer claimed this message first.
                counter!("rebucket.queue.claim_conflict").increment(1);
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        // Best-effort index bookkeeping; the sweeper repairs stragglers.
        if let Err(err) = self
            .store
            .put_object(
                &self.config.container,
                &self.inflight_key(id),
                Vec::new(),
                PutCondition::None,
            )
            .await
        {
            tracing::warn!(message_id = %id, error = %err, "Failed to create inflight index");
        }
        if let Err(err) = self
            .store
            .delete_object(&self.config.container, &self.ready_key(id))
            .await
        {
            tracing::warn!(message_id = %id, error = %err, "Failed to delete ready index");
        }

        counter!("rebucket.queue.delivered").increment(1);

        Ok(Some(Delivery {
            message,
            receipt: Receipt {
                message_id: id,
                etag: new_etag,
            },
        }))
    }

    /// Acknowledges a delivery, deleting the message.
    ///
    /// Success is observed purely as message deletion; a message that is
    /// never acknowledged is dead-lettered by the sweeper once its
    /// visibility deadline elapses.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ReceiptSuperseded` if the broker reclaimed the
    /// message after the visibility deadline, or `QueueError::MessageNotFound`
    /// if it was already deleted.
    pub async fn acknowledge(&self, receipt: &Receipt) -> Result<(), QueueError> {
        let message_key = self.message_key(receipt.message_id);
        let (_, etag) = match self
            .store
            .get_object(&self.config.container, &message_key)
            .await
        {
            Ok(found) => found,
            Err(StorageError::NotFound { .. }) => {
                return Err(QueueError::MessageNotFound {
                    message_id: receipt.message_id,
                });
            }
            Err(err) => return Err(err.into()),
        };

        if etag != receipt.etag {
            return Err(QueueError::ReceiptSuperseded {
                message_id: receipt.message_id,
            });
        }

        self.store
            .delete_object(&self.config.container, &message_key)
            .await?;
        let _ = self
            .store
            .delete_object(&self.config.container, &self.inflight_key(receipt.message_id))
            .await;

        counter!("rebucket.queue.acknowledged").increment(1);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn test_queue() -> (Arc<MemoryStore>, WorkQueue<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let queue = WorkQueue::new(Arc::clone(&store), QueueConfig::new("queue-bucket"));
        (store, queue)
    }

    #[tokio::test]
    async fn enqueue_receive_acknowledge_lifecycle() {
        let (store, queue) = test_queue();

        let id = queue
            .enqueue(ObjectPointer::new("data", "logs/a"))
            .await
            .unwrap();

        let delivery = queue.receive().await.unwrap().expect("message available");
        assert_eq!(delivery.message.id, id);
        assert_eq!(delivery.message.status, MessageStatus::InFlight);
        assert_eq!(delivery.message.receive_count, 1);
        assert!(delivery.message.visible_deadline.is_some());

        // While in flight the message is hidden from other consumers.
        assert!(queue.receive().await.unwrap().is_none());

        queue.acknowledge(&delivery.receipt).await.unwrap();
        assert_eq!(store.count("queue-bucket", "queue/messages/"), 0);
        assert!(queue.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn receive_returns_none_on_empty_queue() {
        let (_store, queue) = test_queue();
        assert!(queue.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn acknowledging_twice_reports_message_gone() {
        let (_store, queue) = test_queue();
        queue
            .enqueue(ObjectPointer::new("data", "logs/a"))
            .await
            .unwrap();

        let delivery = queue.receive().await.unwrap().unwrap();
        queue.acknowledge(&delivery.receipt).await.unwrap();

        let err = queue.acknowledge(&delivery.receipt).await.unwrap_err();
        assert!(matches!(err, QueueError::MessageNotFound { .. }));
    }

    #[test]
    fn parses_message_ids_from_index_keys() {
        let id = Uuid::new_v4();
        assert_eq!(parse_message_id(&format!("queue/ready/{id}")), Some(id));
        assert_eq!(
            parse_message_id(&format!("queue/messages/{id}.json")),
            Some(id)
        );
        assert_eq!(parse_message_id("queue/ready/not-a-uuid"), None);
    }
}
