//! Visibility sweep and dead-lettering.
//!
//! The broker never retries on its own: the sweeper walks the in-flight
//! index, and any message whose visibility deadline has elapsed is either
//! requeued (deliveries remaining) or moved to the dead-letter queue
//! (deliveries exhausted). With the default max receive count of 1, a single
//! abandoned delivery dead-letters the message. The sweep also purges
//! messages past their retention window.

use metrics::counter;
use uuid::Uuid;

use crate::models::{MessageStatus, QueueMessage};
use crate::storage::{ObjectStore, PutCondition, StorageError};

use super::error::QueueError;
use super::ops::{parse_message_id, WorkQueue};

/// Page size for sweep listings.
const SWEEP_PAGE_SIZE: i32 = 1000;

/// What to do with an in-flight message whose visibility deadline elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryDisposition {
    /// Deliveries remain; return the message to the ready state.
    Requeue,
    /// Deliveries exhausted; move the message to the dead-letter queue.
    DeadLetter,
}

/// Deterministic transition for an abandoned delivery.
///
/// The delivery-attempt counter, not an exception/retry loop, decides the
/// outcome, which keeps the no-retry policy visible and testable.
#[must_use]
pub const fn expiry_disposition(receive_count: u32, max_receive_count: u32) -> ExpiryDisposition {
    if receive_count >= max_receive_count {
        ExpiryDisposition::DeadLetter
    } else {
        ExpiryDisposition::Requeue
    }
}

/// Summary of one sweep pass.
#[derive(Debug, Default, Clone)]
pub struct SweepReport {
    /// In-flight index entries scanned.
    pub scanned: usize,
    /// Messages returned to the ready state.
    pub requeued: usize,
    /// Messages moved to the dead-letter queue.
    pub dead_lettered: usize,
    /// Messages purged by retention.
    pub purged: usize,
}

impl<S: ObjectStore> WorkQueue<S> {
    /// Runs one sweep pass: visibility expiry over the in-flight index, then
    /// retention purge over the message log and the dead-letter queue.
    ///
    /// Individual message failures are logged and skipped so one bad object
    /// cannot stall the sweep.
    ///
    /// # Errors
    ///
    /// Returns `QueueError` only for listing failures; per-message errors
    /// are logged.
    pub async fn sweep(&self) -> Result<SweepReport, QueueError> {
        let mut report = SweepReport::default();

        let mut token: Option<String> = None;
        loop {
            let page = self
                .store()
                .list_page(
                    &self.config().container,
                    &self.inflight_prefix(),
                    SWEEP_PAGE_SIZE,
                    token.as_deref(),
                )
                .await?;

            for index_key in &page.keys {
                report.scanned += 1;
                let Some(id) = parse_message_id(index_key) else {
                    let _ = self
                        .store()
                        .delete_object(&self.config().container, index_key)
                        .await;
                    continue;
                };

                if let Err(err) = self.sweep_one(id, &mut report).await {
                    tracing::warn!(message_id = %id, error = %err, "Sweep skipped message");
                }
            }

            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        self.purge_expired(&mut report).await?;

        Ok(report)
    }

    /// Applies the expiry disposition to one in-flight message.
    async fn sweep_one(&self, id: Uuid, report: &mut SweepReport) -> Result<(), QueueError> {
        let message_key = self.message_key(id);
        let (body, etag) = match self
            .store()
            .get_object(&self.config().container, &message_key)
            .await
        {
            Ok(found) => found,
            Err(StorageError::NotFound { .. }) => {
                // Message acknowledged; the inflight index is a leftover.
                let _ = self
                    .store()
                    .delete_object(&self.config().container, &self.inflight_key(id))
                    .await;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let message: QueueMessage =
            serde_json::from_slice(&body).map_err(|err| QueueError::Corrupt {
                message_id: id,
                detail: err.to_string(),
            })?;

        let now = self.store().now().await?;
        if !message.is_abandoned_at(now) {
            if message.status != MessageStatus::InFlight {
                let _ = self
                    .store()
                    .delete_object(&self.config().container, &self.inflight_key(id))
                    .await;
            }
            return Ok(());
        }

        match expiry_disposition(message.receive_count, self.config().max_receive_count) {
            ExpiryDisposition::DeadLetter => {
                self.dead_letter(message, &etag, report).await?;
            }
            ExpiryDisposition::Requeue => {
                self.requeue(message, &etag, report).await?;
            }
        }

        Ok(())
    }

    /// Moves an abandoned message to the dead-letter queue.
    ///
    /// The terminal transition is claimed with CAS first, so a late
    /// acknowledgement from a consumer that outlived its deadline loses the
    /// race instead of silently succeeding alongside the dead letter. The
    /// dead-letter write itself is conditional so a message lands there
    /// exactly once even if two sweepers race.
    async fn dead_letter(
        &self,
        mut message: QueueMessage,
        etag: &str,
        report: &mut SweepReport,
    ) -> Result<(), QueueError> {
        let now = self.store().now().await?;
        let id = message.id;

        message.status = MessageStatus::DeadLettered;
        message.visible_deadline = None;
        message.dead_lettered_at = Some(now);
        message.updated_at = now;
        message.last_error = Some(format!(
            "delivery {} of {} not acknowledged before the visibility deadline",
            message.receive_count,
            self.config().max_receive_count
        ));

        let body = serde_json::to_vec(&message)?;
        match self
            .store()
            .put_object(
                &self.config().container,
                &self.message_key(id),
                body.clone(),
                PutCondition::IfMatch(etag.to_string()),
            )
            .await
        {
            Ok(_) => {}
            Err(StorageError::PreconditionFailed { .. }) => {
                // The message changed underneath us (acknowledged at the last
                // moment or moved by another sweeper); leave it alone.
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        match self
            .store()
            .put_object(
                &self.config().container,
                &self.dead_letter_key(id),
                body,
                PutCondition::IfNoneMatch,
            )
            .await
        {
            Ok(_) => {}
            Err(StorageError::PreconditionFailed { .. }) => {
                // A concurrent sweeper already moved it; just clean up.
            }
            Err(err) => return Err(err.into()),
        }

        self.store()
            .delete_object(&self.config().container, &self.message_key(id))
            .await?;
        let _ = self
            .store()
            .delete_object(&self.config().container, &self.inflight_key(id))
            .await;

        counter!("rebucket.queue.dead_lettered").increment(1);
        tracing::warn!(message_id = %id, pointer = %message.pointer, "Message dead-lettered");
        report.dead_lettered += 1;

        Ok(())
    }

    /// Returns an abandoned message with deliveries remaining to the ready
    /// state.
    async fn requeue(
        &self,
        mut message: QueueMessage,
        etag: &str,
        report: &mut SweepReport,
    ) -> Result<(), QueueError> {
        let now = self.store().now().await?;
        let id = message.id;

        message.status = MessageStatus::Ready;
        message.visible_deadline = None;
        message.updated_at = now;

        let body = serde_json::to_vec(&message)?;
        match self
            .store()
            .put_object(
                &self.config().container,
                &self.message_key(id),
                body,
                PutCondition::IfMatch(etag.to_string()),
            )
            .await
        {
            Ok(_) => {}
            Err(StorageError::PreconditionFailed { .. }) => {
                // The message changed underneath us (acknowledged or claimed
                // again); leave it alone.
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        self.store()
            .put_object(
                &self.config().container,
                &self.ready_key(id),
                Vec::new(),
                PutCondition::None,
            )
            .await?;
        let _ = self
            .store()
            .delete_object(&self.config().container, &self.inflight_key(id))
            .await;

        counter!("rebucket.queue.requeued").increment(1);
        report.requeued += 1;

        Ok(())
    }

    /// Purges messages past the retention window from the message log and
    /// the dead-letter queue.
    async fn purge_expired(&self, report: &mut SweepReport) -> Result<(), QueueError> {
        let now = self.store().now().await?;

        for prefix in [self.messages_prefix(), self.dead_letter_prefix()] {
            let mut token: Option<String> = None;
            loop {
                let page = self
                    .store()
                    .list_page(
                        &self.config().container,
                        &prefix,
                        SWEEP_PAGE_SIZE,
                        token.as_deref(),
                    )
                    .await?;

                for key in &page.keys {
                    let Ok((body, _)) = self
                        .store()
                        .get_object(&self.config().container, key)
                        .await
                    else {
                        continue;
                    };
                    let Ok(message) = serde_json::from_slice::<QueueMessage>(&body) else {
                        continue;
                    };

                    if now.signed_duration_since(message.enqueued_at) > self.config().retention {
                        let _ = self
                            .store()
                            .delete_object(&self.config().container, key)
                            .await;
                        let _ = self
                            .store()
                            .delete_object(&self.config().container, &self.ready_key(message.id))
                            .await;
                        let _ = self
                            .store()
                            .delete_object(
                                &self.config().container,
                                &self.inflight_key(message.id),
                            )
                            .await;
                        report.purged += 1;
                    }
                }

                match page.next_token {
                    Some(next) => token = Some(next),
                    None => break,
                }
            }
        }

        Ok(())
    }

    /// Lists dead-lettered messages for triage, oldest keys first.
    ///
    /// # Errors
    ///
    /// Returns `QueueError` if the dead-letter listing fails.
    pub async fn dead_letters(&self, limit: i32) -> Result<Vec<QueueMessage>, QueueError> {
        let page = self
            .store()
            .list_page(
                &self.config().container,
                &self.dead_letter_prefix(),
                limit,
                None,
            )
            .await?;

        let mut messages = Vec::with_capacity(page.keys.len());
        for key in &page.keys {
            match self
                .store()
                .get_object(&self.config().container, key)
                .await
            {
                Ok((body, _)) => match serde_json::from_slice::<QueueMessage>(&body) {
                    Ok(message) => messages.push(message),
                    Err(err) => {
                        tracing::warn!(key = %key, error = %err, "Skipping corrupt dead letter");
                    }
                },
                Err(StorageError::NotFound { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }

        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::models::ObjectPointer;
    use crate::queue::QueueConfig;
    use crate::storage::MemoryStore;

    #[test]
    fn disposition_follows_the_attempt_counter() {
        assert_eq!(expiry_disposition(1, 1), ExpiryDisposition::DeadLetter);
        assert_eq!(expiry_disposition(2, 1), ExpiryDisposition::DeadLetter);
        assert_eq!(expiry_disposition(1, 3), ExpiryDisposition::Requeue);
        assert_eq!(expiry_disposition(3, 3), ExpiryDisposition::DeadLetter);
    }

    fn test_queue(max_receive_count: u32) -> (Arc<MemoryStore>, WorkQueue<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let config = QueueConfig::new("queue-bucket")
            .with_visibility_timeout(Duration::minutes(90))
            .with_max_receive_count(max_receive_count);
        let queue = WorkQueue::new(Arc::clone(&store), config);
        (store, queue)
    }

    #[tokio::test]
    async fn unacknowledged_message_dead_letters_exactly_once() {
        let (store, queue) = test_queue(1);
        let id = queue
            .enqueue(ObjectPointer::new("data", "logs/a"))
            .await
            .unwrap();

        let _delivery = queue.receive().await.unwrap().expect("delivered");

        // Worker fails: no acknowledgement. Before the deadline the sweeper
        // leaves the message alone.
        let report = queue.sweep().await.unwrap();
        assert_eq!(report.dead_lettered, 0);

        store.advance(Duration::minutes(91));
        let report = queue.sweep().await.unwrap();
        assert_eq!(report.dead_lettered, 1);

        let dead = queue.dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, id);
        assert_eq!(dead[0].status, MessageStatus::DeadLettered);
        assert!(dead[0].last_error.is_some());

        // Never redelivered, and a second sweep does not duplicate it.
        assert!(queue.receive().await.unwrap().is_none());
        let report = queue.sweep().await.unwrap();
        assert_eq!(report.dead_lettered, 0);
        assert_eq!(queue.dead_letters(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn message_with_deliveries_remaining_is_requeued() {
        let (store, queue) = test_queue(2);
        queue
            .enqueue(ObjectPointer::new("data", "logs/a"))
            .await
            .unwrap();

        let first = queue.receive().await.unwrap().expect("delivered");
        assert_eq!(first.message.receive_count, 1);

        store.advance(Duration::minutes(91));
        let report = queue.sweep().await.unwrap();
        assert_eq!(report.requeued, 1);
        assert_eq!(report.dead_lettered, 0);

        let second = queue.receive().await.unwrap().expect("redelivered");
        assert_eq!(second.message.receive_count, 2);

        // Second abandonment exhausts the allowance.
        store.advance(Duration::minutes(91));
        let report = queue.sweep().await.unwrap();
        assert_eq!(report.dead_lettered, 1);
    }

    #[tokio::test]
    async fn acknowledgement_after_dead_lettering_is_rejected() {
        let (store, queue) = test_queue(1);
        queue
            .enqueue(ObjectPointer::new("data", "logs/a"))
            .await
            .unwrap();

        let delivery = queue.receive().await.unwrap().unwrap();
        store.advance(Duration::minutes(91));
        queue.sweep().await.unwrap();

        let err = queue.acknowledge(&delivery.receipt).await.unwrap_err();
        assert!(matches!(err, QueueError::MessageNotFound { .. }));
    }

    #[tokio::test]
    async fn retention_purges_old_messages_and_dead_letters() {
        let (store, queue) = test_queue(1);
        queue
            .enqueue(ObjectPointer::new("data", "logs/a"))
            .await
            .unwrap();
        queue
            .enqueue(ObjectPointer::new("data", "logs/b"))
            .await
            .unwrap();

        // Abandon one delivery so the DLQ is populated too.
        let _delivery = queue.receive().await.unwrap().unwrap();
        store.advance(Duration::minutes(91));
        queue.sweep().await.unwrap();

        store.advance(Duration::days(15));
        let report = queue.sweep().await.unwrap();
        assert_eq!(report.purged, 2);
        assert_eq!(store.count("queue-bucket", "queue/messages/"), 0);
        assert_eq!(store.count("queue-bucket", "queue/dlq/"), 0);
    }
}
