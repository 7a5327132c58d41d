//! Failure fallback chain: durable notification of fatal pagination errors.
//!
//! On any loader failure the orchestrator publishes the entire failing
//! payload, serialized verbatim as text, to a notification topic. Every
//! subscription on the topic is durable: the notice is written as a retained
//! object per subscription, so the payload survives even when nobody is
//! listening at publish time. This keeps fatal pagination errors auditable
//! and distinct from ordinary per-object dead letters.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::FailureRecord;
use crate::storage::{ObjectStore, PutCondition, StorageError};

/// Default key prefix for notification objects.
pub const DEFAULT_NOTIFY_PREFIX: &str = "notifications";

/// Default subscription receiving failure notices.
pub const DEFAULT_SUBSCRIPTION: &str = "failures";

/// A durable notice retained for later triage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureNotice {
    /// Unique identifier of the notice.
    pub id: Uuid,
    /// When the notice was published.
    pub published_at: DateTime<Utc>,
    /// The failing payload, delivered verbatim.
    pub message: String,
}

/// Errors raised while publishing or reading notices.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// A storage error occurred.
    #[error("{0}")]
    Storage(#[from] StorageError),

    /// The failure payload could not be serialized.
    #[error("Failed to serialize failure payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Anything that can receive a fatal failure record.
///
/// The orchestrator depends on this seam rather than on [`FailureTopic`]
/// directly, so the fallback chain can be exercised without storage.
#[async_trait]
pub trait FailureSink: Send + Sync {
    /// Publishes the failing payload.
    async fn publish(&self, record: &FailureRecord) -> Result<(), NotifyError>;
}

/// A notification topic with durable per-subscription retention.
#[derive(Debug)]
pub struct FailureTopic<S> {
    store: Arc<S>,
    container: String,
    prefix: String,
    subscriptions: Vec<String>,
}

impl<S> FailureTopic<S> {
    /// Creates a topic in the given container with the default `failures`
    /// subscription.
    #[must_use]
    pub fn new(store: Arc<S>, container: impl Into<String>) -> Self {
        Self {
            store,
            container: container.into(),
            prefix: DEFAULT_NOTIFY_PREFIX.to_string(),
            subscriptions: vec![DEFAULT_SUBSCRIPTION.to_string()],
        }
    }

    /// Adds another durable subscription.
    #[must_use]
    pub fn with_subscription(mut self, name: impl Into<String>) -> Self {
        self.subscriptions.push(name.into());
        self
    }

    fn notice_key(&self, subscription: &str, id: Uuid) -> String {
        format!("{}/{subscription}/{id}.json", self.prefix)
    }

    fn subscription_prefix(&self, subscription: &str) -> String {
        format!("{}/{subscription}/", self.prefix)
    }
}

impl<S: ObjectStore> FailureTopic<S> {
    /// Publishes a text payload to every subscription.
    ///
    /// # Returns
    ///
    /// The ID of the published notice.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError` if any subscription write fails.
    pub async fn publish_text(&self, message: &str) -> Result<Uuid, NotifyError> {
        let now = self.store.now().await?;
        let notice = FailureNotice {
            id: Uuid::new_v4(),
            published_at: now,
            message: message.to_string(),
        };
        let body = serde_json::to_vec(&notice)?;

        for subscription in &self.subscriptions {
            self.store
                .put_object(
                    &self.container,
                    &self.notice_key(subscription, notice.id),
                    body.clone(),
                    PutCondition::IfNoneMatch,
                )
                .await?;
        }

        counter!("rebucket.notify.published").increment(1);
        tracing::error!(notice_id = %notice.id, payload = %message, "Published failure notice");

        Ok(notice.id)
    }

    /// Reads retained notices for a subscription, oldest keys first.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError` if the listing or a read fails.
    pub async fn notices(
        &self,
        subscription: &str,
        limit: i32,
    ) -> Result<Vec<FailureNotice>, NotifyError> {
        let page = self
            .store
            .list_page(
                &self.container,
                &self.subscription_prefix(subscription),
                limit,
                None,
            )
            .await?;

        let mut notices = Vec::with_capacity(page.keys.len());
        for key in &page.keys {
            let (body, _) = self.store.get_object(&self.container, key).await?;
            notices.push(serde_json::from_slice(&body)?);
        }

        Ok(notices)
    }
}

#[async_trait]
impl<S: ObjectStore> FailureSink for FailureTopic<S> {
    async fn publish(&self, record: &FailureRecord) -> Result<(), NotifyError> {
        let text = record.to_text()?;
        self.publish_text(&text).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErrorInfo, OrchestrationState};
    use crate::storage::MemoryStore;

    fn test_record() -> FailureRecord {
        FailureRecord {
            state: OrchestrationState {
                cursor: Some("t2".to_string()),
                objects_enqueued: 4,
                pages_loaded: 2,
                error: Some(ErrorInfo::new("list_failed", "listing unavailable")),
            },
            error: ErrorInfo::new("list_failed", "listing unavailable"),
        }
    }

    #[tokio::test]
    async fn publishes_one_notice_per_subscription() {
        let store = Arc::new(MemoryStore::new());
        let topic = FailureTopic::new(Arc::clone(&store), "queue-bucket")
            .with_subscription("oncall-audit");

        topic.publish(&test_record()).await.unwrap();

        assert_eq!(store.count("queue-bucket", "notifications/failures/"), 1);
        assert_eq!(
            store.count("queue-bucket", "notifications/oncall-audit/"),
            1
        );
    }

    #[tokio::test]
    async fn notices_carry_the_payload_verbatim() {
        let store = Arc::new(MemoryStore::new());
        let topic = FailureTopic::new(Arc::clone(&store), "queue-bucket");
        let record = test_record();

        topic.publish(&record).await.unwrap();

        let notices = topic.notices(DEFAULT_SUBSCRIPTION, 10).await.unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].message, record.to_text().unwrap());

        let decoded: FailureRecord = serde_json::from_str(&notices[0].message).unwrap();
        assert_eq!(decoded, record);
    }
}
