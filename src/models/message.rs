use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pointer::ObjectPointer;

/// Represents the status of a message in the work queue.
///
/// Messages move `Ready` -> `InFlight` on delivery. An acknowledged message
/// is deleted outright; an in-flight message whose visibility deadline
/// elapses is either requeued or moved to `DeadLettered` depending on how
/// many deliveries it has consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Waiting to be delivered to a consumer.
    Ready,
    /// Delivered and hidden until its visibility deadline.
    InFlight,
    /// Exhausted its allowed deliveries; retained for triage, never
    /// redelivered.
    DeadLettered,
}

/// Envelope carrying one [`ObjectPointer`] through the work queue.
///
/// The broker owns the delivery bookkeeping: `receive_count` is incremented
/// on every successful claim and `visible_deadline` marks when an in-flight
/// delivery is considered abandoned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Unique identifier for the message.
    pub id: Uuid,

    /// The unit of work this message delivers.
    pub pointer: ObjectPointer,

    /// Current status of the message.
    pub status: MessageStatus,

    /// Number of times this message has been delivered to a consumer.
    #[serde(default)]
    pub receive_count: u32,

    /// Deadline after which an in-flight delivery counts as abandoned.
    /// Set when claimed, cleared when requeued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_deadline: Option<DateTime<Utc>>,

    /// Timestamp when the message was enqueued.
    pub enqueued_at: DateTime<Utc>,

    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,

    /// Why the message was dead-lettered, if it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Timestamp when the message was moved to the dead-letter queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_lettered_at: Option<DateTime<Utc>>,
}

impl QueueMessage {
    /// Creates a new ready message for the given pointer.
    #[must_use]
    pub fn new(pointer: ObjectPointer, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            pointer,
            status: MessageStatus::Ready,
            receive_count: 0,
            visible_deadline: None,
            enqueued_at: now,
            updated_at: now,
            last_error: None,
            dead_lettered_at: None,
        }
    }

    /// Whether an in-flight delivery of this message has outlived its
    /// visibility deadline at `now`.
    #[must_use]
    pub fn is_abandoned_at(&self, now: DateTime<Utc>) -> bool {
        self.status == MessageStatus::InFlight
            && self.visible_deadline.is_some_and(|deadline| now > deadline)
    }
}
