use chrono::Duration;

/// Default key prefix for queue objects.
pub const DEFAULT_QUEUE_PREFIX: &str = "queue";

/// Default visibility timeout: six times the default worker time budget.
pub const DEFAULT_VISIBILITY_TIMEOUT_SECS: i64 = 90 * 60;

/// Default maximum deliveries before a message is dead-lettered.
pub const DEFAULT_MAX_RECEIVE_COUNT: u32 = 1;

/// Default retention for queue and dead-letter messages.
pub const DEFAULT_RETENTION_DAYS: i64 = 14;

/// Configuration for a [`super::WorkQueue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Container holding all queue objects.
    pub container: String,

    /// Key prefix under which messages and indexes live.
    pub prefix: String,

    /// How long a delivered message stays hidden before it counts as
    /// abandoned. Must exceed the worst-case worker execution time with a
    /// safety margin, or the broker will dead-letter messages still
    /// legitimately in flight.
    pub visibility_timeout: Duration,

    /// Maximum deliveries before a message is dead-lettered. The default of
    /// 1 pushes all retry responsibility onto whatever triages the
    /// dead-letter queue.
    pub max_receive_count: u32,

    /// How long messages (queued or dead-lettered) are retained before the
    /// sweeper purges them.
    pub retention: Duration,
}

impl QueueConfig {
    /// Creates a config for the given container with the default policy:
    /// 90 minute visibility, single delivery, 14 day retention.
    #[must_use]
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            prefix: DEFAULT_QUEUE_PREFIX.to_string(),
            visibility_timeout: Duration::seconds(DEFAULT_VISIBILITY_TIMEOUT_SECS),
            max_receive_count: DEFAULT_MAX_RECEIVE_COUNT,
            retention: Duration::days(DEFAULT_RETENTION_DAYS),
        }
    }

    /// Overrides the key prefix, e.g. to host several queues in one
    /// container.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Overrides the visibility timeout.
    #[must_use]
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Overrides the maximum receive count.
    #[must_use]
    pub const fn with_max_receive_count(mut self, count: u32) -> Self {
        self.max_receive_count = count;
        self
    }

    /// Overrides the retention window.
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}
