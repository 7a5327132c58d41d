use serde::{Deserialize, Serialize};

/// Payload threaded between orchestrator steps.
///
/// Presence of `cursor` means the enumeration has more pages; its absence is
/// the sole termination signal for pagination. The running totals survive
/// across steps so a finished run reports how much it fanned out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationState {
    /// Opaque continuation token into the bucket enumeration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,

    /// Total objects enqueued across all pages so far.
    #[serde(default)]
    pub objects_enqueued: u64,

    /// Number of pages loaded so far.
    #[serde(default)]
    pub pages_loaded: u64,

    /// Error captured when a load step failed; set on the way into the
    /// fallback chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl OrchestrationState {
    /// Initial state for a run, optionally resuming from a caller-supplied
    /// cursor.
    #[must_use]
    pub fn starting_at(cursor: Option<String>) -> Self {
        Self {
            cursor,
            ..Self::default()
        }
    }

    /// Whether the enumeration has more pages to load.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.cursor.is_some()
    }
}

/// A typed error payload carried through orchestration state and failure
/// records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Short machine-readable error kind (e.g., `list_failed`).
    pub kind: String,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorInfo {
    /// Creates a new error payload.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Published on fatal pagination failure.
///
/// Terminal audit record: it is retained durably by the notification channel
/// and never reprocessed automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// The orchestration state at the moment of failure.
    pub state: OrchestrationState,
    /// The error that aborted the run.
    pub error: ErrorInfo,
}

impl FailureRecord {
    /// Serializes the entire failing payload as text, the form in which it
    /// is delivered to notification subscribers verbatim.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_absence_means_exhausted() {
        let state = OrchestrationState::starting_at(None);
        assert!(!state.has_more());

        let state = OrchestrationState::starting_at(Some("t1".to_string()));
        assert!(state.has_more());
    }

    #[test]
    fn serializes_without_absent_fields() {
        let state = OrchestrationState::default();
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, r#"{"objects_enqueued":0,"pages_loaded":0}"#);
    }

    #[test]
    fn failure_record_text_contains_cursor_and_error() {
        let record = FailureRecord {
            state: OrchestrationState {
                cursor: Some("t2".to_string()),
                objects_enqueued: 4,
                pages_loaded: 2,
                error: Some(ErrorInfo::new("list_failed", "listing unavailable")),
            },
            error: ErrorInfo::new("list_failed", "listing unavailable"),
        };

        let text = record.to_text().unwrap();
        assert!(text.contains(r#""cursor":"t2""#));
        assert!(text.contains("listing unavailable"));

        let back: FailureRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, record);
    }
}
