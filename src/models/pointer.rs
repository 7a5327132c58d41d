use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identifies one unit of work: a single object in a container.
///
/// Pointers are immutable once created by the loader. Under at-least-once
/// delivery the same pointer may reach a worker more than once, so
/// processing must be idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPointer {
    /// The container (bucket) holding the object.
    pub container: String,

    /// The object key within the container.
    pub key: String,

    /// Optional metadata carried alongside the pointer.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ObjectPointer {
    /// Creates a pointer with no metadata.
    #[must_use]
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Returns a display form like `s3://container/key`.
    #[must_use]
    pub fn uri(&self) -> String {
        format!("s3://{}/{}", self.container, self.key)
    }
}

impl std::fmt::Display for ObjectPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uri())
    }
}
