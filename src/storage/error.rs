use thiserror::Error;

/// Errors that can occur when interacting with object storage.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The requested object was not found (HTTP 404).
    #[error("Object not found: {container}/{key}")]
    NotFound {
        /// The container holding the object.
        container: String,
        /// The key of the object that was not found.
        key: String,
    },

    /// A conditional request failed (HTTP 412).
    /// This typically occurs when using `If-None-Match: *` and the object already exists,
    /// or when using `If-Match` with a mismatched `ETag`.
    #[error("Precondition failed for object: {container}/{key}")]
    PreconditionFailed {
        /// The container holding the object.
        container: String,
        /// The key of the object for which the precondition failed.
        key: String,
    },

    /// Failed to connect to the storage endpoint.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Failed to serialize or deserialize data.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Invalid or unsupported configuration.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Access denied (HTTP 403).
    #[error("Access denied to container '{container}'")]
    AccessDenied {
        /// The container that access was denied to.
        container: String,
    },

    /// Catch-all for other service errors.
    #[error("Storage error: {0}")]
    ServiceError(String),
}

impl StorageError {
    /// Returns a helpful suggestion for resolving this error.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => {
                "The object may have been deleted or never existed. \
                 Check that the container and key are correct."
            }
            Self::PreconditionFailed { .. } => {
                "Another process modified this object between your read and write. \
                 This is normal in high-concurrency environments - the system is \
                 working correctly to prevent conflicts."
            }
            Self::ConnectionError(_) => {
                "Check that your storage endpoint is correct and the service is \
                 running. For local development, ensure the S3-compatible service \
                 is started (e.g., docker compose up -d). Verify network \
                 connectivity with: curl <your-endpoint>"
            }
            Self::SerializationError(_) => {
                "The data could not be serialized or deserialized. This usually \
                 indicates corrupted data or a schema mismatch."
            }
            Self::ConfigurationError(_) => {
                "Check your configuration settings. Common issues include an \
                 invalid region, a missing bucket, or an incorrect bucket name."
            }
            Self::AccessDenied { .. } => {
                "Check that AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY are set \
                 correctly and that the credentials have permission to access \
                 this bucket."
            }
            Self::ServiceError(_) => {
                "An unexpected storage error occurred. Check the error message \
                 for details and verify your storage configuration is correct."
            }
        }
    }

    /// Returns a richly formatted error message with context and suggestions.
    ///
    /// This format is designed for CLI output to help users understand
    /// what went wrong and how to fix it.
    #[must_use]
    pub fn display_rich(&self) -> String {
        format!("Error: {}\n\nSuggestion:\n  {}", self, self.suggestion())
    }
}
