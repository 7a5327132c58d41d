//! S3-backed [`ObjectStore`] implementation.

use std::env;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use async_trait::async_trait;
use aws_sdk_s3::{
    config::BehaviorVersion,
    error::SdkError,
    operation::{
        copy_object::CopyObjectError, delete_object::DeleteObjectError,
        get_object::GetObjectError, head_object::HeadObjectError,
        list_objects_v2::ListObjectsV2Error, put_object::PutObjectError,
    },
    primitives::ByteStream,
    Client,
};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};

use super::error::StorageError;
use super::{ListPage, ObjectStore, PutCondition};

/// Configuration for connecting to an S3-compatible storage service.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Optional custom endpoint URL (e.g., for local development with LocalStack/MinIO).
    pub endpoint: Option<String>,
    /// The AWS region.
    pub region: String,
    /// Container used for server-time clock sync. When absent, [`S3Store::now`]
    /// falls back to the local wall clock.
    pub clock_container: Option<String>,
}

impl S3Config {
    /// Creates a new `S3Config` from environment variables.
    ///
    /// Reads `S3_ENDPOINT` (optional) and `S3_REGION` (required).
    ///
    /// # Errors
    ///
    /// Returns an error if `S3_REGION` is not set.
    pub fn from_env() -> Result<Self, std::env::VarError> {
        let endpoint = env::var("S3_ENDPOINT").ok();
        let region = env::var("S3_REGION")?;

        Ok(Self {
            endpoint,
            region,
            clock_container: None,
        })
    }

    /// Creates a new `S3Config` with explicit values.
    #[must_use]
    pub const fn new(endpoint: Option<String>, region: String) -> Self {
        Self {
            endpoint,
            region,
            clock_container: None,
        }
    }

    /// Enables server-time clock sync against the given container.
    #[must_use]
    pub fn with_clock_container(mut self, container: impl Into<String>) -> Self {
        self.clock_container = Some(container.into());
        self
    }
}

/// A wrapper around the AWS S3 client that provides the operations the
/// backfill system needs, addressed per container.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
    config: S3Config,
    clock_state: Arc<RwLock<ClockState>>,
    clock_sync_lock: Arc<Mutex<()>>,
    clock_sync_interval: StdDuration,
    clock_key: String,
}

#[derive(Debug, Clone, Default)]
struct ClockState {
    last_server_time: Option<DateTime<Utc>>,
    last_sync_instant: Option<Instant>,
}

impl S3Store {
    /// Creates a new `S3Store` with the given configuration.
    ///
    /// This initializes the AWS SDK client, including support for custom
    /// endpoints (useful for local development with `LocalStack`, `MinIO`,
    /// etc.).
    pub async fn new(config: S3Config) -> Result<Self, StorageError> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        if let Some(ref endpoint) = config.endpoint {
            s3_config_builder = s3_config_builder
                .endpoint_url(endpoint)
                .force_path_style(true); // Required for most S3-compatible services
        }

        let client = Client::from_conf(s3_config_builder.build());

        Ok(Self {
            client,
            config,
            clock_state: Arc::new(RwLock::new(ClockState::default())),
            clock_sync_lock: Arc::new(Mutex::new(())),
            clock_sync_interval: StdDuration::from_secs(5),
            clock_key: "clock/now".to_string(),
        })
    }

    async fn cached_now(&self) -> Option<DateTime<Utc>> {
        let state = self.clock_state.read().await;
        let (Some(last_time), Some(last_sync)) = (state.last_server_time, state.last_sync_instant)
        else {
            return None;
        };
        drop(state);
        if last_sync.elapsed() > self.clock_sync_interval {
            return None;
        }

        let elapsed = Duration::from_std(last_sync.elapsed()).unwrap_or_else(|_| Duration::zero());
        Some(last_time + elapsed)
    }

    /// Syncs against S3 server time by writing the clock object and reading
    /// back its `Last-Modified` timestamp.
    async fn sync_server_time(&self, container: &str) -> Result<DateTime<Utc>, StorageError> {
        self.client
            .put_object()
            .bucket(container)
            .key(&self.clock_key)
            .body(ByteStream::from(vec![]))
            .send()
            .await
            .map_err(|ref err| map_put_error(err, container, &self.clock_key))?;

        let response = self
            .client
            .head_object()
            .bucket(container)
            .key(&self.clock_key)
            .send()
            .await
            .map_err(|ref err| map_head_error(err, container, &self.clock_key))?;

        let last_modified = response.last_modified().ok_or_else(|| {
            StorageError::ServiceError("Clock object missing last_modified".to_string())
        })?;
        let server_time =
            DateTime::from_timestamp(last_modified.secs(), last_modified.subsec_nanos())
                .ok_or_else(|| StorageError::ServiceError("Invalid clock timestamp".to_string()))?;

        Ok(server_time)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_object(
        &self,
        container: &str,
        key: &str,
        body: Vec<u8>,
        condition: PutCondition,
    ) -> Result<String, StorageError> {
        let mut request = self
            .client
            .put_object()
            .bucket(container)
            .key(key)
            .body(ByteStream::from(body));

        match condition {
            PutCondition::None => {}
            PutCondition::IfNoneMatch => {
                request = request.if_none_match("*");
            }
            PutCondition::IfMatch(ref etag) => {
                request = request.if_match(etag);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|ref err| map_put_error(err, container, key))?;

        let etag = response
            .e_tag()
            .map(ToString::to_string)
            .unwrap_or_default();

        Ok(etag)
    }

    async fn get_object(
        &self,
        container: &str,
        key: &str,
    ) -> Result<(Vec<u8>, String), StorageError> {
        let response = self
            .client
            .get_object()
            .bucket(container)
            .key(key)
            .send()
            .await
            .map_err(|ref err| map_get_error(err, container, key))?;

        let etag = response
            .e_tag()
            .map(ToString::to_string)
            .unwrap_or_default();

        let body = response
            .body
            .collect()
            .await
            .map_err(|err| StorageError::ServiceError(format!("Failed to read body: {err}")))?
            .into_bytes()
            .to_vec();

        Ok((body, etag))
    }

    async fn delete_object(&self, container: &str, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(container)
            .key(key)
            .send()
            .await
            .map_err(|ref err| map_delete_error(err))?;

        Ok(())
    }

    async fn copy_object(
        &self,
        source_container: &str,
        source_key: &str,
        dest_container: &str,
        dest_key: &str,
    ) -> Result<String, StorageError> {
        // CopySource format: bucket/key
        let copy_source = format!("{source_container}/{source_key}");

        let response = self
            .client
            .copy_object()
            .bucket(dest_container)
            .copy_source(&copy_source)
            .key(dest_key)
            .send()
            .await
            .map_err(|ref err| map_copy_error(err, source_container, source_key))?;

        let etag = response
            .copy_object_result()
            .and_then(|r| r.e_tag())
            .map(ToString::to_string)
            .unwrap_or_default();

        Ok(etag)
    }

    async fn list_page(
        &self,
        container: &str,
        prefix: &str,
        max_keys: i32,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, StorageError> {
        let mut request = self
            .client
            .list_objects_v2()
            .bucket(container)
            .prefix(prefix)
            .max_keys(max_keys);

        if let Some(token) = continuation_token {
            request = request.continuation_token(token);
        }

        let response = request
            .send()
            .await
            .map_err(|ref err| map_list_error(err))?;

        let keys = response
            .contents()
            .iter()
            .filter_map(|obj| obj.key().map(ToString::to_string))
            .collect();

        let next_token = response.next_continuation_token().map(ToString::to_string);

        Ok(ListPage { keys, next_token })
    }

    async fn head_object(&self, container: &str, key: &str) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(container)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(ref err) => {
                if is_not_found_head_error(err) {
                    Ok(false)
                } else {
                    Err(map_head_error(err, container, key))
                }
            }
        }
    }

    /// Returns the current time from S3, with a short-lived local cache.
    ///
    /// This avoids relying on the local wall clock for correctness-critical
    /// time decisions by syncing against S3 server time. Requires a clock
    /// container; without one, falls back to the local clock.
    async fn now(&self) -> Result<DateTime<Utc>, StorageError> {
        let Some(ref clock_container) = self.config.clock_container else {
            return Ok(Utc::now());
        };

        if let Some(cached) = self.cached_now().await {
            return Ok(cached);
        }

        let _lock = self.clock_sync_lock.lock().await;
        if let Some(cached) = self.cached_now().await {
            return Ok(cached);
        }

        let server_time = self.sync_server_time(clock_container).await?;
        let mut state = self.clock_state.write().await;
        state.last_server_time = Some(server_time);
        state.last_sync_instant = Some(Instant::now());
        drop(state);
        Ok(server_time)
    }
}

/// Maps `PutObject` errors to `StorageError`.
fn map_put_error(err: &SdkError<PutObjectError>, container: &str, key: &str) -> StorageError {
    match &err {
        SdkError::ServiceError(service_err) => {
            let raw = service_err.raw();
            if raw.status().as_u16() == 412 {
                return StorageError::PreconditionFailed {
                    container: container.to_string(),
                    key: key.to_string(),
                };
            }
            if raw.status().as_u16() == 403 {
                return StorageError::AccessDenied {
                    container: container.to_string(),
                };
            }
        }
        SdkError::DispatchFailure(ref dispatch_err) => {
            if dispatch_err.is_io() || dispatch_err.is_timeout() {
                return StorageError::ConnectionError(err.to_string());
            }
        }
        _ => {}
    }
    StorageError::ServiceError(err.to_string())
}

/// Maps `GetObject` errors to `StorageError`.
fn map_get_error(err: &SdkError<GetObjectError>, container: &str, key: &str) -> StorageError {
    match &err {
        SdkError::ServiceError(service_err) => {
            if matches!(service_err.err(), GetObjectError::NoSuchKey(_))
                || service_err.raw().status().as_u16() == 404
            {
                return StorageError::NotFound {
                    container: container.to_string(),
                    key: key.to_string(),
                };
            }
        }
        SdkError::DispatchFailure(ref dispatch_err) => {
            if dispatch_err.is_io() || dispatch_err.is_timeout() {
                return StorageError::ConnectionError(err.to_string());
            }
        }
        _ => {}
    }
    StorageError::ServiceError(err.to_string())
}

/// Maps `DeleteObject` errors to `StorageError`.
fn map_delete_error(err: &SdkError<DeleteObjectError>) -> StorageError {
    if let SdkError::DispatchFailure(ref dispatch_err) = &err {
        if dispatch_err.is_io() || dispatch_err.is_timeout() {
            return StorageError::ConnectionError(err.to_string());
        }
    }
    StorageError::ServiceError(err.to_string())
}

/// Maps `CopyObject` errors to `StorageError`.
fn map_copy_error(
    err: &SdkError<CopyObjectError>,
    source_container: &str,
    source_key: &str,
) -> StorageError {
    match &err {
        SdkError::ServiceError(service_err) => {
            // 404 means the copy source was not found
            if service_err.raw().status().as_u16() == 404 {
                return StorageError::NotFound {
                    container: source_container.to_string(),
                    key: source_key.to_string(),
                };
            }
        }
        SdkError::DispatchFailure(ref dispatch_err) => {
            if dispatch_err.is_io() || dispatch_err.is_timeout() {
                return StorageError::ConnectionError(err.to_string());
            }
        }
        _ => {}
    }
    StorageError::ServiceError(err.to_string())
}

/// Maps `ListObjectsV2` errors to `StorageError`.
fn map_list_error(err: &SdkError<ListObjectsV2Error>) -> StorageError {
    if let SdkError::DispatchFailure(ref dispatch_err) = err {
        if dispatch_err.is_io() || dispatch_err.is_timeout() {
            return StorageError::ConnectionError(err.to_string());
        }
    }

    StorageError::ServiceError(err.to_string())
}

/// Checks if a `HeadObject` error is a "not found" error.
fn is_not_found_head_error(err: &SdkError<HeadObjectError>) -> bool {
    if let SdkError::ServiceError(service_err) = err {
        if matches!(service_err.err(), HeadObjectError::NotFound(_)) {
            return true;
        }
        if service_err.raw().status().as_u16() == 404 {
            return true;
        }
    }
    false
}

/// Maps `HeadObject` errors to `StorageError`.
fn map_head_error(err: &SdkError<HeadObjectError>, container: &str, key: &str) -> StorageError {
    if is_not_found_head_error(err) {
        return StorageError::NotFound {
            container: container.to_string(),
            key: key.to_string(),
        };
    }

    if let SdkError::DispatchFailure(ref dispatch_err) = err {
        if dispatch_err.is_io() || dispatch_err.is_timeout() {
            return StorageError::ConnectionError(err.to_string());
        }
    }

    StorageError::ServiceError(err.to_string())
}
