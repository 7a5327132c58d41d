//! Layered configuration.
//!
//! Resolution priority, highest first: environment variables, then the
//! `.rebucket.toml` config file, then built-in defaults. `load_config` only
//! resolves values; `validate_config` reports everything wrong at once so
//! startup failures are actionable.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::Deserialize;
use thiserror::Error;

use crate::loader::{LoaderConfig, DEFAULT_PAGE_SIZE};
use crate::orchestrator::OrchestratorConfig;
use crate::queue::QueueConfig;
use crate::storage::S3Config;
use crate::worker::ProcessorConfig;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".rebucket.toml";

/// Required ratio between the queue's visibility timeout and the worker
/// time budget. A message still legitimately in flight must never look
/// abandoned to the broker.
pub const VISIBILITY_SAFETY_FACTOR: u64 = 6;

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_WORKER_TIME_BUDGET_SECS: u64 = 15 * 60;
const DEFAULT_RETENTION_DAYS: i64 = 14;
const DEFAULT_RUN_TIMEOUT_DAYS: u64 = 30;
const DEFAULT_CONCURRENCY: usize = 4;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// Path that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML.
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        /// Path that could not be parsed.
        path: PathBuf,
        /// The underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// An environment variable held an unparseable value.
    #[error("Invalid value for {var}: {detail}")]
    InvalidEnv {
        /// The offending environment variable.
        var: &'static str,
        /// What was wrong with it.
        detail: String,
    },
}

/// Resolved configuration for a backfill deployment.
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// Optional custom storage endpoint (LocalStack/MinIO).
    pub endpoint: Option<String>,
    /// Storage region.
    pub region: String,
    /// Container being backfilled.
    pub source_container: String,
    /// Container holding queue, dead-letter, and notification objects. Must
    /// differ from the source container or the loader would enumerate the
    /// queue's own objects.
    pub queue_container: String,
    /// Listing prefix within the source container.
    pub prefix: String,
    /// Keys listed per loader page.
    pub page_size: i32,
    /// Container receiving processed copies; source container when `None`.
    pub dest_container: Option<String>,
    /// Suffix for the destination key's leading segment.
    pub processed_suffix: String,
    /// Whether workers delete the source object after a successful copy.
    pub delete_original: bool,
    /// Per-message worker time budget in seconds.
    pub worker_time_budget_secs: u64,
    /// Queue visibility timeout in seconds.
    pub visibility_timeout_secs: u64,
    /// Deliveries allowed before dead-lettering.
    pub max_receive_count: u32,
    /// Queue/dead-letter retention in days.
    pub retention_days: i64,
    /// Overall orchestrator run bound in days.
    pub run_timeout_days: u64,
    /// Worker pool concurrency.
    pub concurrency: usize,
}

/// On-disk shape of `.rebucket.toml`; every field optional.
#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
    endpoint: Option<String>,
    region: Option<String>,
    source_container: Option<String>,
    queue_container: Option<String>,
    prefix: Option<String>,
    page_size: Option<i32>,
    dest_container: Option<String>,
    processed_suffix: Option<String>,
    delete_original: Option<bool>,
    worker_time_budget_secs: Option<u64>,
    visibility_timeout_secs: Option<u64>,
    max_receive_count: Option<u32>,
    retention_days: Option<i64>,
    run_timeout_days: Option<u64>,
    concurrency: Option<usize>,
}

/// Loads configuration from the environment and an optional config file.
///
/// When `path` is `None`, `.rebucket.toml` is used if it exists; an explicit
/// path must exist.
///
/// # Errors
///
/// Returns `ConfigError` for unreadable/unparseable files or malformed
/// environment values.
pub fn load_config(path: Option<&Path>) -> Result<BackfillConfig, ConfigError> {
    let file = match path {
        Some(explicit) => read_file_config(explicit)?,
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.exists() {
                read_file_config(default)?
            } else {
                FileConfig::default()
            }
        }
    };

    let worker_time_budget_secs = env_parse("WORKER_TIME_BUDGET_SECS")?
        .or(file.worker_time_budget_secs)
        .unwrap_or(DEFAULT_WORKER_TIME_BUDGET_SECS);
    let visibility_timeout_secs = env_parse("VISIBILITY_TIMEOUT_SECS")?
        .or(file.visibility_timeout_secs)
        .unwrap_or(worker_time_budget_secs * VISIBILITY_SAFETY_FACTOR);

    Ok(BackfillConfig {
        endpoint: env_string("S3_ENDPOINT").or(file.endpoint),
        region: env_string("S3_REGION")
            .or(file.region)
            .unwrap_or_else(|| DEFAULT_REGION.to_string()),
        source_container: env_string("SOURCE_BUCKET")
            .or(file.source_container)
            .unwrap_or_default(),
        queue_container: env_string("QUEUE_BUCKET")
            .or(file.queue_container)
            .unwrap_or_default(),
        prefix: env_string("BACKFILL_PREFIX")
            .or(file.prefix)
            .unwrap_or_default(),
        page_size: env_parse("PAGE_SIZE")?
            .or(file.page_size)
            .unwrap_or(DEFAULT_PAGE_SIZE),
        dest_container: env_string("DEST_BUCKET").or(file.dest_container),
        processed_suffix: env_string("PROCESSED_SUFFIX")
            .or(file.processed_suffix)
            .unwrap_or_else(|| crate::worker::process::DEFAULT_PROCESSED_SUFFIX.to_string()),
        delete_original: env_bool("DELETE_ORIGINAL_FILES")
            .or(file.delete_original)
            .unwrap_or(false),
        worker_time_budget_secs,
        visibility_timeout_secs,
        max_receive_count: env_parse("MAX_RECEIVE_COUNT")?
            .or(file.max_receive_count)
            .unwrap_or(1),
        retention_days: env_parse("RETENTION_DAYS")?
            .or(file.retention_days)
            .unwrap_or(DEFAULT_RETENTION_DAYS),
        run_timeout_days: env_parse("RUN_TIMEOUT_DAYS")?
            .or(file.run_timeout_days)
            .unwrap_or(DEFAULT_RUN_TIMEOUT_DAYS),
        concurrency: env_parse("WORKER_CONCURRENCY")?
            .or(file.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY),
    })
}

/// Validates a resolved configuration, returning every problem found.
#[must_use]
pub fn validate_config(config: &BackfillConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if config.source_container.is_empty() {
        errors.push(
            "source container not configured - set SOURCE_BUCKET or add source_container to \
             .rebucket.toml"
                .to_string(),
        );
    }
    if config.queue_container.is_empty() {
        errors.push(
            "queue container not configured - set QUEUE_BUCKET or add queue_container to \
             .rebucket.toml"
                .to_string(),
        );
    }
    if !config.source_container.is_empty() && config.source_container == config.queue_container {
        errors.push(
            "queue container must differ from the source container, or the backfill would \
             enumerate its own queue objects"
                .to_string(),
        );
    }
    if config.page_size < 1 || config.page_size > 1000 {
        errors.push(format!(
            "page_size must be between 1 and 1000, got {}",
            config.page_size
        ));
    }
    if config.max_receive_count == 0 {
        errors.push("max_receive_count must be at least 1".to_string());
    }
    if config.concurrency == 0 {
        errors.push("concurrency must be at least 1".to_string());
    }
    if config.visibility_timeout_secs < config.worker_time_budget_secs * VISIBILITY_SAFETY_FACTOR {
        errors.push(format!(
            "visibility_timeout_secs ({}) must be at least {} times the worker time budget \
             ({}s), or in-flight messages will be dead-lettered while still being processed",
            config.visibility_timeout_secs, VISIBILITY_SAFETY_FACTOR, config.worker_time_budget_secs
        ));
    }

    errors
}

impl BackfillConfig {
    /// S3 connection settings, clock-synced against the queue container.
    #[must_use]
    pub fn s3_config(&self) -> S3Config {
        S3Config::new(self.endpoint.clone(), self.region.clone())
            .with_clock_container(self.queue_container.clone())
    }

    /// Work queue settings.
    #[must_use]
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig::new(self.queue_container.clone())
            .with_visibility_timeout(Duration::seconds(
                i64::try_from(self.visibility_timeout_secs).unwrap_or(i64::MAX),
            ))
            .with_max_receive_count(self.max_receive_count)
            .with_retention(Duration::days(self.retention_days))
    }

    /// Loader settings.
    #[must_use]
    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig::new(self.source_container.clone())
            .with_prefix(self.prefix.clone())
            .with_page_size(self.page_size)
    }

    /// Worker processing settings.
    #[must_use]
    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            dest_container: self.dest_container.clone(),
            processed_suffix: self.processed_suffix.clone(),
            delete_original: self.delete_original,
            time_budget: StdDuration::from_secs(self.worker_time_budget_secs),
        }
    }

    /// Orchestrator settings.
    #[must_use]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            run_timeout: StdDuration::from_secs(self.run_timeout_days * 24 * 60 * 60),
        }
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn env_string(var: &'static str) -> Option<String> {
    env::var(var).ok().filter(|value| !value.is_empty())
}

fn env_bool(var: &'static str) -> Option<bool> {
    env_string(var).map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"))
}

fn env_parse<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env_string(var) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|err: T::Err| ConfigError::InvalidEnv {
                var,
                detail: err.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_satisfy_the_visibility_ratio() {
        let file = write_config(
            r#"
            source_container = "data"
            queue_container = "backfill"
            "#,
        );
        let config = load_config(Some(file.path())).unwrap();

        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.worker_time_budget_secs, 900);
        assert_eq!(config.visibility_timeout_secs, 5400);
        assert!(!config.delete_original);
        assert!(validate_config(&config).is_empty());
    }

    #[test]
    fn file_values_are_resolved() {
        let file = write_config(
            r#"
            endpoint = "http://localhost:4566"
            source_container = "data"
            queue_container = "backfill"
            prefix = "logs/"
            page_size = 100
            delete_original = true
            worker_time_budget_secs = 60
            "#,
        );
        let config = load_config(Some(file.path())).unwrap();

        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:4566"));
        assert_eq!(config.prefix, "logs/");
        assert_eq!(config.page_size, 100);
        assert!(config.delete_original);
        // Visibility derives from the budget when not set explicitly.
        assert_eq!(config.visibility_timeout_secs, 360);
    }

    #[test]
    fn validation_rejects_a_thin_visibility_margin() {
        let file = write_config(
            r#"
            source_container = "data"
            queue_container = "backfill"
            worker_time_budget_secs = 900
            visibility_timeout_secs = 900
            "#,
        );
        let config = load_config(Some(file.path())).unwrap();

        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.contains("visibility_timeout_secs")));
    }

    #[test]
    fn validation_rejects_shared_source_and_queue_container() {
        let file = write_config(
            r#"
            source_container = "data"
            queue_container = "data"
            "#,
        );
        let config = load_config(Some(file.path())).unwrap();

        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.contains("must differ")));
    }

    #[test]
    fn missing_containers_are_reported_together() {
        let file = write_config("");
        let config = load_config(Some(file.path())).unwrap();

        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.contains("SOURCE_BUCKET")));
        assert!(errors.iter().any(|e| e.contains("QUEUE_BUCKET")));
    }
}
