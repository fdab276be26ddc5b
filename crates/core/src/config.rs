//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem store. Each bucket is a directory under `path`.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// Cloud store reached through its JSON API.
    Gcs {
        /// API endpoint (defaults to the public endpoint; set for emulators).
        endpoint: Option<String>,
        /// OAuth2 bearer token. Falls back to SPLICE_STORAGE__ACCESS_TOKEN.
        /// WARNING: Prefer env vars over storing secrets in config files.
        access_token: Option<String>,
        /// Project billed for requester-pays buckets.
        user_project: Option<String>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Filesystem { path } => {
                if path.as_os_str().is_empty() {
                    return Err("filesystem storage requires a non-empty path".to_string());
                }
                Ok(())
            }
            StorageConfig::Gcs {
                endpoint,
                access_token,
                ..
            } => {
                if let Some(endpoint) = endpoint
                    && endpoint.trim().is_empty()
                {
                    return Err("gcs endpoint must not be empty when set".to_string());
                }
                if let Some(token) = access_token
                    && token.trim().is_empty()
                {
                    return Err("gcs access_token must not be empty when set".to_string());
                }
                Ok(())
            }
        }
    }
}

/// Buckets used for temporary objects.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Bucket holding parts and the first two merge levels.
    #[serde(default = "default_scratch_bucket")]
    pub scratch: String,
    /// Bucket the second-level merges are copied into. Must differ from
    /// `scratch`: only a cross-bucket copy resets the component count.
    #[serde(default = "default_overflow_bucket")]
    pub overflow: String,
}

fn default_scratch_bucket() -> String {
    "splice-mpu".to_string()
}

fn default_overflow_bucket() -> String {
    "splice-mpu-overflow".to_string()
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            scratch: default_scratch_bucket(),
            overflow: default_overflow_bucket(),
        }
    }
}

impl BucketConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.scratch.is_empty() || self.overflow.is_empty() {
            return Err("buckets.scratch and buckets.overflow must be set".to_string());
        }
        if self.scratch == self.overflow {
            return Err(format!(
                "buckets.scratch and buckets.overflow must differ (both are {:?})",
                self.scratch
            ));
        }
        Ok(())
    }
}

/// What happens to temporary objects when completion fails before promotion.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CleanupOnFailure {
    /// Leave everything in place.
    Retain,
    /// Delete merge-level objects created by the failed attempt; keep `init`
    /// and the parts so completion can be retried without re-uploading.
    #[default]
    Intermediates,
    /// Delete every temporary object of the upload.
    Session,
}

/// Merge engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MpuConfig {
    /// Compose/copy calls in flight per reduction level.
    #[serde(default = "default_max_concurrent_merges")]
    pub max_concurrent_merges: usize,
    /// Retries after a rate-limited compose before the error is surfaced.
    #[serde(default = "default_max_compose_retries")]
    pub max_compose_retries: u32,
    /// Base of the exponential backoff in milliseconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Lower bound (inclusive) of the random jitter added to each backoff.
    #[serde(default = "default_retry_jitter_min_ms")]
    pub retry_jitter_min_ms: u64,
    /// Upper bound (exclusive) of the random jitter added to each backoff.
    #[serde(default = "default_retry_jitter_max_ms")]
    pub retry_jitter_max_ms: u64,
    /// Listing page size used when deleting a session's objects.
    #[serde(default = "default_gc_page_size")]
    pub gc_page_size: usize,
    /// Delete calls in flight per bucket during cleanup.
    #[serde(default = "default_gc_delete_concurrency")]
    pub gc_delete_concurrency: usize,
    /// Cleanup policy when completion fails before promotion.
    #[serde(default)]
    pub cleanup_on_failure: CleanupOnFailure,
}

fn default_max_concurrent_merges() -> usize {
    4
}

fn default_max_compose_retries() -> u32 {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_retry_jitter_min_ms() -> u64 {
    100
}

fn default_retry_jitter_max_ms() -> u64 {
    500
}

fn default_gc_page_size() -> usize {
    1000
}

fn default_gc_delete_concurrency() -> usize {
    10
}

impl Default for MpuConfig {
    fn default() -> Self {
        Self {
            max_concurrent_merges: default_max_concurrent_merges(),
            max_compose_retries: default_max_compose_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_jitter_min_ms: default_retry_jitter_min_ms(),
            retry_jitter_max_ms: default_retry_jitter_max_ms(),
            gc_page_size: default_gc_page_size(),
            gc_delete_concurrency: default_gc_delete_concurrency(),
            cleanup_on_failure: CleanupOnFailure::default(),
        }
    }
}

impl MpuConfig {
    /// Get the backoff base as a Duration.
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Validate engine configuration for settings that would break the pipeline.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_merges == 0 {
            return Err("mpu.max_concurrent_merges must be at least 1".to_string());
        }
        if self.gc_delete_concurrency == 0 {
            return Err("mpu.gc_delete_concurrency must be at least 1".to_string());
        }
        if self.gc_page_size == 0 || self.gc_page_size > 1000 {
            return Err(format!(
                "mpu.gc_page_size {} must be between 1 and 1000",
                self.gc_page_size
            ));
        }
        if self.retry_jitter_min_ms >= self.retry_jitter_max_ms {
            return Err(format!(
                "mpu.retry_jitter_min_ms ({}) must be below retry_jitter_max_ms ({})",
                self.retry_jitter_min_ms, self.retry_jitter_max_ms
            ));
        }
        // 2^(retries) * base must stay representable.
        if self.max_compose_retries > 16 {
            return Err(format!(
                "mpu.max_compose_retries {} exceeds maximum 16",
                self.max_compose_retries
            ));
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Temporary buckets.
    #[serde(default)]
    pub buckets: BucketConfig,
    /// Merge engine configuration.
    #[serde(default)]
    pub mpu: MpuConfig,
}

impl AppConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.buckets.validate()?;
        self.mpu.validate()
    }
}
