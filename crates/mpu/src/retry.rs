//! Compose with exponential backoff on rate-limit responses.
//!
//! The store rate-limits compose calls per destination object. A rate-limited
//! attempt `a` is retried after `2^(a+1) * base + jitter` while `a` is below the
//! retry ceiling; anything else is returned to the caller immediately.

use crate::error::MpuResult;
use crate::metrics;
use rand::Rng;
use splice_core::config::MpuConfig;
use splice_storage::{ObjectStore, ObjectVersion};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Source of the random delay added to each backoff.
pub trait JitterSource: Send + Sync {
    /// Pick a delay in `[min, max)`.
    fn jitter(&self, min: Duration, max: Duration) -> Duration;
}

/// Uniform jitter from the thread-local RNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn jitter(&self, min: Duration, max: Duration) -> Duration {
        let (min, max) = (min.as_millis() as u64, max.as_millis() as u64);
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::rng().random_range(min..max))
    }
}

/// Backoff parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `max_retries + 1` calls at most.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&MpuConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &MpuConfig) -> Self {
        Self {
            max_retries: config.max_compose_retries,
            base_delay: config.retry_base_delay(),
            jitter_min: Duration::from_millis(config.retry_jitter_min_ms),
            jitter_max: Duration::from_millis(config.retry_jitter_max_ms),
        }
    }

    /// Backoff before retrying a rate-limited attempt, jitter excluded.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt + 1))
    }
}

/// Issues compose calls, retrying rate-limited ones.
pub struct ComposeRetrier {
    store: Arc<dyn ObjectStore>,
    policy: RetryPolicy,
    jitter: Arc<dyn JitterSource>,
}

impl ComposeRetrier {
    pub fn new(store: Arc<dyn ObjectStore>, policy: RetryPolicy) -> Self {
        Self {
            store,
            policy,
            jitter: Arc::new(RandomJitter),
        }
    }

    /// Replace the jitter source.
    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Compose `sources` into `bucket/key`, starting at attempt 0.
    pub async fn compose(
        &self,
        bucket: &str,
        key: &str,
        sources: &[String],
    ) -> MpuResult<ObjectVersion> {
        self.compose_from(bucket, key, sources, 0).await
    }

    /// Compose starting from an explicit attempt number.
    pub async fn compose_from(
        &self,
        bucket: &str,
        key: &str,
        sources: &[String],
        mut attempt: u32,
    ) -> MpuResult<ObjectVersion> {
        loop {
            metrics::COMPOSE_CALLS.inc();
            match self.store.compose(bucket, key, sources).await {
                Ok(version) => {
                    debug!(bucket, key, sources = sources.len(), attempt, "composed");
                    return Ok(version);
                }
                Err(err) if err.is_rate_limited() && attempt < self.policy.max_retries => {
                    let delay = self.policy.backoff(attempt)
                        + self
                            .jitter
                            .jitter(self.policy.jitter_min, self.policy.jitter_max);
                    warn!(
                        bucket,
                        key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "compose rate limited, backing off"
                    );
                    metrics::COMPOSE_RATE_LIMIT_RETRIES.inc();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_rate_limited() {
                        metrics::COMPOSE_RATE_LIMIT_EXHAUSTED.inc();
                        warn!(bucket, key, attempt, "compose still rate limited, giving up");
                    }
                    return Err(err.into());
                }
            }
        }
    }
}
