use super::memory_store::MemoryStore;
use bytes::Bytes;
use splice_core::config::{BucketConfig, CleanupOnFailure, MpuConfig};
use splice_core::{CompletedPart, UploadId, UploadSession, UploadTarget};
use splice_mpu::{JitterSource, MultipartBackend};
use std::sync::Arc;
use std::time::Duration;

pub const SCRATCH: &str = "scratch";
pub const OVERFLOW: &str = "overflow";

/// Jitter that always returns the same delay.
#[derive(Clone, Copy, Debug)]
pub struct FixedJitter(pub Duration);

impl JitterSource for FixedJitter {
    fn jitter(&self, _min: Duration, _max: Duration) -> Duration {
        self.0
    }
}

#[allow(dead_code)]
pub fn buckets() -> BucketConfig {
    BucketConfig {
        scratch: SCRATCH.to_string(),
        overflow: OVERFLOW.to_string(),
    }
}

/// Default engine settings with a given cleanup policy.
#[allow(dead_code)]
pub fn config_with_cleanup(cleanup_on_failure: CleanupOnFailure) -> MpuConfig {
    MpuConfig {
        cleanup_on_failure,
        ..MpuConfig::default()
    }
}

#[allow(dead_code)]
pub fn backend_with(store: &Arc<MemoryStore>, config: &MpuConfig) -> MultipartBackend {
    MultipartBackend::with_jitter(
        store.clone(),
        buckets(),
        config,
        Arc::new(FixedJitter(Duration::from_millis(100))),
    )
}

/// Session rooted at `dest/{key}` with the test buckets.
#[allow(dead_code)]
pub fn session(key: &str) -> UploadSession {
    let target = UploadTarget::new("dest", key, UploadId::new());
    UploadSession::from_target(&target, SCRATCH, OVERFLOW)
}

/// Distinct, recognizable body for a part.
#[allow(dead_code)]
pub fn part_body(part_number: u32) -> Bytes {
    Bytes::from(format!("<{part_number}>"))
}

#[allow(dead_code)]
pub fn completed_parts(numbers: impl IntoIterator<Item = u32>) -> Vec<CompletedPart> {
    numbers.into_iter().map(CompletedPart::new).collect()
}

/// Upload parts through the backend and return the expected assembled body.
#[allow(dead_code)]
pub async fn upload_parts(
    backend: &MultipartBackend,
    target: &UploadTarget,
    numbers: impl IntoIterator<Item = u32>,
) -> Vec<u8> {
    let mut expected = Vec::new();
    for n in numbers {
        let body = part_body(n);
        expected.extend_from_slice(&body);
        backend.upload_part(target, n, body).await.unwrap();
    }
    expected
}
