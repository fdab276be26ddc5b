use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use splice_core::ObjectAttributes;
use splice_storage::error::{StorageError, StorageResult};
use splice_storage::traits::{
    ListPage, MetadataDirective, ObjectMeta, ObjectRef, ObjectStore, ObjectSummary, ObjectVersion,
    normalize_page_size,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::time::{Duration, Instant};

/// Components a composite object may be built from before compose refuses it.
pub const MAX_COMPONENTS: u32 = 1024;

#[derive(Clone, Debug)]
pub struct StoredObject {
    pub data: Bytes,
    pub attributes: ObjectAttributes,
    pub generation: u64,
    /// Source objects this object was composed from; reset by cross-bucket copies.
    pub components: u32,
}

/// Per-operation call counters.
#[derive(Debug, Default)]
pub struct CallCounters {
    pub put: AtomicUsize,
    pub head: AtomicUsize,
    pub get: AtomicUsize,
    pub list: AtomicUsize,
    pub copy: AtomicUsize,
    pub compose: AtomicUsize,
    pub delete: AtomicUsize,
}

#[allow(dead_code)]
impl CallCounters {
    pub fn total(&self) -> usize {
        [
            &self.put,
            &self.head,
            &self.get,
            &self.list,
            &self.copy,
            &self.compose,
            &self.delete,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }
}

/// Tracks concurrent calls and the high-water mark.
#[derive(Debug, Default)]
pub struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) -> InFlightGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(self)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct InFlightGuard<'a>(&'a InFlight);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Debug)]
pub struct ComposeRecord {
    pub bucket: String,
    pub key: String,
    pub sources: Vec<String>,
    pub at: Instant,
}

/// In-memory object store with instrumentation and fault injection.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    next_generation: AtomicU64,
    pub calls: CallCounters,
    /// Compose and copy calls.
    pub merges_in_flight: InFlight,
    pub deletes_in_flight: InFlight,
    rate_limited_composes: AtomicUsize,
    always_rate_limited: AtomicBool,
    failing_keys: Mutex<Vec<String>>,
    fail_deletes: AtomicBool,
    failing_listings: Mutex<Vec<String>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    op_delay: Mutex<Duration>,
    varied_delays: AtomicBool,
    compose_log: Mutex<Vec<ComposeRecord>>,
    copy_log: Mutex<Vec<(ObjectRef, ObjectRef)>>,
    list_log: Mutex<Vec<(String, usize)>>,
}

#[allow(dead_code)]
impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // ===== Fault injection =====

    /// Answer the next `n` compose calls with a rate-limit error.
    pub fn rate_limit_next_composes(&self, n: usize) {
        self.rate_limited_composes.store(n, Ordering::SeqCst);
    }

    /// Answer every compose call with a rate-limit error.
    pub fn rate_limit_all_composes(&self, enabled: bool) {
        self.always_rate_limited.store(enabled, Ordering::SeqCst);
    }

    /// Fail compose and copy calls whose destination key contains `fragment`.
    pub fn fail_writes_to(&self, fragment: &str) {
        self.failing_keys.lock().unwrap().push(fragment.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_keys.lock().unwrap().clear();
        self.fail_deletes.store(false, Ordering::SeqCst);
        self.failing_listings.lock().unwrap().clear();
    }

    /// Fail every list call on `bucket`.
    pub fn fail_listings_of(&self, bucket: &str) {
        self.failing_listings.lock().unwrap().push(bucket.to_string());
    }

    pub fn fail_deletes(&self, enabled: bool) {
        self.fail_deletes.store(enabled, Ordering::SeqCst);
    }

    /// Hold compose calls until the semaphore has permits.
    pub fn gate_composes(&self, gate: Arc<Semaphore>) {
        *self.gate.lock().unwrap() = Some(gate);
    }

    /// Delay compose, copy and delete calls.
    pub fn set_delay(&self, delay: Duration) {
        *self.op_delay.lock().unwrap() = delay;
    }

    /// Make the delay depend on the destination key, so calls finish out of order.
    pub fn vary_delays(&self, enabled: bool) {
        self.varied_delays.store(enabled, Ordering::SeqCst);
    }

    // ===== Inspection =====

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn keys(&self, bucket: &str, prefix: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub fn composes(&self) -> Vec<ComposeRecord> {
        self.compose_log.lock().unwrap().clone()
    }

    pub fn copies(&self) -> Vec<(ObjectRef, ObjectRef)> {
        self.copy_log.lock().unwrap().clone()
    }

    /// (bucket, objects returned) for every list call.
    pub fn listings(&self) -> Vec<(String, usize)> {
        self.list_log.lock().unwrap().clone()
    }

    /// Store an object without counting the call.
    pub fn seed(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data: data.into(),
                attributes: ObjectAttributes::default(),
                generation,
                components: 1,
            },
        );
    }

    // ===== Internals =====

    fn injected_failure(&self, key: &str) -> Option<StorageError> {
        let failing = self.failing_keys.lock().unwrap();
        failing
            .iter()
            .any(|fragment| key.contains(fragment.as_str()))
            .then(|| StorageError::Status {
                status: 500,
                message: format!("injected failure for {key}"),
            })
    }

    async fn delay(&self, key: &str) {
        let base = *self.op_delay.lock().unwrap();
        if base.is_zero() {
            return;
        }
        let factor = if self.varied_delays.load(Ordering::SeqCst) {
            1 + key.bytes().map(u32::from).sum::<u32>() % 7
        } else {
            1
        };
        tokio::time::sleep(base * factor).await;
    }

    fn insert(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        attributes: ObjectAttributes,
        components: u32,
    ) -> ObjectVersion {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let version = ObjectVersion {
            generation: Some(generation.to_string()),
            etag: format!("etag-{generation}"),
            size: data.len() as u64,
        };
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                attributes,
                generation,
                components,
            },
        );
        version
    }

    fn not_found(bucket: &str, key: &str) -> StorageError {
        StorageError::NotFound(format!("{bucket}/{key}"))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, bucket: &str, prefix: &str, max_keys: usize) -> StorageResult<ListPage> {
        self.calls.list.fetch_add(1, Ordering::SeqCst);
        if self.failing_listings.lock().unwrap().iter().any(|b| b == bucket) {
            return Err(StorageError::Status {
                status: 500,
                message: format!("injected listing failure for {bucket}"),
            });
        }
        // Same page ceiling as the real backends.
        let max_keys = normalize_page_size(max_keys);
        let objects = self.objects.lock().unwrap();
        let mut matching: Vec<ObjectSummary> = objects
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .take(max_keys + 1)
            .map(|((_, k), o)| ObjectSummary {
                key: k.clone(),
                size: o.data.len() as u64,
                etag: format!("etag-{}", o.generation),
            })
            .collect();
        let truncated = matching.len() > max_keys;
        matching.truncate(max_keys);
        self.list_log
            .lock()
            .unwrap()
            .push((bucket.to_string(), matching.len()));
        Ok(ListPage {
            objects: matching,
            truncated,
        })
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        attributes: &ObjectAttributes,
    ) -> StorageResult<ObjectVersion> {
        self.calls.put.fetch_add(1, Ordering::SeqCst);
        Ok(self.insert(bucket, key, data, attributes.clone(), 1))
    }

    async fn head(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta> {
        self.calls.head.fetch_add(1, Ordering::SeqCst);
        let object = self
            .object(bucket, key)
            .ok_or_else(|| Self::not_found(bucket, key))?;
        Ok(ObjectMeta {
            size: object.data.len() as u64,
            etag: format!("etag-{}", object.generation),
            generation: Some(object.generation.to_string()),
            attributes: object.attributes,
            last_modified: None,
        })
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        self.calls.get.fetch_add(1, Ordering::SeqCst);
        self.object(bucket, key)
            .map(|o| o.data)
            .ok_or_else(|| Self::not_found(bucket, key))
    }

    async fn copy(
        &self,
        source: &ObjectRef,
        dest: &ObjectRef,
        directive: MetadataDirective,
    ) -> StorageResult<ObjectVersion> {
        self.calls.copy.fetch_add(1, Ordering::SeqCst);
        self.copy_log
            .lock()
            .unwrap()
            .push((source.clone(), dest.clone()));
        if let Some(err) = self.injected_failure(&dest.key) {
            return Err(err);
        }

        let _in_flight = self.merges_in_flight.enter();
        self.delay(&dest.key).await;

        let object = self
            .object(&source.bucket, &source.key)
            .ok_or_else(|| Self::not_found(&source.bucket, &source.key))?;
        let attributes = match directive {
            MetadataDirective::Copy => object.attributes,
            MetadataDirective::Replace(attributes) => attributes,
        };
        let components = if source.bucket == dest.bucket {
            object.components
        } else {
            1
        };
        Ok(self.insert(&dest.bucket, &dest.key, object.data, attributes, components))
    }

    async fn compose(
        &self,
        bucket: &str,
        key: &str,
        sources: &[String],
    ) -> StorageResult<ObjectVersion> {
        self.calls.compose.fetch_add(1, Ordering::SeqCst);
        self.compose_log.lock().unwrap().push(ComposeRecord {
            bucket: bucket.to_string(),
            key: key.to_string(),
            sources: sources.to_vec(),
            at: Instant::now(),
        });
        if sources.is_empty() || sources.len() > 32 {
            return Err(StorageError::InvalidRequest(format!(
                "compose takes 1 to 32 sources, got {}",
                sources.len()
            )));
        }

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }
        if self.always_rate_limited.load(Ordering::SeqCst)
            || self
                .rate_limited_composes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(StorageError::RateLimited(format!("{bucket}/{key}")));
        }
        if let Some(err) = self.injected_failure(key) {
            return Err(err);
        }

        let _in_flight = self.merges_in_flight.enter();
        self.delay(key).await;

        let mut data = BytesMut::new();
        let mut components = 0;
        for source in sources {
            let object = self
                .object(bucket, source)
                .ok_or_else(|| Self::not_found(bucket, source))?;
            data.extend_from_slice(&object.data);
            components += object.components;
        }
        if components > MAX_COMPONENTS {
            return Err(StorageError::InvalidRequest(format!(
                "{bucket}/{key} would have {components} components"
            )));
        }
        Ok(self.insert(
            bucket,
            key,
            data.freeze(),
            ObjectAttributes::default(),
            components,
        ))
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Status {
                status: 503,
                message: "injected delete failure".to_string(),
            });
        }
        let _in_flight = self.deletes_in_flight.enter();
        self.delay(key).await;
        self.objects
            .lock()
            .unwrap()
            .remove(&(bucket.to_string(), key.to_string()))
            .map(|_| ())
            .ok_or_else(|| Self::not_found(bucket, key))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
