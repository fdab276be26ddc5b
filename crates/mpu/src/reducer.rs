//! Bounded fan-in reduction of an ordered object list.
//!
//! One reduction turns `n` objects into `ceil(n / 32)` objects named
//! `{level}/{position}`. Slices are merged concurrently, at most
//! `max_concurrent` at a time, and written into one slot per position so the
//! output order always equals the input order.

use crate::error::{MpuError, MpuResult};
use crate::metrics;
use crate::retry::ComposeRetrier;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use splice_core::{BucketRole, KeyRequest, MAX_COMPOSE_SOURCES, MergeLevel, UploadSession};
use splice_storage::{MetadataDirective, ObjectRef, ObjectStore, ObjectVersion};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

/// One output of a reduction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeNode {
    /// Object name within the level's bucket.
    pub name: String,
    /// 1-based position within the level, equal to the input slice index.
    pub position: u32,
    pub generation: Option<String>,
    pub etag: String,
    pub size: u64,
}

impl MergeNode {
    fn new(name: String, position: u32, version: ObjectVersion) -> Self {
        Self {
            name,
            position,
            generation: version.generation,
            etag: version.etag,
            size: version.size,
        }
    }
}

/// Names of the temporary objects a completion attempt may have created.
///
/// Names are recorded before the call that creates them is issued, so the
/// ledger also covers objects left behind by workers still running when a
/// sibling failed.
#[derive(Clone, Debug, Default)]
pub struct TempLedger {
    entries: Arc<Mutex<Vec<ObjectRef>>>,
}

impl TempLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, bucket: &str, key: &str) {
        self.lock().push(ObjectRef::new(bucket, key));
    }

    /// Snapshot of every recorded name, in recording order.
    pub fn entries(&self) -> Vec<ObjectRef> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ObjectRef>> {
        // A panic while pushing cannot leave the Vec inconsistent.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

enum MergeOp {
    Copy(ObjectRef),
    Compose(Vec<String>),
}

struct MergeJob {
    position: u32,
    bucket: String,
    output: String,
    op: MergeOp,
}

/// Runs one reduction level at a time.
#[derive(Clone)]
pub struct MergeTreeReducer {
    store: Arc<dyn ObjectStore>,
    retrier: Arc<ComposeRetrier>,
    max_concurrent: usize,
}

impl MergeTreeReducer {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        retrier: Arc<ComposeRetrier>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            retrier,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Reduce `inputs` 32:1 into `{level}/{position}` objects of the level's bucket.
    ///
    /// A slice holding a single object is copied instead of composed.
    #[instrument(skip(self, session, inputs, ledger), fields(upload_id = %session.upload_id, inputs = inputs.len()))]
    pub async fn reduce(
        &self,
        session: &UploadSession,
        level: MergeLevel,
        inputs: &[String],
        ledger: &TempLedger,
    ) -> MpuResult<Vec<MergeNode>> {
        let bucket = session.bucket_for(level.bucket_role()).to_string();
        let jobs = inputs
            .chunks(MAX_COMPOSE_SOURCES)
            .zip(1u32..)
            .map(|(slice, position)| MergeJob {
                position,
                bucket: bucket.clone(),
                output: session.temp_key(KeyRequest::LevelPosition(level, position)),
                op: match slice {
                    [single] => MergeOp::Copy(ObjectRef::new(&bucket, single)),
                    _ => MergeOp::Compose(slice.to_vec()),
                },
            })
            .collect();
        self.run(jobs, ledger).await
    }

    /// Copy each input from the `from` bucket into `{level}/{position}` of the
    /// level's bucket, one output per input.
    #[instrument(skip(self, session, inputs, ledger), fields(upload_id = %session.upload_id, inputs = inputs.len()))]
    pub async fn transfer(
        &self,
        session: &UploadSession,
        from: BucketRole,
        level: MergeLevel,
        inputs: &[String],
        ledger: &TempLedger,
    ) -> MpuResult<Vec<MergeNode>> {
        let source_bucket = session.bucket_for(from);
        let bucket = session.bucket_for(level.bucket_role()).to_string();
        let jobs = inputs
            .iter()
            .zip(1u32..)
            .map(|(input, position)| MergeJob {
                position,
                bucket: bucket.clone(),
                output: session.temp_key(KeyRequest::LevelPosition(level, position)),
                op: MergeOp::Copy(ObjectRef::new(source_bucket, input)),
            })
            .collect();
        self.run(jobs, ledger).await
    }

    /// Dispatch jobs under the concurrency ceiling and collect them in order.
    ///
    /// After the first failure no further job is dispatched. The error is
    /// returned only once every running job has settled, so that nothing is
    /// still writing when the ledger is used for cleanup.
    async fn run(&self, jobs: Vec<MergeJob>, ledger: &TempLedger) -> MpuResult<Vec<MergeNode>> {
        let mut slots: Vec<Option<MergeNode>> = vec![None; jobs.len()];
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let failed = Arc::new(AtomicBool::new(false));
        let mut in_flight = FuturesUnordered::new();

        for (index, job) in jobs.into_iter().enumerate() {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| MpuError::Worker(e.to_string()))?;
            if failed.load(Ordering::SeqCst) {
                debug!(position = job.position, "not dispatching after failure");
                break;
            }

            ledger.record(&job.bucket, &job.output);
            let store = self.store.clone();
            let retrier = self.retrier.clone();
            let failed = failed.clone();
            in_flight.push(tokio::spawn(async move {
                let result = execute(store.as_ref(), &retrier, job).await;
                if result.is_err() {
                    failed.store(true, Ordering::SeqCst);
                }
                drop(permit);
                (index, result)
            }));
        }

        let mut first_error = None;
        while let Some(joined) = in_flight.next().await {
            match joined {
                Ok((index, Ok(node))) => slots[index] = Some(node),
                Ok((_, Err(err))) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error = Some(MpuError::Worker(join_err.to_string()));
                    }
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| MpuError::Worker("merge level finished with an empty slot".to_string()))
    }
}

async fn execute(
    store: &dyn ObjectStore,
    retrier: &ComposeRetrier,
    job: MergeJob,
) -> MpuResult<MergeNode> {
    let version = match &job.op {
        MergeOp::Copy(source) => {
            metrics::COPY_CALLS.inc();
            store
                .copy(
                    source,
                    &ObjectRef::new(&job.bucket, &job.output),
                    MetadataDirective::Copy,
                )
                .await?
        }
        MergeOp::Compose(sources) => retrier.compose(&job.bucket, &job.output, sources).await?,
    };
    debug!(output = %job.output, position = job.position, "merged");
    Ok(MergeNode::new(job.output, job.position, version))
}
