//! Completion: reduce the parts to one object, promote it, clean up.
//!
//! ```text
//! parts/{n}    --compose 32:1-->  mpu1/{i}      scratch   (<= 313)
//! mpu1/{i}     --compose 32:1-->  mpu2/{i}      scratch   (<= 10)
//! mpu2/{i}     --copy---------->  overflow/{i}  overflow  (component count reset)
//! overflow/*   --compose------->  final         overflow  (skipped for one input)
//! final        --copy---------->  destination, attributes from `init`
//! ```

use crate::error::{MpuError, MpuResult};
use crate::gc::GarbageCollector;
use crate::metrics;
use crate::reducer::{MergeNode, MergeTreeReducer, TempLedger};
use crate::retry::ComposeRetrier;
use splice_core::config::CleanupOnFailure;
use splice_core::{
    BucketRole, CompletedPart, CompletedUpload, KeyRequest, MAX_PART_NUMBER, MAX_PARTS,
    MergeLevel, UploadSession,
};
use splice_storage::{MetadataDirective, ObjectRef, ObjectStore};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Check a completion request before any storage call.
pub fn validate_completed_parts(parts: &[CompletedPart]) -> MpuResult<()> {
    if parts.is_empty() {
        return Err(MpuError::InvalidPart(
            "completion requires at least one part".to_string(),
        ));
    }
    if parts.len() > MAX_PARTS {
        return Err(MpuError::InvalidPart(format!(
            "{} parts exceed the maximum of {MAX_PARTS}",
            parts.len()
        )));
    }

    let mut previous: Option<u32> = None;
    for part in parts {
        let current = part.part_number;
        if current == 0 || current > MAX_PART_NUMBER {
            return Err(MpuError::InvalidPart(format!(
                "part number {current} outside 1..={MAX_PART_NUMBER}"
            )));
        }
        if let Some(previous) = previous
            && current <= previous
        {
            return Err(MpuError::InvalidPartOrder { previous, current });
        }
        previous = Some(current);
    }
    Ok(())
}

/// Drives a completion through every reduction stage.
#[derive(Clone)]
pub struct UploadPipeline {
    store: Arc<dyn ObjectStore>,
    retrier: Arc<ComposeRetrier>,
    reducer: MergeTreeReducer,
    gc: GarbageCollector,
    cleanup_on_failure: CleanupOnFailure,
}

impl UploadPipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        retrier: Arc<ComposeRetrier>,
        reducer: MergeTreeReducer,
        gc: GarbageCollector,
        cleanup_on_failure: CleanupOnFailure,
    ) -> Self {
        Self {
            store,
            retrier,
            reducer,
            gc,
            cleanup_on_failure,
        }
    }

    /// Assemble the listed parts into the destination object.
    ///
    /// Once promoted the object stays promoted: an error while deleting the
    /// temporaries afterwards is still returned.
    #[instrument(skip(self, session, parts), fields(upload_id = %session.upload_id, parts = parts.len()))]
    pub async fn complete(
        &self,
        session: &UploadSession,
        parts: &[CompletedPart],
    ) -> MpuResult<CompletedUpload> {
        validate_completed_parts(parts)?;
        let started = Instant::now();
        let ledger = TempLedger::new();

        let promoted = match self.merge(session, parts, &ledger).await {
            Ok(assembled) => self.promote(session, &assembled).await,
            Err(err) => Err(err),
        };
        let completed = match promoted {
            Ok(completed) => completed,
            Err(err) => {
                metrics::record_failure(err.kind());
                warn!(error = %err, policy = ?self.cleanup_on_failure, "completion failed");
                self.cleanup_after_failure(session, &ledger).await;
                return Err(err);
            }
        };

        metrics::UPLOADS_COMPLETED.inc();
        metrics::COMPLETION_DURATION.observe(started.elapsed().as_secs_f64());
        info!(
            bucket = %completed.bucket,
            key = %completed.key,
            "multipart upload completed"
        );

        self.gc.collect(session).await?;
        Ok(completed)
    }

    /// Run the four reduction stages and return the object to promote.
    async fn merge(
        &self,
        session: &UploadSession,
        parts: &[CompletedPart],
        ledger: &TempLedger,
    ) -> MpuResult<ObjectRef> {
        let part_keys: Vec<String> = parts
            .iter()
            .map(|part| session.temp_key(KeyRequest::Part(part.part_number)))
            .collect();

        let first = self
            .reducer
            .reduce(session, MergeLevel::FirstMerge, &part_keys, ledger)
            .await?;
        let second = self
            .reducer
            .reduce(session, MergeLevel::SecondMerge, &names(&first), ledger)
            .await?;
        let overflow = self
            .reducer
            .transfer(
                session,
                BucketRole::Scratch,
                MergeLevel::OverflowCopy,
                &names(&second),
                ledger,
            )
            .await?;
        info!(
            first = first.len(),
            second = second.len(),
            overflow = overflow.len(),
            "reduction levels done"
        );

        let bucket = session.bucket_for(MergeLevel::FinalMerge.bucket_role());
        if let [only] = overflow.as_slice() {
            return Ok(ObjectRef::new(bucket, &only.name));
        }
        let final_key = session.temp_key(KeyRequest::Level(MergeLevel::FinalMerge));
        ledger.record(bucket, &final_key);
        self.retrier
            .compose(bucket, &final_key, &names(&overflow))
            .await?;
        Ok(ObjectRef::new(bucket, final_key))
    }

    /// Copy the assembled object to the destination with the `init` attributes.
    async fn promote(
        &self,
        session: &UploadSession,
        assembled: &ObjectRef,
    ) -> MpuResult<CompletedUpload> {
        let init = self
            .store
            .head(
                &session.scratch_bucket,
                &session.temp_key(KeyRequest::InitPlaceholder),
            )
            .await?;

        metrics::COPY_CALLS.inc();
        let version = self
            .store
            .copy(
                assembled,
                &ObjectRef::new(&session.bucket, &session.key),
                MetadataDirective::Replace(init.attributes),
            )
            .await?;

        Ok(CompletedUpload {
            bucket: session.bucket.clone(),
            key: session.key.clone(),
            version: version.generation,
            etag: version.etag,
        })
    }

    /// Apply the configured policy. Errors are logged, never returned: the
    /// caller reports the failure that triggered the cleanup.
    async fn cleanup_after_failure(&self, session: &UploadSession, ledger: &TempLedger) {
        let result = match self.cleanup_on_failure {
            CleanupOnFailure::Retain => return,
            CleanupOnFailure::Intermediates => self.gc.delete_objects(ledger.entries()).await,
            CleanupOnFailure::Session => self.gc.collect(session).await.map(|s| s.total_deleted()),
        };
        match result {
            Ok(deleted) => info!(deleted, "cleaned up after failed completion"),
            Err(err) => warn!(error = %err, "cleanup after failed completion failed"),
        }
    }

    /// Delete every temporary object of the session.
    pub async fn abort(&self, session: &UploadSession) -> MpuResult<crate::gc::GcStats> {
        let stats = self.gc.collect(session).await?;
        metrics::UPLOADS_ABORTED.inc();
        info!(upload_id = %session.upload_id, "multipart upload aborted");
        Ok(stats)
    }
}

fn names(nodes: &[MergeNode]) -> Vec<String> {
    nodes.iter().map(|node| node.name.clone()).collect()
}
