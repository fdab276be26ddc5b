//! Caller-facing multipart upload API.

use crate::error::{MpuError, MpuResult};
use crate::gc::{GarbageCollector, GcStats};
use crate::pipeline::UploadPipeline;
use crate::reducer::MergeTreeReducer;
use crate::registry::{ListPartsOutput, PartRegistry};
use crate::retry::{ComposeRetrier, JitterSource, RetryPolicy};
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use splice_core::config::{BucketConfig, MpuConfig};
use splice_core::{
    CompletedPart, CompletedUpload, CopySource, CreateMultipartUpload, PartDescriptor, UploadId,
    UploadSession, UploadTarget,
};
use splice_storage::ObjectStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

/// Multipart uploads on top of a compose-only object store.
pub struct MultipartBackend {
    buckets: BucketConfig,
    registry: PartRegistry,
    pipeline: UploadPipeline,
    /// Uploads with a complete or abort in progress.
    active: DashMap<UploadId, ()>,
}

impl MultipartBackend {
    pub fn new(store: Arc<dyn ObjectStore>, buckets: BucketConfig, config: &MpuConfig) -> Self {
        let retrier = ComposeRetrier::new(store.clone(), RetryPolicy::from_config(config));
        Self::with_retrier(store, buckets, config, retrier)
    }

    /// Build with a custom jitter source for the compose backoff.
    pub fn with_jitter(
        store: Arc<dyn ObjectStore>,
        buckets: BucketConfig,
        config: &MpuConfig,
        jitter: Arc<dyn JitterSource>,
    ) -> Self {
        let retrier = ComposeRetrier::new(store.clone(), RetryPolicy::from_config(config))
            .with_jitter(jitter);
        Self::with_retrier(store, buckets, config, retrier)
    }

    fn with_retrier(
        store: Arc<dyn ObjectStore>,
        buckets: BucketConfig,
        config: &MpuConfig,
        retrier: ComposeRetrier,
    ) -> Self {
        let retrier = Arc::new(retrier);
        let reducer =
            MergeTreeReducer::new(store.clone(), retrier.clone(), config.max_concurrent_merges);
        let gc = GarbageCollector::new(
            store.clone(),
            config.gc_page_size,
            config.gc_delete_concurrency,
        );
        let registry = PartRegistry::new(store.clone(), &buckets.scratch, &buckets.overflow);
        let pipeline = UploadPipeline::new(store, retrier, reducer, gc, config.cleanup_on_failure);

        Self {
            buckets,
            registry,
            pipeline,
            active: DashMap::new(),
        }
    }

    /// Rebuild the session a caller refers to.
    pub fn session(&self, target: &UploadTarget) -> UploadSession {
        UploadSession::from_target(target, &self.buckets.scratch, &self.buckets.overflow)
    }

    pub async fn create_multipart_upload(
        &self,
        request: CreateMultipartUpload,
    ) -> MpuResult<UploadSession> {
        self.registry.create(request).await
    }

    pub async fn upload_part(
        &self,
        target: &UploadTarget,
        part_number: u32,
        body: Bytes,
    ) -> MpuResult<PartDescriptor> {
        self.registry
            .upload_part(&self.session(target), part_number, body)
            .await
    }

    pub async fn upload_part_copy(
        &self,
        target: &UploadTarget,
        part_number: u32,
        source: &CopySource,
    ) -> MpuResult<PartDescriptor> {
        self.registry
            .upload_part_copy(&self.session(target), part_number, source)
            .await
    }

    pub async fn list_parts(
        &self,
        target: &UploadTarget,
        max_parts: Option<usize>,
    ) -> MpuResult<ListPartsOutput> {
        self.registry
            .list_parts(&self.session(target), max_parts)
            .await
    }

    #[instrument(skip(self, target, parts), fields(upload_id = %target.upload_id))]
    pub async fn complete_multipart_upload(
        &self,
        target: &UploadTarget,
        parts: &[CompletedPart],
    ) -> MpuResult<CompletedUpload> {
        let _guard = self.claim(&target.upload_id)?;
        self.pipeline.complete(&self.session(target), parts).await
    }

    #[instrument(skip(self, target), fields(upload_id = %target.upload_id))]
    pub async fn abort_multipart_upload(&self, target: &UploadTarget) -> MpuResult<GcStats> {
        let _guard = self.claim(&target.upload_id)?;
        self.pipeline.abort(&self.session(target)).await
    }

    pub async fn get_object_tagging(
        &self,
        _bucket: &str,
        _key: &str,
    ) -> MpuResult<BTreeMap<String, String>> {
        Err(MpuError::NotImplemented("GetObjectTagging"))
    }

    pub async fn put_object_tagging(
        &self,
        _bucket: &str,
        _key: &str,
        _tags: BTreeMap<String, String>,
    ) -> MpuResult<()> {
        Err(MpuError::NotImplemented("PutObjectTagging"))
    }

    pub async fn delete_object_tagging(&self, _bucket: &str, _key: &str) -> MpuResult<()> {
        Err(MpuError::NotImplemented("DeleteObjectTagging"))
    }

    /// Mark an upload busy until the returned guard is dropped.
    fn claim(&self, upload_id: &UploadId) -> MpuResult<ActiveUpload<'_>> {
        match self.active.entry(upload_id.clone()) {
            Entry::Occupied(_) => Err(MpuError::UploadBusy(upload_id.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(());
                Ok(ActiveUpload {
                    active: &self.active,
                    upload_id: upload_id.clone(),
                })
            }
        }
    }
}

struct ActiveUpload<'a> {
    active: &'a DashMap<UploadId, ()>,
    upload_id: UploadId,
}

impl Drop for ActiveUpload<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.upload_id);
    }
}
