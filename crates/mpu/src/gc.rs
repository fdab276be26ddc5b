//! Deletion of an upload's temporary objects.

use crate::error::MpuResult;
use crate::metrics;
use futures::{StreamExt, TryStreamExt, stream};
use serde::Serialize;
use splice_core::UploadSession;
use splice_storage::{MAX_PAGE_SIZE, ObjectRef, ObjectStore, StorageError};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Statistics from a cleanup run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GcStats {
    /// Objects removed from the scratch bucket.
    pub scratch_deleted: u64,
    /// Objects removed from the overflow bucket.
    pub overflow_deleted: u64,
    /// Listing calls issued.
    pub listings: u64,
}

impl GcStats {
    pub fn total_deleted(&self) -> u64 {
        self.scratch_deleted + self.overflow_deleted
    }
}

/// Deletes every object under an upload's prefix in both temporary buckets.
#[derive(Clone)]
pub struct GarbageCollector {
    store: Arc<dyn ObjectStore>,
    page_size: usize,
    delete_concurrency: usize,
}

impl GarbageCollector {
    /// `page_size` is clamped to what a single listing can return.
    pub fn new(store: Arc<dyn ObjectStore>, page_size: usize, delete_concurrency: usize) -> Self {
        Self {
            store,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            delete_concurrency: delete_concurrency.max(1),
        }
    }

    /// Remove the session's objects from the scratch and overflow buckets.
    ///
    /// Both buckets are swept concurrently. The scratch bucket is listed again
    /// after every full page; the overflow bucket never holds more than a page.
    /// A failing branch does not stop the other one; the first error is
    /// returned once both have finished.
    #[instrument(skip(self, session), fields(upload_id = %session.upload_id))]
    pub async fn collect(&self, session: &UploadSession) -> MpuResult<GcStats> {
        let prefix = session.prefix();
        let (scratch, overflow) = tokio::join!(
            self.drain(&session.scratch_bucket, &prefix),
            self.sweep(&session.overflow_bucket, &prefix),
        );
        if let (Err(_), Err(err)) = (&scratch, &overflow) {
            warn!(bucket = %session.overflow_bucket, error = %err, "overflow cleanup failed");
        }
        let scratch = scratch?;
        let overflow = overflow?;

        let stats = GcStats {
            scratch_deleted: scratch.0,
            overflow_deleted: overflow.0,
            listings: scratch.1 + overflow.1,
        };
        info!(
            scratch_deleted = stats.scratch_deleted,
            overflow_deleted = stats.overflow_deleted,
            listings = stats.listings,
            "temporary objects removed"
        );
        Ok(stats)
    }

    /// Delete specific objects, tolerating ones that were never created.
    #[instrument(skip(self, objects), fields(objects = objects.len()))]
    pub async fn delete_objects(&self, objects: Vec<ObjectRef>) -> MpuResult<u64> {
        let deleted = stream::iter(objects)
            .map(|object| async move { self.delete_one(&object.bucket, &object.key).await })
            .buffer_unordered(self.delete_concurrency)
            .try_fold(0u64, |acc, n| async move { Ok(acc + n) })
            .await?;
        Ok(deleted)
    }

    /// List and delete until a short page comes back. Returns (deleted, listings).
    async fn drain(&self, bucket: &str, prefix: &str) -> MpuResult<(u64, u64)> {
        let mut deleted = 0;
        let mut listings = 0;
        loop {
            let page = self.store.list(bucket, prefix, self.page_size).await?;
            listings += 1;
            let count = page.objects.len();
            deleted += self.delete_page(bucket, page.objects.into_iter().map(|o| o.key)).await?;
            debug!(bucket, count, "deleted listing page");
            if count < self.page_size {
                return Ok((deleted, listings));
            }
        }
    }

    /// One listing, then delete what it returned. Returns (deleted, listings).
    async fn sweep(&self, bucket: &str, prefix: &str) -> MpuResult<(u64, u64)> {
        let page = self.store.list(bucket, prefix, self.page_size).await?;
        let deleted = self
            .delete_page(bucket, page.objects.into_iter().map(|o| o.key))
            .await?;
        Ok((deleted, 1))
    }

    async fn delete_page(
        &self,
        bucket: &str,
        keys: impl Iterator<Item = String>,
    ) -> MpuResult<u64> {
        let deleted = stream::iter(keys)
            .map(|key| async move { self.delete_one(bucket, &key).await })
            .buffer_unordered(self.delete_concurrency)
            .try_fold(0u64, |acc, n| async move { Ok(acc + n) })
            .await?;
        Ok(deleted)
    }

    /// Already-deleted objects count as deleted.
    async fn delete_one(&self, bucket: &str, key: &str) -> Result<u64, StorageError> {
        match self.store.delete(bucket, key).await {
            Ok(()) => {
                metrics::TEMP_OBJECTS_DELETED.inc();
                Ok(1)
            }
            Err(err) if err.is_not_found() => Ok(1),
            Err(err) => Err(err),
        }
    }
}
