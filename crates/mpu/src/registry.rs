//! Upload sessions and their parts.

use crate::error::{MpuError, MpuResult};
use crate::metrics;
use bytes::Bytes;
use serde::Serialize;
use splice_core::{
    CopySource, CreateMultipartUpload, KeyRequest, MAX_PART_NUMBER, ObjectAttributes,
    PartDescriptor, UploadId, UploadSession, part_number_from_key,
};
use splice_storage::{DEFAULT_PAGE_SIZE, MetadataDirective, ObjectRef, ObjectStore};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Parts of an upload, ordered by part number.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ListPartsOutput {
    pub parts: Vec<PartDescriptor>,
    /// More parts exist than were listed.
    pub truncated: bool,
}

/// Creates sessions and stores parts in the scratch bucket.
#[derive(Clone)]
pub struct PartRegistry {
    store: Arc<dyn ObjectStore>,
    scratch_bucket: String,
    overflow_bucket: String,
}

impl PartRegistry {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        scratch_bucket: impl Into<String>,
        overflow_bucket: impl Into<String>,
    ) -> Self {
        Self {
            store,
            scratch_bucket: scratch_bucket.into(),
            overflow_bucket: overflow_bucket.into(),
        }
    }

    /// Start an upload: mint an id and store the `init` placeholder that
    /// carries the caller's attributes until promotion.
    #[instrument(skip(self, request), fields(bucket = %request.bucket, key = %request.key))]
    pub async fn create(&self, request: CreateMultipartUpload) -> MpuResult<UploadSession> {
        if request.key.is_empty() {
            return Err(MpuError::InvalidPart("destination key must not be empty".to_string()));
        }
        let session = UploadSession {
            bucket: request.bucket,
            key: request.key,
            upload_id: UploadId::new(),
            scratch_bucket: self.scratch_bucket.clone(),
            overflow_bucket: self.overflow_bucket.clone(),
            attributes: request.attributes,
        };

        self.store
            .put(
                &session.scratch_bucket,
                &session.temp_key(KeyRequest::InitPlaceholder),
                Bytes::new(),
                &session.attributes,
            )
            .await?;

        metrics::UPLOADS_CREATED.inc();
        info!(upload_id = %session.upload_id, "multipart upload created");
        Ok(session)
    }

    /// Store a part body at `parts/{n}`. Re-uploading a number replaces the part.
    #[instrument(skip(self, session, body), fields(upload_id = %session.upload_id, size = body.len()))]
    pub async fn upload_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        body: Bytes,
    ) -> MpuResult<PartDescriptor> {
        validate_part_number(part_number)?;
        let key = session.temp_key(KeyRequest::Part(part_number));
        let version = self
            .store
            .put(
                &session.scratch_bucket,
                &key,
                body,
                &ObjectAttributes::default(),
            )
            .await?;

        metrics::PARTS_UPLOADED.inc();
        debug!(part_number, "part stored");
        Ok(PartDescriptor {
            part_number,
            key,
            size: version.size,
            etag: version.etag,
        })
    }

    /// Store a part by copying an existing object.
    #[instrument(skip(self, session), fields(upload_id = %session.upload_id, source = %source))]
    pub async fn upload_part_copy(
        &self,
        session: &UploadSession,
        part_number: u32,
        source: &CopySource,
    ) -> MpuResult<PartDescriptor> {
        validate_part_number(part_number)?;
        let key = session.temp_key(KeyRequest::Part(part_number));
        metrics::COPY_CALLS.inc();
        let version = self
            .store
            .copy(
                &ObjectRef::new(&source.bucket, &source.key),
                &ObjectRef::new(&session.scratch_bucket, &key),
                MetadataDirective::Replace(ObjectAttributes::default()),
            )
            .await?;

        metrics::PARTS_UPLOADED.inc();
        debug!(part_number, "part copied");
        Ok(PartDescriptor {
            part_number,
            key,
            size: version.size,
            etag: version.etag,
        })
    }

    /// List up to `max_parts` stored parts (capped at one listing page).
    ///
    /// The store lists names lexicographically, so with `truncated` set the
    /// returned parts are the lexicographically first ones.
    #[instrument(skip(self, session), fields(upload_id = %session.upload_id))]
    pub async fn list_parts(
        &self,
        session: &UploadSession,
        max_parts: Option<usize>,
    ) -> MpuResult<ListPartsOutput> {
        let max_parts = max_parts.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, DEFAULT_PAGE_SIZE);
        let page = self
            .store
            .list(
                &session.scratch_bucket,
                &session.temp_key(KeyRequest::PartsDirectory),
                max_parts,
            )
            .await?;

        let mut parts: Vec<PartDescriptor> = page
            .objects
            .into_iter()
            .filter_map(|object| {
                let part_number =
                    part_number_from_key(&session.key, &session.upload_id, &object.key)?;
                Some(PartDescriptor {
                    part_number,
                    key: object.key,
                    size: object.size,
                    etag: object.etag,
                })
            })
            .collect();
        parts.sort_by_key(|part| part.part_number);

        Ok(ListPartsOutput {
            parts,
            truncated: page.truncated,
        })
    }
}

/// Part numbers run from 1 to 10000.
pub fn validate_part_number(part_number: u32) -> MpuResult<()> {
    if part_number == 0 || part_number > MAX_PART_NUMBER {
        return Err(MpuError::InvalidPart(format!(
            "part number {part_number} outside 1..={MAX_PART_NUMBER}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_number_bounds() {
        assert!(validate_part_number(1).is_ok());
        assert!(validate_part_number(MAX_PART_NUMBER).is_ok());
        assert!(matches!(
            validate_part_number(0),
            Err(MpuError::InvalidPart(_))
        ));
        assert!(validate_part_number(MAX_PART_NUMBER + 1).is_err());
    }
}
