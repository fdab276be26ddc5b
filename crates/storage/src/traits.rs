//! Storage trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use splice_core::{MAX_COMPOSE_SOURCES, ObjectAttributes};
use std::fmt;

/// Page size constraints for listing operations.
pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const MAX_PAGE_SIZE: usize = 1000;

/// Identifies an object in a bucket.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Version information returned by every write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectVersion {
    /// Generation (version identifier) of the written object, if the store has one.
    pub generation: Option<String>,
    /// Content digest.
    pub etag: String,
    /// Size of the written object in bytes.
    pub size: u64,
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    pub etag: String,
    pub generation: Option<String>,
    /// Content attributes and user metadata.
    pub attributes: ObjectAttributes,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
}

/// One entry of a listing page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub etag: String,
}

/// A single page of listing results, in lexicographic key order.
#[derive(Clone, Debug, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    /// More objects match the prefix than were returned.
    pub truncated: bool,
}

/// How a copy treats the source object's attributes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetadataDirective {
    /// Keep the source attributes.
    Copy,
    /// Replace them with the given attributes.
    Replace(ObjectAttributes),
}

/// Bucket-qualified object store with a bounded compose primitive.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// List up to `max_keys` objects whose key starts with `prefix`.
    ///
    /// Always returns the first page. Callers that delete what they list
    /// simply list again.
    async fn list(&self, bucket: &str, prefix: &str, max_keys: usize) -> StorageResult<ListPage>;

    /// Store an object, replacing any existing one.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        attributes: &ObjectAttributes,
    ) -> StorageResult<ObjectVersion>;

    /// Get an object's metadata without fetching content.
    async fn head(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta>;

    /// Get an object's content.
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes>;

    /// Copy an object, possibly across buckets.
    async fn copy(
        &self,
        source: &ObjectRef,
        dest: &ObjectRef,
        directive: MetadataDirective,
    ) -> StorageResult<ObjectVersion>;

    /// Concatenate 1..=32 objects of `bucket`, in order, into `key`.
    async fn compose(
        &self,
        bucket: &str,
        key: &str,
        sources: &[String],
    ) -> StorageResult<ObjectVersion>;

    /// Delete an object.
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Get the name of this storage backend.
    ///
    /// Returns a static string identifier for the backend type (e.g., "gcs", "filesystem").
    /// Used for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    ///
    /// The default implementation returns Ok(()), suitable for backends that
    /// don't require connectivity verification (e.g., local filesystem).
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Reject compose requests outside the store's 1..=32 source limit.
pub fn validate_compose_sources(sources: &[String]) -> StorageResult<()> {
    if sources.is_empty() || sources.len() > MAX_COMPOSE_SOURCES {
        return Err(StorageError::InvalidRequest(format!(
            "compose takes 1 to {MAX_COMPOSE_SOURCES} sources, got {}",
            sources.len()
        )));
    }
    Ok(())
}

/// Clamp a caller-supplied listing size to the store's page limit.
pub fn normalize_page_size(max_keys: usize) -> usize {
    max_keys.clamp(1, MAX_PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_source_bounds() {
        assert!(validate_compose_sources(&[]).is_err());
        let sources: Vec<String> = (0..32).map(|i| i.to_string()).collect();
        assert!(validate_compose_sources(&sources).is_ok());
        let sources: Vec<String> = (0..33).map(|i| i.to_string()).collect();
        assert!(matches!(
            validate_compose_sources(&sources),
            Err(StorageError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_normalize_page_size() {
        assert_eq!(normalize_page_size(0), 1);
        assert_eq!(normalize_page_size(250), 250);
        assert_eq!(normalize_page_size(5000), MAX_PAGE_SIZE);
    }

    #[test]
    fn test_object_ref_display() {
        assert_eq!(ObjectRef::new("b", "a/k").to_string(), "b/a/k");
    }
}
