//! Object storage clients for Splice.
//!
//! This crate provides:
//! - The bucket-qualified `ObjectStore` interface the merge engine drives
//! - Backends: local filesystem and the cloud JSON API
//!
//! Both backends offer the bounded `compose` primitive (at most 32 sources,
//! all in the destination bucket) and cross-bucket `copy`.

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, gcs::GcsBackend};
pub use error::{StorageError, StorageResult};
pub use traits::{
    DEFAULT_PAGE_SIZE, ListPage, MAX_PAGE_SIZE, MetadataDirective, ObjectMeta, ObjectRef,
    ObjectStore, ObjectSummary, ObjectVersion,
};

use splice_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::Gcs {
            endpoint,
            access_token,
            user_project,
        } => {
            let backend = GcsBackend::new(
                endpoint.clone(),
                access_token.clone(),
                user_project.clone(),
            )?;
            Ok(Arc::new(backend))
        }
    }
}
