//! Core domain types and shared logic for Splice.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Upload identifiers and sessions
//! - Part descriptors and completion requests
//! - Merge levels and the temporary key namespace
//! - Configuration shared by the engine and the CLI

pub mod config;
pub mod error;
pub mod key;
pub mod upload;

pub use error::{Error, Result};
pub use key::{KeyRequest, MergeLevel, part_number_from_key, temp_key};
pub use upload::{
    BucketRole, CompletedPart, CompletedUpload, CopySource, CreateMultipartUpload,
    ObjectAttributes, PartDescriptor, UploadId, UploadSession, UploadTarget,
};

/// Maximum number of source objects a single compose call accepts.
pub const MAX_COMPOSE_SOURCES: usize = 32;

/// Highest part number accepted by the multipart contract.
pub const MAX_PART_NUMBER: u32 = 10_000;

/// Maximum number of parts a completion may reference.
pub const MAX_PARTS: usize = 10_000;
