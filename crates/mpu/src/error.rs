//! Merge engine error types.

use splice_storage::StorageError;
use thiserror::Error;

/// Errors surfaced by the multipart engine.
#[derive(Debug, Error)]
pub enum MpuError {
    /// Completion parts are not strictly increasing.
    #[error("invalid part order: part {current} follows part {previous}")]
    InvalidPartOrder { previous: u32, current: u32 },

    #[error("invalid part: {0}")]
    InvalidPart(String),

    /// The operation is deliberately unsupported by this backend.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// Another complete or abort of the same upload is running in this process.
    #[error("upload busy: {0}")]
    UploadBusy(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A spawned merge worker panicked or was cancelled.
    #[error("merge worker failed: {0}")]
    Worker(String),
}

impl MpuError {
    /// True when the store's rate limit survived every retry.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Storage(err) if err.is_rate_limited())
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidPartOrder { .. } => "invalid_part_order",
            Self::InvalidPart(_) => "invalid_part",
            Self::NotImplemented(_) => "not_implemented",
            Self::UploadBusy(_) => "upload_busy",
            Self::Storage(err) if err.is_rate_limited() => "rate_limited",
            Self::Storage(_) => "storage",
            Self::Worker(_) => "worker",
        }
    }
}

/// Result type for engine operations.
pub type MpuResult<T> = std::result::Result<T, MpuError>;
