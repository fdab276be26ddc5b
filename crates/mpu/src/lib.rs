//! Multipart uploads for object stores that can only compose.
//!
//! The store offers a `compose` call merging at most 32 objects and counts how
//! many components an object was built from; the count resets only when an
//! object is copied into another bucket. This crate turns up to 10,000 parts
//! into one destination object with a fixed merge tree:
//!
//! - [`PartRegistry`] creates sessions and stores parts in the scratch bucket
//! - [`MergeTreeReducer`] merges an ordered list 32:1 with bounded concurrency
//! - [`ComposeRetrier`] retries rate-limited compose calls with backoff
//! - [`UploadPipeline`] runs the reduction stages, promotion and cleanup
//! - [`GarbageCollector`] deletes an upload's temporary objects
//! - [`MultipartBackend`] is the caller-facing API over all of the above

pub mod backend;
pub mod error;
pub mod gc;
pub mod metrics;
pub mod pipeline;
pub mod reducer;
pub mod registry;
pub mod retry;

pub use backend::MultipartBackend;
pub use error::{MpuError, MpuResult};
pub use gc::{GarbageCollector, GcStats};
pub use pipeline::{UploadPipeline, validate_completed_parts};
pub use reducer::{MergeNode, MergeTreeReducer, TempLedger};
pub use registry::{ListPartsOutput, PartRegistry, validate_part_number};
pub use retry::{ComposeRetrier, JitterSource, RandomJitter, RetryPolicy};
