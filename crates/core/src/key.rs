//! Temporary object namespace.
//!
//! Every temporary object of an upload lives under `{key}-{uploadId}/`:
//!
//! ```text
//! {key}-{uploadId}/init            metadata placeholder      (scratch)
//! {key}-{uploadId}/parts/{n}       caller-uploaded parts     (scratch)
//! {key}-{uploadId}/mpu1/{n}        first merge level         (scratch)
//! {key}-{uploadId}/mpu2/{n}        second merge level        (scratch)
//! {key}-{uploadId}/overflow/{n}    component-count reset     (overflow)
//! {key}-{uploadId}/final           final merge               (overflow)
//! ```

use crate::upload::{BucketRole, UploadId};
use std::fmt;

/// A stage of the merge tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MergeLevel {
    /// Parts reduced 32:1 in the scratch bucket.
    FirstMerge,
    /// First-merge outputs reduced 32:1 in the scratch bucket.
    SecondMerge,
    /// Second-merge outputs copied into the overflow bucket.
    OverflowCopy,
    /// Overflow copies composed into a single object.
    FinalMerge,
}

impl MergeLevel {
    /// Path segment used in temporary keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstMerge => "mpu1",
            Self::SecondMerge => "mpu2",
            Self::OverflowCopy => "overflow",
            Self::FinalMerge => "final",
        }
    }

    /// Bucket holding this level's objects.
    pub fn bucket_role(&self) -> BucketRole {
        match self {
            Self::FirstMerge | Self::SecondMerge => BucketRole::Scratch,
            Self::OverflowCopy | Self::FinalMerge => BucketRole::Overflow,
        }
    }
}

impl fmt::Display for MergeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which temporary name to derive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyRequest {
    /// `{key}-{uploadId}/`, the prefix of every temporary object.
    Directory,
    /// `{key}-{uploadId}/parts/`, the prefix of the uploaded parts.
    PartsDirectory,
    /// `{key}-{uploadId}/{level}`.
    Level(MergeLevel),
    /// `{key}-{uploadId}/{level}/{n}`.
    LevelPosition(MergeLevel, u32),
    /// `{key}-{uploadId}/init`.
    InitPlaceholder,
    /// `{key}-{uploadId}/parts/{n}`.
    Part(u32),
}

/// Derive a temporary object name. Pure and deterministic.
pub fn temp_key(key: &str, upload_id: &UploadId, request: KeyRequest) -> String {
    let dir = format!("{key}-{upload_id}/");
    match request {
        KeyRequest::Directory => dir,
        KeyRequest::PartsDirectory => format!("{dir}parts/"),
        KeyRequest::Level(level) => format!("{dir}{level}"),
        KeyRequest::LevelPosition(level, n) => format!("{dir}{level}/{n}"),
        KeyRequest::InitPlaceholder => format!("{dir}init"),
        KeyRequest::Part(n) => format!("{dir}parts/{n}"),
    }
}

/// Recover the part number from a part object name.
///
/// Returns `None` for anything that is not exactly `{key}-{uploadId}/parts/{n}`.
pub fn part_number_from_key(key: &str, upload_id: &UploadId, object: &str) -> Option<u32> {
    let parts_dir = temp_key(key, upload_id, KeyRequest::PartsDirectory);
    let suffix = object.strip_prefix(&parts_dir)?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}
