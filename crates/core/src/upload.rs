//! Upload session types and part descriptors.

use crate::key::{KeyRequest, temp_key};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Identifier of a multipart upload.
///
/// A random token with no embedded structure. It only namespaces the temporary
/// objects of one upload, so it must never contain a key delimiter.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UploadId(String);

impl UploadId {
    /// Generate a new random upload ID (32 lowercase hex characters).
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Parse an upload ID received from a caller.
    ///
    /// Accepts any non-empty ASCII alphanumeric token, so ids minted by another
    /// gateway node with a different generator remain usable.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() || s.len() > 128 {
            return Err(crate::Error::InvalidUploadId(format!(
                "length must be between 1 and 128, got {}",
                s.len()
            )));
        }
        if !s.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(crate::Error::InvalidUploadId(format!(
                "must be alphanumeric: {s}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Get the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadId({})", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UploadId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<UploadId> for String {
    fn from(value: UploadId) -> Self {
        value.0
    }
}

/// Which of the buckets involved in an upload an object lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BucketRole {
    /// Holds `init`, `parts/*` and the first two merge levels.
    Scratch,
    /// Holds the copies that reset the component count, and the final merge.
    Overflow,
    /// The caller's destination bucket.
    Destination,
}

impl BucketRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scratch => "scratch",
            Self::Overflow => "overflow",
            Self::Destination => "destination",
        }
    }
}

/// Content attributes and user metadata carried by an object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    /// User metadata (`x-*-meta-*` headers on the host API).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ObjectAttributes {
    /// True when no attribute is set.
    pub fn is_empty(&self) -> bool {
        self.content_type.is_none()
            && self.cache_control.is_none()
            && self.content_disposition.is_none()
            && self.content_encoding.is_none()
            && self.metadata.is_empty()
    }
}

/// Addresses an existing upload from the caller's point of view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    /// Destination bucket.
    pub bucket: String,
    /// Destination key.
    pub key: String,
    pub upload_id: UploadId,
}

impl UploadTarget {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, upload_id: UploadId) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            upload_id,
        }
    }
}

/// Request to start a multipart upload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CreateMultipartUpload {
    pub bucket: String,
    pub key: String,
    #[serde(default)]
    pub attributes: ObjectAttributes,
}

/// A multipart upload session.
///
/// Lives from creation until completion (promoted, then its temporaries deleted)
/// or abort (temporaries deleted without promotion).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    /// Destination bucket.
    pub bucket: String,
    /// Destination key.
    pub key: String,
    pub upload_id: UploadId,
    /// Bucket holding parts and the first two merge levels.
    pub scratch_bucket: String,
    /// Bucket used to reset the component count before the final merge.
    pub overflow_bucket: String,
    /// Attributes declared at creation. Empty when the session was rebuilt from
    /// an [`UploadTarget`]; the `init` placeholder stays authoritative.
    #[serde(default)]
    pub attributes: ObjectAttributes,
}

impl UploadSession {
    /// Rebuild a session from a caller-supplied target and the configured buckets.
    pub fn from_target(
        target: &UploadTarget,
        scratch_bucket: impl Into<String>,
        overflow_bucket: impl Into<String>,
    ) -> Self {
        Self {
            bucket: target.bucket.clone(),
            key: target.key.clone(),
            upload_id: target.upload_id.clone(),
            scratch_bucket: scratch_bucket.into(),
            overflow_bucket: overflow_bucket.into(),
            attributes: ObjectAttributes::default(),
        }
    }

    /// The caller-facing address of this session.
    pub fn target(&self) -> UploadTarget {
        UploadTarget::new(&self.bucket, &self.key, self.upload_id.clone())
    }

    /// Derive the name of one of this session's temporary objects.
    pub fn temp_key(&self, request: KeyRequest) -> String {
        temp_key(&self.key, &self.upload_id, request)
    }

    /// Prefix shared by every temporary object of this session.
    pub fn prefix(&self) -> String {
        self.temp_key(KeyRequest::Directory)
    }

    /// Resolve a bucket role to a bucket name.
    pub fn bucket_for(&self, role: BucketRole) -> &str {
        match role {
            BucketRole::Scratch => &self.scratch_bucket,
            BucketRole::Overflow => &self.overflow_bucket,
            BucketRole::Destination => &self.bucket,
        }
    }
}

/// A part stored for an upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartDescriptor {
    pub part_number: u32,
    /// Object name in the scratch bucket.
    pub key: String,
    pub size: u64,
    /// Content digest reported by the store.
    pub etag: String,
}

/// A part reference supplied to completion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: u32,
    #[serde(default)]
    pub etag: Option<String>,
}

impl CompletedPart {
    pub fn new(part_number: u32) -> Self {
        Self {
            part_number,
            etag: None,
        }
    }
}

/// Source of an `upload_part_copy`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopySource {
    pub bucket: String,
    pub key: String,
}

impl CopySource {
    /// Parse the host API's `bucket/key` copy-source notation.
    pub fn parse(source: &str) -> Option<Self> {
        let source = source.strip_prefix('/').unwrap_or(source);
        let (bucket, key) = source.split_once('/')?;
        if bucket.is_empty() || key.is_empty() {
            return None;
        }
        Some(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

impl fmt::Display for CopySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// The promoted destination object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedUpload {
    pub bucket: String,
    pub key: String,
    /// Version identifier (generation) of the destination object.
    pub version: Option<String>,
    pub etag: String,
}
