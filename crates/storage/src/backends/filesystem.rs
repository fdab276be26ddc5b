//! Local filesystem storage backend.
//!
//! Each bucket is a directory under the root holding two trees: `data/` with
//! object contents and `meta/` with one JSON record per object (generation,
//! etag, attributes). Buckets are created on first use.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    ListPage, MetadataDirective, ObjectMeta, ObjectRef, ObjectStore, ObjectSummary, ObjectVersion,
    normalize_page_size, validate_compose_sources,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use splice_core::ObjectAttributes;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

const DATA_DIR: &str = "data";
const META_DIR: &str = "meta";
const META_SUFFIX: &str = ".json";

/// Marker in the name of in-progress writes; listings skip these files.
const TEMP_MARKER: &str = ".splice-tmp.";

/// Sidecar record stored next to every object.
#[derive(Debug, Serialize, Deserialize)]
struct ObjectRecord {
    generation: u64,
    etag: String,
    #[serde(default)]
    attributes: ObjectAttributes,
}

/// Local filesystem object store.
pub struct FilesystemBackend {
    root: PathBuf,
    generation: AtomicU64,
}

impl FilesystemBackend {
    /// Create a new filesystem backend.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        // Generations keep increasing across restarts.
        let seed = (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1000).max(1) as u64;
        Ok(Self {
            root,
            generation: AtomicU64::new(seed),
        })
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Resolve (and create) the data and metadata roots of a bucket.
    async fn bucket_dirs(&self, bucket: &str) -> StorageResult<(PathBuf, PathBuf)> {
        validate_bucket_name(bucket)?;
        let bucket_root = self.root.join(bucket);
        let data = bucket_root.join(DATA_DIR);
        let meta = bucket_root.join(META_DIR);
        fs::create_dir_all(&data).await?;
        fs::create_dir_all(&meta).await?;
        Ok((data, meta))
    }

    /// Resolve the data and sidecar paths of an object.
    async fn object_paths(&self, bucket: &str, key: &str) -> StorageResult<(PathBuf, PathBuf)> {
        if key.is_empty() || key.ends_with('/') {
            return Err(StorageError::InvalidKey(format!(
                "object name must be non-empty and not end with '/': {key:?}"
            )));
        }
        if key.contains(TEMP_MARKER) {
            return Err(StorageError::InvalidKey(format!(
                "object name uses a reserved marker: {key}"
            )));
        }
        let (data_root, meta_root) = self.bucket_dirs(bucket).await?;
        let data = key_path(data_root, key.to_string()).await?;
        let meta = key_path(meta_root, format!("{key}{META_SUFFIX}")).await?;
        Ok((data, meta))
    }

    /// Load the sidecar record, deriving one from the content when it is missing.
    async fn load_record(&self, data_path: &Path, meta_path: &Path) -> StorageResult<ObjectRecord> {
        match fs::read(meta_path).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let data = fs::read(data_path).await?;
                Ok(ObjectRecord {
                    generation: 0,
                    etag: content_etag(&data),
                    attributes: ObjectAttributes::default(),
                })
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Write content and sidecar for an object and return its new version.
    async fn store(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        attributes: ObjectAttributes,
    ) -> StorageResult<ObjectVersion> {
        let (data_path, meta_path) = self.object_paths(bucket, key).await?;
        let record = ObjectRecord {
            generation: self.next_generation(),
            etag: content_etag(data),
            attributes,
        };
        write_atomic(&data_path, data).await?;
        write_atomic(&meta_path, &serde_json::to_vec(&record)?).await?;
        Ok(ObjectVersion {
            generation: Some(record.generation.to_string()),
            etag: record.etag,
            size: data.len() as u64,
        })
    }

    async fn read_object(&self, bucket: &str, key: &str) -> StorageResult<(Bytes, PathBuf, PathBuf)> {
        let (data_path, meta_path) = self.object_paths(bucket, key).await?;
        let data = fs::read(&data_path)
            .await
            .map_err(|e| not_found_or_io(e, bucket, key))?;
        Ok((Bytes::from(data), data_path, meta_path))
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list(&self, bucket: &str, prefix: &str, max_keys: usize) -> StorageResult<ListPage> {
        let max_keys = normalize_page_size(max_keys);
        let (data_root, meta_root) = self.bucket_dirs(bucket).await?;

        // Walk only the deepest directory the prefix fully names.
        let base_path = match prefix.rfind('/') {
            Some(idx) if idx > 0 => key_path(data_root.clone(), prefix[..idx].to_string()).await?,
            _ => data_root.clone(),
        };

        let mut keys = Vec::new();
        match fs::metadata(&base_path).await {
            Ok(meta) if meta.is_dir() => {}
            // The prefix names an object, not a directory.
            Ok(_) => return Ok(ListPage::default()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ListPage::default()),
            Err(e) => return Err(StorageError::Io(e)),
        }

        let mut stack = vec![base_path];
        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                // Use file_type() instead of path.is_dir() to avoid following symlinks.
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file()
                    && let Ok(rel) = path.strip_prefix(&data_root)
                {
                    let key = rel.to_string_lossy().replace('\\', "/");
                    if key.starts_with(prefix) && !key.contains(TEMP_MARKER) {
                        keys.push(key);
                    }
                }
                // Ignore symlinks to prevent traversal outside storage root
            }
        }

        keys.sort();
        let truncated = keys.len() > max_keys;
        keys.truncate(max_keys);

        let mut objects = Vec::with_capacity(keys.len());
        for key in keys {
            let data_path = data_root.join(&key);
            let meta_path = meta_root.join(format!("{key}{META_SUFFIX}"));
            let size = match fs::metadata(&data_path).await {
                Ok(meta) => meta.len(),
                // Deleted while listing.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::Io(e)),
            };
            let record = self.load_record(&data_path, &meta_path).await?;
            objects.push(ObjectSummary {
                key,
                size,
                etag: record.etag,
            });
        }

        Ok(ListPage { objects, truncated })
    }

    #[instrument(skip(self, data, attributes), fields(backend = "filesystem", size = data.len()))]
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        attributes: &ObjectAttributes,
    ) -> StorageResult<ObjectVersion> {
        self.store(bucket, key, &data, attributes.clone()).await
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta> {
        let (data_path, meta_path) = self.object_paths(bucket, key).await?;
        let metadata = fs::metadata(&data_path)
            .await
            .map_err(|e| not_found_or_io(e, bucket, key))?;
        let record = self.load_record(&data_path, &meta_path).await?;

        Ok(ObjectMeta {
            size: metadata.len(),
            etag: record.etag,
            generation: Some(record.generation.to_string()),
            attributes: record.attributes,
            last_modified: metadata.modified().ok().map(|t| t.into()),
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        let (data, _, _) = self.read_object(bucket, key).await?;
        Ok(data)
    }

    #[instrument(skip(self, source, dest, directive), fields(backend = "filesystem", source = %source, dest = %dest))]
    async fn copy(
        &self,
        source: &ObjectRef,
        dest: &ObjectRef,
        directive: MetadataDirective,
    ) -> StorageResult<ObjectVersion> {
        let (data, data_path, meta_path) = self.read_object(&source.bucket, &source.key).await?;
        let attributes = match directive {
            MetadataDirective::Copy => self.load_record(&data_path, &meta_path).await?.attributes,
            MetadataDirective::Replace(attributes) => attributes,
        };
        self.store(&dest.bucket, &dest.key, &data, attributes).await
    }

    #[instrument(skip(self, sources), fields(backend = "filesystem", sources = sources.len()))]
    async fn compose(
        &self,
        bucket: &str,
        key: &str,
        sources: &[String],
    ) -> StorageResult<ObjectVersion> {
        validate_compose_sources(sources)?;

        let mut buf = BytesMut::new();
        for source in sources {
            let (data, _, _) = self.read_object(bucket, source).await?;
            buf.extend_from_slice(&data);
        }
        self.store(bucket, key, &buf, ObjectAttributes::default())
            .await
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let (data_path, meta_path) = self.object_paths(bucket, key).await?;
        fs::remove_file(&data_path)
            .await
            .map_err(|e| not_found_or_io(e, bucket, key))?;
        match fs::remove_file(&meta_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}

/// Hex sha256 of an object's content.
fn content_etag(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn not_found_or_io(e: std::io::Error, bucket: &str, key: &str) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(format!("{bucket}/{key}"))
    } else {
        StorageError::Io(e)
    }
}

/// Bucket names become directory names, so keep them to a safe alphabet.
fn validate_bucket_name(bucket: &str) -> StorageResult<()> {
    let valid = !bucket.is_empty()
        && bucket.len() <= 222
        && !bucket.starts_with('.')
        && bucket
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'_' | b'.'));
    if !valid {
        return Err(StorageError::InvalidRequest(format!(
            "invalid bucket name: {bucket:?}"
        )));
    }
    Ok(())
}

/// Write to a uniquely named temp file, fsync, then rename over the target.
async fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let temp_name = format!("{TEMP_MARKER}{}", Uuid::new_v4());
    let temp_path = path.with_file_name(
        path.file_name()
            .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
            .unwrap_or_else(|| temp_name.clone()),
    );
    {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
    }
    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StorageError::Io(e));
    }
    Ok(())
}

/// Resolve `key` under `root` on the blocking pool.
async fn key_path(root: PathBuf, key: String) -> StorageResult<PathBuf> {
    tokio::task::spawn_blocking(move || key_path_sync(&root, &key))
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))?
}

/// Key path resolution with path traversal protection.
///
/// Returns an error if the key would escape `root`, including through
/// symlinks already present in the tree.
fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
    if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
        return Err(StorageError::InvalidKey(format!(
            "path traversal not allowed: {key}"
        )));
    }

    for component in Path::new(key).components() {
        if !matches!(component, std::path::Component::Normal(_)) {
            return Err(StorageError::InvalidKey(format!(
                "contains unsafe path component: {key}"
            )));
        }
    }

    let path = root.join(key);
    let root_canonical = root.canonicalize().map_err(|e| {
        StorageError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to canonicalize root: {e}"),
        ))
    })?;

    // Walk from the path itself up to the nearest existing ancestor and make
    // sure it resolves inside the root.
    let mut candidate = Some(path.as_path());
    while let Some(current) = candidate {
        match std::fs::symlink_metadata(current) {
            Ok(meta) => {
                let canonical = current.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        StorageError::InvalidKey(format!("symlink target missing or invalid: {key}"))
                    } else {
                        StorageError::Io(std::io::Error::new(
                            e.kind(),
                            format!("failed to canonicalize path: {e}"),
                        ))
                    }
                })?;
                if !canonical.starts_with(&root_canonical) {
                    return Err(StorageError::InvalidKey(format!(
                        "resolved path escapes storage root: {key}"
                    )));
                }
                return Ok(path);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(StorageError::Io(std::io::Error::new(
                    err.kind(),
                    format!("failed to stat path: {err}"),
                )));
            }
        }
        candidate = current.parent();
    }

    Ok(path)
}
