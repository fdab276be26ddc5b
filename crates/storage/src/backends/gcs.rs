//! JSON-API storage backend for compose-capable cloud stores.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    ListPage, MetadataDirective, ObjectMeta, ObjectRef, ObjectStore, ObjectSummary, ObjectVersion,
    normalize_page_size, validate_compose_sources,
};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use splice_core::ObjectAttributes;
use std::collections::BTreeMap;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, instrument};
use uuid::Uuid;

pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Object resource as returned by the JSON API.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectResource {
    name: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    generation: Option<String>,
    #[serde(default)]
    etag: Option<String>,
    #[serde(default)]
    md5_hash: Option<String>,
    #[serde(default)]
    crc32c: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    cache_control: Option<String>,
    #[serde(default)]
    content_disposition: Option<String>,
    #[serde(default)]
    content_encoding: Option<String>,
    #[serde(default)]
    metadata: Option<BTreeMap<String, String>>,
    #[serde(default)]
    updated: Option<String>,
}

impl ObjectResource {
    fn size(&self) -> u64 {
        self.size
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    /// Content digest: md5 for simple objects, crc32c for composites.
    fn digest(&self) -> String {
        self.md5_hash
            .clone()
            .or_else(|| self.crc32c.clone())
            .or_else(|| self.etag.clone())
            .unwrap_or_default()
    }

    fn version(&self) -> ObjectVersion {
        ObjectVersion {
            generation: self.generation.clone(),
            etag: self.digest(),
            size: self.size(),
        }
    }

    fn attributes(&self) -> ObjectAttributes {
        ObjectAttributes {
            content_type: self.content_type.clone(),
            cache_control: self.cache_control.clone(),
            content_disposition: self.content_disposition.clone(),
            content_encoding: self.content_encoding.clone(),
            metadata: self.metadata.clone().unwrap_or_default(),
        }
    }
}

/// Writable subset of the object resource.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct ObjectWrite<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_disposition: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_encoding: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a BTreeMap<String, String>>,
}

impl<'a> ObjectWrite<'a> {
    fn new(name: Option<&'a str>, attributes: &'a ObjectAttributes) -> Self {
        Self {
            name,
            content_type: attributes.content_type.as_deref(),
            cache_control: attributes.cache_control.as_deref(),
            content_disposition: attributes.content_disposition.as_deref(),
            content_encoding: attributes.content_encoding.as_deref(),
            metadata: (!attributes.metadata.is_empty()).then_some(&attributes.metadata),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<ObjectResource>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ComposeRequest<'a> {
    source_objects: Vec<SourceObject<'a>>,
    destination: ObjectWrite<'a>,
}

#[derive(Debug, Serialize)]
struct SourceObject<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RewriteResponse {
    done: bool,
    #[serde(default)]
    rewrite_token: Option<String>,
    #[serde(default)]
    resource: Option<ObjectResource>,
}

/// Object store speaking the cloud JSON API over HTTP.
pub struct GcsBackend {
    http: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
    user_project: Option<String>,
}

impl GcsBackend {
    /// Create a new JSON-API backend.
    ///
    /// `endpoint` defaults to the public endpoint; point it at an emulator for
    /// local testing. Requests are sent without authorization when no token is set.
    pub fn new(
        endpoint: Option<String>,
        access_token: Option<String>,
        user_project: Option<String>,
    ) -> StorageResult<Self> {
        let endpoint = endpoint
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(StorageError::Config(format!(
                "gcs endpoint must be an http(s) URL: {endpoint}"
            )));
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("splice/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StorageError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint,
            access_token,
            user_project,
        })
    }

    fn bucket_url(&self, bucket: &str) -> String {
        format!("{}/storage/v1/b/{}/o", self.endpoint, encode(bucket))
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}", self.bucket_url(bucket), encode(key))
    }

    fn upload_url(&self, bucket: &str) -> String {
        format!("{}/upload/storage/v1/b/{}/o", self.endpoint, encode(bucket))
    }

    /// Attach credentials and the billing project.
    fn authorize(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.access_token {
            req = req.bearer_auth(token);
        }
        if let Some(project) = &self.user_project {
            req = req.query(&[("userProject", project)]);
        }
        req
    }

    /// Send a request and map non-success statuses to storage errors.
    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> StorageResult<reqwest::Response> {
        let response = self.authorize(req).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            404 => StorageError::NotFound(what.to_string()),
            429 => StorageError::RateLimited(format!("{what}: {body}")),
            code => StorageError::Status {
                status: code,
                message: body,
            },
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
        what: &str,
    ) -> StorageResult<T> {
        let body = self.send(req, what).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl ObjectStore for GcsBackend {
    #[instrument(skip(self), fields(backend = "gcs"))]
    async fn list(&self, bucket: &str, prefix: &str, max_keys: usize) -> StorageResult<ListPage> {
        let max_keys = normalize_page_size(max_keys);
        let req = self.http.get(self.bucket_url(bucket)).query(&[
            ("prefix", prefix.to_string()),
            ("maxResults", max_keys.to_string()),
        ]);
        let response: ListResponse = self.send_json(req, &format!("{bucket}/{prefix}")).await?;

        Ok(ListPage {
            objects: response
                .items
                .iter()
                .map(|item| ObjectSummary {
                    key: item.name.clone(),
                    size: item.size(),
                    etag: item.digest(),
                })
                .collect(),
            truncated: response.next_page_token.is_some(),
        })
    }

    #[instrument(skip(self, data, attributes), fields(backend = "gcs", size = data.len()))]
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        attributes: &ObjectAttributes,
    ) -> StorageResult<ObjectVersion> {
        let boundary = format!("splice-{}", Uuid::new_v4().simple());
        let metadata = serde_json::to_vec(&ObjectWrite::new(Some(key), attributes))?;
        let media_type = attributes
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream");

        let mut body = BytesMut::with_capacity(data.len() + metadata.len() + 256);
        body.put_slice(format!("--{boundary}\r\n").as_bytes());
        body.put_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
        body.put_slice(&metadata);
        body.put_slice(format!("\r\n--{boundary}\r\n").as_bytes());
        body.put_slice(format!("Content-Type: {media_type}\r\n\r\n").as_bytes());
        body.put_slice(&data);
        body.put_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let req = self
            .http
            .post(self.upload_url(bucket))
            .query(&[("uploadType", "multipart")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body.freeze());
        let resource: ObjectResource = self.send_json(req, &format!("{bucket}/{key}")).await?;
        Ok(resource.version())
    }

    #[instrument(skip(self), fields(backend = "gcs"))]
    async fn head(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta> {
        let req = self.http.get(self.object_url(bucket, key));
        let resource: ObjectResource = self.send_json(req, &format!("{bucket}/{key}")).await?;

        Ok(ObjectMeta {
            size: resource.size(),
            etag: resource.digest(),
            generation: resource.generation.clone(),
            attributes: resource.attributes(),
            last_modified: resource
                .updated
                .as_deref()
                .and_then(|s| time::OffsetDateTime::parse(s, &Rfc3339).ok()),
        })
    }

    #[instrument(skip(self), fields(backend = "gcs"))]
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        let req = self
            .http
            .get(self.object_url(bucket, key))
            .query(&[("alt", "media")]);
        Ok(self.send(req, &format!("{bucket}/{key}")).await?.bytes().await?)
    }

    #[instrument(skip(self, source, dest, directive), fields(backend = "gcs", source = %source, dest = %dest))]
    async fn copy(
        &self,
        source: &ObjectRef,
        dest: &ObjectRef,
        directive: MetadataDirective,
    ) -> StorageResult<ObjectVersion> {
        let url = format!(
            "{}/rewriteTo/b/{}/o/{}",
            self.object_url(&source.bucket, &source.key),
            encode(&dest.bucket),
            encode(&dest.key)
        );
        let what = source.to_string();
        let replacement = match &directive {
            MetadataDirective::Copy => None,
            MetadataDirective::Replace(attributes) => {
                Some(serde_json::to_vec(&ObjectWrite::new(None, attributes))?)
            }
        };

        // Large or cross-location copies take several calls.
        let mut rewrite_token: Option<String> = None;
        loop {
            let mut req = self.http.post(&url);
            if let Some(token) = &rewrite_token {
                req = req.query(&[("rewriteToken", token)]);
            }
            req = match &replacement {
                Some(body) => req
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body.clone()),
                None => req.header(reqwest::header::CONTENT_LENGTH, "0"),
            };

            let response: RewriteResponse = self.send_json(req, &what).await?;
            if response.done {
                return response.resource.map(|r| r.version()).ok_or_else(|| {
                    StorageError::Serialization("rewrite finished without a resource".to_string())
                });
            }
            debug!(source = %what, "rewrite in progress");
            rewrite_token = Some(response.rewrite_token.ok_or_else(|| {
                StorageError::Serialization("unfinished rewrite without a rewriteToken".to_string())
            })?);
        }
    }

    #[instrument(skip(self, sources), fields(backend = "gcs", sources = sources.len()))]
    async fn compose(
        &self,
        bucket: &str,
        key: &str,
        sources: &[String],
    ) -> StorageResult<ObjectVersion> {
        validate_compose_sources(sources)?;

        let attributes = ObjectAttributes::default();
        let request = ComposeRequest {
            source_objects: sources
                .iter()
                .map(|name| SourceObject { name })
                .collect(),
            destination: ObjectWrite::new(None, &attributes),
        };
        let url = format!("{}/compose", self.object_url(bucket, key));
        let req = self.http.post(url).json(&request);
        let resource: ObjectResource = self.send_json(req, &format!("{bucket}/{key}")).await?;
        Ok(resource.version())
    }

    #[instrument(skip(self), fields(backend = "gcs"))]
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let req = self.http.delete(self.object_url(bucket, key));
        self.send(req, &format!("{bucket}/{key}")).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "gcs"
    }
}

/// Percent-encode a bucket or object name as a single path segment.
fn encode(segment: &str) -> String {
    utf8_percent_encode(segment, NON_ALPHANUMERIC).to_string()
}
