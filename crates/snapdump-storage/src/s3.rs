//! Amazon S3 storage backend
//!
//! Streams dump output to Amazon S3 or S3-compatible storage systems
//! (MinIO, LocalStack, Cloudflare R2).
//!
//! # Features
//!
//! - Multipart uploads batched at [`S3_CHUNK_SIZE`]
//! - Custom endpoints with path-style addressing for S3-compatibles
//! - Automatic credential resolution (AWS defaults or explicit)
//!
//! # Example
//!
//! ```rust,ignore
//! use snapdump_storage::{ExternalStorage, S3Config, S3Storage};
//!
//! let config = S3Config {
//!     bucket: "dumps".into(),
//!     prefix: "nightly/".into(),
//!     ..Default::default()
//! };
//! let storage = S3Storage::connect(&config).await?;
//! let uploader = storage.create_uploader("mydb.users.0.sql").await?;
//! ```

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use validator::Validate;

use crate::{ExternalStorage, Result, StorageError, Uploader};

/// Minimum part size for multipart uploads. 5 MiB is the S3 floor; on a
/// low-latency/high-bandwidth network you can go a lot bigger.
pub const S3_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Credential material that stays out of logs and serialized config.
///
/// Deserializes from a plain string. There is intentionally no
/// `Serialize` impl; config fields holding a `Secret` are marked
/// `skip_serializing`, so round-tripping a config can never leak it.
#[derive(Clone)]
pub struct Secret(SecretString);

impl Secret {
    /// Read the secret for handing to the SDK.
    pub fn reveal(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(..)")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(SecretString::from(value))
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Secret::from)
    }
}

/// Configuration for the S3 backend
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct S3Config {
    /// S3 bucket name
    #[validate(length(min = 3, max = 63))]
    pub bucket: String,

    /// Optional key prefix (e.g., "dumps/nightly/")
    #[serde(default)]
    pub prefix: String,

    /// AWS region (default: us-east-1)
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom S3 endpoint URL (for S3-compatible services like MinIO)
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// AWS access key ID; falls back to the ambient credential chain
    /// (environment, profile, instance role) when absent
    #[serde(default, skip_serializing)]
    pub access_key_id: Option<Secret>,

    /// AWS secret access key, paired with `access_key_id`
    #[serde(default, skip_serializing)]
    pub secret_access_key: Option<Secret>,

    /// Multipart upload part size in bytes
    #[serde(default = "default_chunk_size")]
    #[validate(range(min = 5_242_880))]
    pub chunk_size: usize,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_chunk_size() -> usize {
    S3_CHUNK_SIZE
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            prefix: String::new(),
            region: default_region(),
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
            chunk_size: default_chunk_size(),
        }
    }
}

/// S3 blob store
pub struct S3Storage {
    client: S3Client,
    bucket: String,
    prefix: String,
    chunk_size: usize,
}

impl S3Config {
    /// Static credentials, when both halves are configured.
    fn static_credentials(&self) -> Option<Credentials> {
        let access_key = self.access_key_id.as_ref()?;
        let secret_key = self.secret_access_key.as_ref()?;
        Some(Credentials::new(
            access_key.reveal(),
            secret_key.reveal(),
            None,
            None,
            "snapdump-config",
        ))
    }
}

impl S3Storage {
    /// Build a store from configuration, resolving AWS credentials.
    pub async fn connect(config: &S3Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| StorageError::config(e.to_string()))?;
        let client = build_client(config).await;

        info!(bucket = %config.bucket, prefix = %config.prefix, "S3 storage ready");

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            prefix: normalize_prefix(&config.prefix),
            chunk_size: config.chunk_size,
        })
    }
}

async fn build_client(config: &S3Config) -> S3Client {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(aws_config::Region::new(config.region.clone()));
    if let Some(credentials) = config.static_credentials() {
        loader = loader.credentials_provider(credentials);
    }

    let mut builder = aws_sdk_s3::config::Builder::from(&loader.load().await);
    if let Some(endpoint) = config.endpoint_url.as_deref() {
        // MinIO and friends only route path-style requests
        builder = builder.endpoint_url(endpoint).force_path_style(true);
    }
    S3Client::from_conf(builder.build())
}

fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{}/", prefix)
    }
}

#[async_trait]
impl ExternalStorage for S3Storage {
    async fn create_uploader(&self, path: &str) -> Result<Box<dyn Uploader>> {
        let key = format!("{}{}", self.prefix, path);
        debug!(bucket = %self.bucket, key = %key, "opening S3 upload");
        Ok(Box::new(S3Uploader {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key,
            chunk_size: self.chunk_size,
            buf: Vec::new(),
            upload_id: None,
            parts: Vec::new(),
            next_part: 1,
        }))
    }

    fn uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.prefix)
    }
}

/// Streaming multipart upload.
///
/// Small writes accumulate until a full part is available; uploads smaller
/// than one part are finalized with a single `PutObject`.
struct S3Uploader {
    client: S3Client,
    bucket: String,
    key: String,
    chunk_size: usize,
    buf: Vec<u8>,
    upload_id: Option<String>,
    parts: Vec<CompletedPart>,
    next_part: i32,
}

impl S3Uploader {
    async fn ensure_multipart(&mut self) -> Result<String> {
        if let Some(id) = &self.upload_id {
            return Ok(id.clone());
        }
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
            .map_err(|e| StorageError::s3(format!("create multipart upload failed: {}", e)))?;
        let id = created
            .upload_id()
            .ok_or_else(|| StorageError::s3("missing upload id"))?
            .to_string();
        self.upload_id = Some(id.clone());
        Ok(id)
    }

    async fn upload_buffered_part(&mut self) -> Result<()> {
        let upload_id = self.ensure_multipart().await?;
        let part_number = self.next_part;
        let body = std::mem::take(&mut self.buf);
        let uploaded = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::s3(format!("upload part {} failed: {}", part_number, e)))?;

        self.parts.push(
            CompletedPart::builder()
                .set_e_tag(uploaded.e_tag().map(str::to_string))
                .part_number(part_number)
                .build(),
        );
        self.next_part += 1;
        Ok(())
    }
}

#[async_trait]
impl Uploader for S3Uploader {
    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.buf.extend_from_slice(data);
        while self.buf.len() >= self.chunk_size {
            let tail = self.buf.split_off(self.chunk_size);
            self.upload_buffered_part().await?;
            self.buf = tail;
        }
        Ok(data.len())
    }

    async fn close(&mut self) -> Result<()> {
        match self.upload_id.clone() {
            None => {
                // Whole object fits in one part
                let body = std::mem::take(&mut self.buf);
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(&self.key)
                    .body(ByteStream::from(body))
                    .send()
                    .await
                    .map_err(|e| StorageError::s3(format!("put object failed: {}", e)))?;
            }
            Some(upload_id) => {
                if !self.buf.is_empty() {
                    self.upload_buffered_part().await?;
                }
                let completed = CompletedMultipartUpload::builder()
                    .set_parts(Some(std::mem::take(&mut self.parts)))
                    .build();
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(&self.key)
                    .upload_id(upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await
                    .map_err(|e| {
                        StorageError::s3(format!("complete multipart upload failed: {}", e))
                    })?;
            }
        }
        debug!(bucket = %self.bucket, key = %self.key, "S3 upload finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = S3Config::default();
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.chunk_size, S3_CHUNK_SIZE);
        assert!(config.endpoint_url.is_none());
    }

    #[test]
    fn test_config_rejects_short_bucket() {
        let config = S3Config {
            bucket: "ab".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secrets_never_serialize() {
        let config = S3Config {
            bucket: "dumps".to_string(),
            access_key_id: Some(Secret::from("AKIA123")),
            secret_access_key: Some(Secret::from("hunter2")),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("AKIA123"));
        assert!(!json.contains("hunter2"));

        let parsed: S3Config =
            serde_json::from_str(r#"{"bucket":"dumps","secret_access_key":"hunter2"}"#).unwrap();
        assert_eq!(parsed.secret_access_key.unwrap().reveal(), "hunter2");
    }

    #[test]
    fn test_secret_debug_is_opaque() {
        let secret = Secret::from("hunter2");
        assert_eq!(format!("{:?}", secret), "Secret(..)");
    }

    #[test]
    fn test_static_credentials_require_both_halves() {
        let mut config = S3Config {
            access_key_id: Some(Secret::from("AKIA123")),
            ..Default::default()
        };
        assert!(config.static_credentials().is_none());

        config.secret_access_key = Some(Secret::from("hunter2"));
        assert!(config.static_credentials().is_some());
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix(""), "");
        assert_eq!(normalize_prefix("dumps"), "dumps/");
        assert_eq!(normalize_prefix("dumps/"), "dumps/");
    }
}
