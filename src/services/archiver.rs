//! Archive backends.
//!
//! `put` is all-or-nothing from the caller's point of view and overwrites
//! whatever already lives under the same key.

use crate::{
    errors::ArchiveError,
    models::{archive_key::ArchiveKey, secret_bundle::SecretBundle, state::StatePayload},
};
use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_s3::{error::DisplayErrorContext, primitives::ByteStream};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::debug;
use uuid::Uuid;

#[async_trait]
pub trait Archiver: Send + Sync {
    async fn put(&self, key: &ArchiveKey, payload: &StatePayload) -> Result<(), ArchiveError>;

    /// Human-readable destination of `key`, for progress output.
    fn location(&self, key: &ArchiveKey) -> String;
}

/// Amazon S3 (or any endpoint the AWS SDK is pointed at).
pub struct S3Archiver {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Archiver {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client for the bundle's region. Credentials come from the
    /// standard AWS provider chain (env, profile, instance role, ...).
    /// The whole `put`, SDK retries included, is bounded by `timeout`.
    pub async fn connect(secrets: &SecretBundle, timeout: Duration) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(secrets.region.clone()))
            .timeout_config(s3_timeouts(timeout))
            .load()
            .await;
        Self::new(aws_sdk_s3::Client::new(&config), secrets.bucket.clone())
    }
}

/// SDK timeouts for one storage write: each attempt and the operation as a
/// whole stop after `timeout`.
pub fn s3_timeouts(timeout: Duration) -> TimeoutConfig {
    TimeoutConfig::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .operation_attempt_timeout(timeout)
        .operation_timeout(timeout)
        .build()
}

#[async_trait]
impl Archiver for S3Archiver {
    async fn put(&self, key: &ArchiveKey, payload: &StatePayload) -> Result<(), ArchiveError> {
        let content_md5 = BASE64.encode(md5::compute(payload.bytes()).0);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .content_type(payload.content_type())
            .content_md5(content_md5)
            .body(ByteStream::from(payload.bytes().clone()))
            .send()
            .await
            .map_err(|err| ArchiveError::Storage {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                message: DisplayErrorContext(&err).to_string(),
                source: Box::new(err),
            })?;

        Ok(())
    }

    fn location(&self, key: &ArchiveKey) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

/// Local directory laid out as `{root}/{bucket}/{key}`.
///
/// Writes go to a temporary sibling file, are fsynced, then renamed into
/// place so a reader never observes a partial payload.
pub struct LocalArchiver {
    root: PathBuf,
    bucket: String,
}

impl LocalArchiver {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
        }
    }

    pub fn object_path(&self, key: &ArchiveKey) -> PathBuf {
        let mut path = self.root.join(&self.bucket);
        for segment in key.as_str().split('/') {
            path.push(segment);
        }
        path
    }
}

async fn write_tmp(tmp_path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(tmp_path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

#[async_trait]
impl Archiver for LocalArchiver {
    async fn put(&self, key: &ArchiveKey, payload: &StatePayload) -> Result<(), ArchiveError> {
        let file_path = self.object_path(key);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| std::io::Error::other("object path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(err) = write_tmp(&tmp_path, payload.bytes()).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ArchiveError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ArchiveError::Io(err));
            }
        }

        debug!(
            "Wrote {} bytes (etag {}) to {}",
            payload.len(),
            payload.etag(),
            file_path.display()
        );
        Ok(())
    }

    fn location(&self, key: &ArchiveKey) -> String {
        self.object_path(key).display().to_string()
    }
}

/// In-process archive. Keeps the last payload written under each key.
#[derive(Default)]
pub struct MemoryArchiver {
    bucket: String,
    objects: Mutex<HashMap<String, Bytes>>,
}

impl MemoryArchiver {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl Archiver for MemoryArchiver {
    async fn put(&self, key: &ArchiveKey, payload: &StatePayload) -> Result<(), ArchiveError> {
        self.objects
            .lock()
            .await
            .insert(key.to_string(), payload.bytes().clone());
        Ok(())
    }

    fn location(&self, key: &ArchiveKey) -> String {
        format!("memory://{}/{}", self.bucket, key)
    }
}
