//! Store-facing half of the upload and download flows.
//!
//! Handlers parse and validate the request, then hand a [`PreparedUpload`] to
//! [`UploadService::store_upload`], which checks the configuration, makes sure
//! the bucket exists, writes the file (and its sidecar metadata), and returns a
//! presigned link. No step is retried; the first failure ends the request.

use crate::{
    config::{AppConfig, ConfigError},
    models::{
        metadata::UploadMetadata,
        object::{JSON, OCTET_STREAM, metadata_key},
    },
    services::{
        object_store::{ByteStream, ObjectBody, ObjectStore, ObjectStoreError, ResponseOverrides},
        validation::ValidationError,
    },
};
use bytes::Bytes;
use futures::stream;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("request body of {declared} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge { declared: u64, limit: u64 },
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{context}: {source}")]
    Backend {
        context: &'static str,
        #[source]
        source: ObjectStoreError,
    },
    #[error("{0} not found")]
    NotFound(String),
}

impl UploadError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    fn backend(context: &'static str) -> impl FnOnce(ObjectStoreError) -> Self {
        move |source| Self::Backend { context, source }
    }
}

pub type UploadResult<T> = Result<T, UploadError>;

/// How [`UploadService::ensure_bucket`] found the bucket. Only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketStatus {
    Existing,
    Created,
    /// Creation raced with another creator that won.
    AlreadyCreated,
}

/// A validated upload ready to be written.
pub struct PreparedUpload {
    /// Sanitized filename, used verbatim as the object key.
    pub key: String,
    pub body: ByteStream,
    /// Measured size of `body`.
    pub size: u64,
    pub metadata: Option<UploadMetadata>,
}

/// Shared request-independent state: configuration plus the store client.
#[derive(Clone)]
pub struct UploadService {
    config: Arc<AppConfig>,
    store: Arc<dyn ObjectStore>,
}

impl UploadService {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn ObjectStore>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Fails with [`UploadError::Config`] when endpoint or credentials are missing.
    pub fn check_config(&self) -> UploadResult<()> {
        match self.config.store.connection() {
            Ok(_) => Ok(()),
            Err(err) => {
                error!(error = %err, "configuration error: object store connection incomplete");
                Err(err.into())
            }
        }
    }

    /// Check-then-create. Not atomic: a concurrent creator may win the race,
    /// in which case the duplicate-create rejection is swallowed.
    pub async fn ensure_bucket(&self, bucket: &str) -> UploadResult<BucketStatus> {
        let exists = self
            .store
            .bucket_exists(bucket)
            .await
            .map_err(UploadError::backend("checking bucket"))?;
        if exists {
            debug!(bucket, "bucket already present");
            return Ok(BucketStatus::Existing);
        }

        match self.store.create_bucket(bucket).await {
            Ok(()) => {
                info!(bucket, "created bucket");
                Ok(BucketStatus::Created)
            }
            Err(ObjectStoreError::BucketAlreadyExists(_)) => {
                info!(bucket, "bucket was created concurrently, reusing it");
                Ok(BucketStatus::AlreadyCreated)
            }
            Err(err) => Err(UploadError::backend("creating bucket")(err)),
        }
    }

    /// Write the file and its optional metadata, then presign a download link.
    ///
    /// A failed metadata write is logged and otherwise ignored; the file is
    /// already stored at that point.
    pub async fn store_upload(&self, upload: PreparedUpload) -> UploadResult<String> {
        self.check_config()?;
        let bucket = self.config.bucket.as_str();

        let status = self.ensure_bucket(bucket).await?;
        debug!(bucket, ?status, "bucket ready");

        let info = self
            .store
            .put_object(bucket, &upload.key, upload.body, upload.size, OCTET_STREAM)
            .await
            .map_err(UploadError::backend("storing file"))?;
        info!(bucket, key = %info.key, size = info.size, "stored file");

        if let Some(metadata) = &upload.metadata {
            self.store_metadata(bucket, &upload.key, metadata).await;
        }

        let url = self.presign(bucket, &upload.key).await?;
        Ok(url)
    }

    async fn store_metadata(&self, bucket: &str, key: &str, metadata: &UploadMetadata) {
        let sidecar = metadata_key(key);
        let bytes = match metadata.to_json_bytes() {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                warn!(key = %sidecar, error = %err, "could not encode metadata, skipping");
                return;
            }
        };
        let size = bytes.len() as u64;
        let body: ByteStream = Box::pin(stream::once(async move { Ok(bytes) }));

        match self
            .store
            .put_object(bucket, &sidecar, body, size, JSON)
            .await
        {
            Ok(_) => info!(bucket, key = %sidecar, "stored metadata"),
            Err(err) => warn!(bucket, key = %sidecar, error = %err, "metadata upload failed"),
        }
    }

    async fn presign(&self, bucket: &str, key: &str) -> UploadResult<String> {
        self.store
            .presign_get(
                bucket,
                key,
                self.config.presign_ttl,
                &ResponseOverrides::attachment(key),
            )
            .await
            .map_err(UploadError::backend("presigning download link"))
    }

    /// Presigned link for an existing upload. The object is not looked up
    /// first; a missing key only shows when the link is fetched.
    pub async fn presign_download(&self, key: &str) -> UploadResult<String> {
        self.check_config()?;
        self.presign(&self.config.bucket, key).await
    }

    /// Sidecar metadata document for `key`.
    pub async fn fetch_metadata(&self, key: &str) -> UploadResult<ObjectBody> {
        self.check_config()?;
        let sidecar = metadata_key(key);
        self.store
            .get_object(&self.config.bucket, &sidecar)
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    UploadError::NotFound(format!("metadata for `{}`", key))
                } else {
                    UploadError::backend("reading metadata")(err)
                }
            })
    }

    /// Readiness: configuration complete and the bucket reachable.
    pub async fn probe_store(&self) -> UploadResult<bool> {
        self.check_config()?;
        self.store
            .bucket_exists(&self.config.bucket)
            .await
            .map_err(UploadError::backend("checking bucket"))
    }
}
