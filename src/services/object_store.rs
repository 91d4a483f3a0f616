//! The narrow object store contract the upload pipeline depends on.
//!
//! Two implementations exist: [`S3ObjectStore`](super::s3_store::S3ObjectStore)
//! for a remote S3-compatible service and
//! [`MemoryObjectStore`](super::memory_store::MemoryObjectStore) for tests and
//! local runs. Handlers only ever see `Arc<dyn ObjectStore>`.

use crate::models::object::ObjectInfo;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::{io, pin::Pin, time::Duration};
use thiserror::Error;

/// A boxed stream of object bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Boxed transport error from a concrete backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, key: String },
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("object store request failed: {0}")]
    Backend(#[source] BoxError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ObjectStoreError {
    pub fn backend(err: impl Into<BoxError>) -> Self {
        Self::Backend(err.into())
    }

    /// True for a missing bucket as well as a missing key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::BucketNotFound(_))
    }
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// Response headers a presigned GET forces on the download.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseOverrides {
    pub content_disposition: Option<String>,
    pub content_type: Option<String>,
}

impl ResponseOverrides {
    /// `attachment; filename="<filename>"`.
    pub fn attachment(filename: &str) -> Self {
        Self {
            content_disposition: Some(format!(
                "attachment; filename=\"{}\"",
                filename.replace('"', "")
            )),
            content_type: None,
        }
    }
}

/// A readable object returned by [`ObjectStore::get_object`].
pub struct ObjectBody {
    pub stream: ByteStream,
    pub content_type: Option<String>,
    pub size: Option<u64>,
}

impl std::fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBody")
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Capability set of an S3-compatible store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether `bucket` exists. A missing bucket is `Ok(false)`, not an error.
    async fn bucket_exists(&self, bucket: &str) -> ObjectStoreResult<bool>;

    /// Create `bucket`. Backends that reject duplicates return
    /// [`ObjectStoreError::BucketAlreadyExists`].
    async fn create_bucket(&self, bucket: &str) -> ObjectStoreResult<()>;

    /// Write `size` bytes from `body` under `key`, replacing any existing object.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        size: u64,
        content_type: &str,
    ) -> ObjectStoreResult<ObjectInfo>;

    async fn get_object(&self, bucket: &str, key: &str) -> ObjectStoreResult<ObjectBody>;

    /// Time-limited GET link for one object. Existence is not checked.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
        overrides: &ResponseOverrides,
    ) -> ObjectStoreResult<String>;
}
