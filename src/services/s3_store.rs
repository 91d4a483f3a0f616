//! S3-compatible object store backed by the AWS SDK.
//!
//! Always uses path-style addressing (`endpoint/bucket/key`), which MinIO and
//! most self-hosted services require.

use crate::{
    config::StoreSettings,
    models::object::ObjectInfo,
    services::object_store::{
        ByteStream, ObjectBody, ObjectStore, ObjectStoreError, ObjectStoreResult,
        ResponseOverrides,
    },
};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Builder, Credentials, Region},
    error::SdkError,
    presigning::PresigningConfig,
    primitives::ByteStream as SdkByteStream,
    types::{
        BucketLocationConstraint, CompletedMultipartUpload, CompletedPart,
        CreateBucketConfiguration,
    },
};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument, warn};

/// Region that rejects an explicit location constraint on bucket creation.
const DEFAULT_S3_REGION: &str = "us-east-1";

#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: Client,
    region: String,
}

impl S3ObjectStore {
    /// Build a client from the configured settings.
    ///
    /// Never fails: missing credentials are replaced by empty ones, and the
    /// upload pipeline refuses to reach the store until they are configured.
    pub fn new(settings: &StoreSettings) -> Self {
        let endpoint = normalize_endpoint(
            settings
                .endpoint
                .as_deref()
                .unwrap_or("http://127.0.0.1:9000"),
        );
        let credentials = Credentials::new(
            settings.access_key.clone().unwrap_or_default(),
            settings.secret_key.clone().unwrap_or_default(),
            None,
            None,
            "presign-uploader",
        );

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(config),
            region: settings.region.clone(),
        }
    }
}

/// Bare `host:port` endpoints get `http://` prepended.
fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

fn is_not_found<E>(err: &SdkError<E>) -> bool {
    matches!(err, SdkError::ServiceError(service_err) if service_err.raw().status().as_u16() == 404)
}

/// Part size for multipart uploads. S3 needs at least 5 MiB for every part
/// but the last.
const PART_SIZE: usize = 8 * 1024 * 1024;

/// Read from `body` until `buffer` holds a full part. Returns `true` once the
/// stream is exhausted.
async fn fill_part(body: &mut ByteStream, buffer: &mut BytesMut) -> ObjectStoreResult<bool> {
    while buffer.len() < PART_SIZE {
        match body.next().await {
            Some(chunk) => buffer.extend_from_slice(&chunk?),
            None => return Ok(true),
        }
    }
    Ok(false)
}

fn write_error<E>(bucket: &str, err: SdkError<E>) -> ObjectStoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    if is_not_found(&err) {
        ObjectStoreError::BucketNotFound(bucket.to_string())
    } else {
        ObjectStoreError::backend(err)
    }
}

impl S3ObjectStore {
    async fn put_single(
        &self,
        bucket: &str,
        key: &str,
        content: Bytes,
        content_type: &str,
    ) -> ObjectStoreResult<ObjectInfo> {
        let size = content.len() as u64;
        let output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .content_length(part_length(&content)?)
            .body(SdkByteStream::from(content))
            .send()
            .await
            .map_err(|err| write_error(bucket, err))?;

        Ok(ObjectInfo {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size,
            etag: output.e_tag().map(|etag| etag.trim_matches('"').to_string()),
        })
    }
}

fn part_length(content: &Bytes) -> ObjectStoreResult<i64> {
    i64::try_from(content.len()).map_err(|_| ObjectStoreError::backend("object part too large"))
}

/// An open multipart upload. Memory use is bounded by one part.
struct MultipartUpload {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    parts: Vec<CompletedPart>,
    bytes_written: u64,
}

impl MultipartUpload {
    async fn start(
        client: &Client,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> ObjectStoreResult<Self> {
        let output = client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|err| write_error(bucket, err))?;
        let upload_id = output
            .upload_id()
            .ok_or_else(|| ObjectStoreError::backend("multipart upload started without an id"))?
            .to_string();
        debug!(bucket, key, upload_id = %upload_id, "started multipart upload");

        Ok(Self {
            client: client.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id,
            parts: Vec::new(),
            bytes_written: 0,
        })
    }

    /// Send the part already in `buffer`, then the rest of `body`.
    async fn send_remaining(
        &mut self,
        mut buffer: BytesMut,
        body: &mut ByteStream,
    ) -> ObjectStoreResult<()> {
        loop {
            if !buffer.is_empty() {
                self.upload_part(buffer.split().freeze()).await?;
            }
            if fill_part(body, &mut buffer).await? {
                if !buffer.is_empty() {
                    self.upload_part(buffer.split().freeze()).await?;
                }
                return Ok(());
            }
        }
    }

    async fn upload_part(&mut self, data: Bytes) -> ObjectStoreResult<()> {
        let part_number = i32::try_from(self.parts.len() + 1)
            .map_err(|_| ObjectStoreError::backend("too many parts"))?;
        let len = data.len() as u64;

        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .part_number(part_number)
            .content_length(part_length(&data)?)
            .body(SdkByteStream::from(data))
            .send()
            .await
            .map_err(ObjectStoreError::backend)?;

        self.parts.push(
            CompletedPart::builder()
                .e_tag(output.e_tag().unwrap_or_default())
                .part_number(part_number)
                .build(),
        );
        self.bytes_written += len;
        Ok(())
    }

    async fn complete(self) -> ObjectStoreResult<ObjectInfo> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(self.parts))
            .build();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(ObjectStoreError::backend)?;

        Ok(ObjectInfo {
            etag: output.e_tag().map(|etag| etag.trim_matches('"').to_string()),
            bucket: self.bucket,
            key: self.key,
            size: self.bytes_written,
        })
    }

    /// Best effort; orphaned parts are only logged.
    async fn abort(&self) {
        if let Err(err) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .send()
            .await
        {
            warn!(
                key = %self.key,
                upload_id = %self.upload_id,
                error = %err,
                "failed to abort multipart upload, orphaned parts may remain"
            );
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn bucket_exists(&self, bucket: &str) -> ObjectStoreResult<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(ObjectStoreError::backend(err)),
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn create_bucket(&self, bucket: &str) -> ObjectStoreResult<()> {
        let mut request = self.client.create_bucket().bucket(bucket);
        if self.region != DEFAULT_S3_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                let duplicate = err.as_service_error().is_some_and(|service_err| {
                    service_err.is_bucket_already_owned_by_you()
                        || service_err.is_bucket_already_exists()
                });
                if duplicate {
                    Err(ObjectStoreError::BucketAlreadyExists(bucket.to_string()))
                } else {
                    Err(ObjectStoreError::backend(err))
                }
            }
        }
    }

    /// Bodies that fit in one part go out as a single `PutObject`; anything
    /// larger is sent as a multipart upload, one [`PART_SIZE`] part at a time.
    #[instrument(skip(self, body), fields(backend = "s3"))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        mut body: ByteStream,
        size: u64,
        content_type: &str,
    ) -> ObjectStoreResult<ObjectInfo> {
        let capacity = usize::try_from(size).map_or(PART_SIZE, |size| size.min(PART_SIZE));
        let mut buffer = BytesMut::with_capacity(capacity);

        if fill_part(&mut body, &mut buffer).await? {
            return self
                .put_single(bucket, key, buffer.freeze(), content_type)
                .await;
        }

        let mut upload = MultipartUpload::start(&self.client, bucket, key, content_type).await?;
        match upload.send_remaining(buffer, &mut body).await {
            Ok(()) => upload.complete().await,
            Err(err) => {
                upload.abort().await;
                Err(err)
            }
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get_object(&self, bucket: &str, key: &str) -> ObjectStoreResult<ObjectBody> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if is_not_found(&err) {
                    ObjectStoreError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    ObjectStoreError::backend(err)
                }
            })?;

        let content_type = output.content_type().map(str::to_string);
        let size = output
            .content_length()
            .and_then(|len| u64::try_from(len).ok());
        let stream = ReaderStream::new(output.body.into_async_read());

        Ok(ObjectBody {
            stream: Box::pin(stream),
            content_type,
            size,
        })
    }

    #[instrument(skip(self, overrides), fields(backend = "s3"))]
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
        overrides: &ResponseOverrides,
    ) -> ObjectStoreResult<String> {
        let presigning = PresigningConfig::expires_in(ttl).map_err(ObjectStoreError::backend)?;
        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_response_content_disposition(overrides.content_disposition.clone())
            .set_response_content_type(overrides.content_type.clone())
            .presigned(presigning)
            .await
            .map_err(ObjectStoreError::backend)?;

        Ok(request.uri().to_string())
    }
}
