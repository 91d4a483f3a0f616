//! In-memory object store.
//!
//! Mirrors the HTTP behaviour of an S3 endpoint closely enough to stand in
//! for one: `HEAD /{bucket}` existence checks, `PUT` with an empty key creates
//! the bucket, `PUT` of an object needs the bucket to exist, `GET` is 404 for a
//! missing bucket or key. [`crate::routes::routes::store_routes`] serves
//! presigned GETs over HTTP; links are signed with HMAC-SHA256.
//!
//! All access goes through one mutex; the lock is never held across I/O.

use crate::{
    models::object::{ObjectInfo, StoredObject},
    services::object_store::{
        ByteStream, ObjectBody, ObjectStore, ObjectStoreError, ObjectStoreResult,
        ResponseOverrides,
    },
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::{StreamExt, stream};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::Sha256;
use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::sync::Mutex;

/// RFC 3986 unreserved characters stay readable in keys and query values.
const URL_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const SIGNING_ALGORITHM: &str = "UPLOADER-HMAC-SHA256";

type HmacSha256 = Hmac<Sha256>;

pub const QUERY_ALGORITHM: &str = "X-Amz-Algorithm";
pub const QUERY_CREDENTIAL: &str = "X-Amz-Credential";
pub const QUERY_DATE: &str = "X-Amz-Date";
pub const QUERY_EXPIRES: &str = "X-Amz-Expires";
pub const QUERY_SIGNATURE: &str = "X-Amz-Signature";
pub const QUERY_CONTENT_DISPOSITION: &str = "response-content-disposition";
pub const QUERY_CONTENT_TYPE: &str = "response-content-type";

type Buckets = HashMap<String, HashMap<String, StoredObject>>;

/// Why a presigned link was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PresignRejection {
    #[error("missing query parameter `{0}`")]
    MissingParameter(&'static str),
    #[error("malformed query parameter `{0}`")]
    Malformed(&'static str),
    #[error("signature does not match")]
    SignatureMismatch,
    #[error("presigned link expired")]
    Expired,
}

/// Signs and verifies links the in-memory store hands out.
#[derive(Clone)]
struct LinkSigner {
    base_url: String,
    access_key: String,
    secret_key: String,
}

impl LinkSigner {
    /// HMAC over the signed fields. Each field is tagged with its presence
    /// and length, so no two distinct field lists share an input.
    fn mac(
        &self,
        bucket: &str,
        key: &str,
        date: &str,
        expires: u64,
        overrides: &ResponseOverrides,
    ) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes()).ok()?;
        let expires = expires.to_string();
        let fields = [
            Some(self.access_key.as_str()),
            Some(bucket),
            Some(key),
            Some(date),
            Some(expires.as_str()),
            overrides.content_disposition.as_deref(),
            overrides.content_type.as_deref(),
        ];
        for field in fields {
            match field {
                Some(value) => {
                    mac.update(&[1]);
                    mac.update(&(value.len() as u64).to_be_bytes());
                    mac.update(value.as_bytes());
                }
                None => mac.update(&[0]),
            }
        }
        Some(mac)
    }

    fn sign(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
        overrides: &ResponseOverrides,
        now: DateTime<Utc>,
    ) -> ObjectStoreResult<String> {
        let date = now.format(AMZ_DATE_FORMAT).to_string();
        let expires = ttl.as_secs();
        let signature = self
            .mac(bucket, key, &date, expires, overrides)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
            .ok_or_else(|| ObjectStoreError::backend("signing key rejected"))?;

        let mut query = vec![
            (QUERY_ALGORITHM, SIGNING_ALGORITHM.to_string()),
            (QUERY_CREDENTIAL, self.access_key.clone()),
            (QUERY_DATE, date),
            (QUERY_EXPIRES, expires.to_string()),
        ];
        if let Some(disposition) = &overrides.content_disposition {
            query.push((QUERY_CONTENT_DISPOSITION, disposition.clone()));
        }
        if let Some(content_type) = &overrides.content_type {
            query.push((QUERY_CONTENT_TYPE, content_type.clone()));
        }
        query.push((QUERY_SIGNATURE, signature));

        let query = query
            .iter()
            .map(|(name, value)| format!("{}={}", name, utf8_percent_encode(value, URL_ENCODE)))
            .collect::<Vec<_>>()
            .join("&");
        let encoded_key = key
            .split('/')
            .map(|segment| utf8_percent_encode(segment, URL_ENCODE).to_string())
            .collect::<Vec<_>>()
            .join("/");

        Ok(format!(
            "{}/{}/{}?{}",
            self.base_url.trim_end_matches('/'),
            utf8_percent_encode(bucket, URL_ENCODE),
            encoded_key,
            query
        ))
    }

    /// Check a decoded query string against `bucket`/`key`.
    ///
    /// Returns the response overrides the link carries.
    fn verify(
        &self,
        bucket: &str,
        key: &str,
        query: &HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<ResponseOverrides, PresignRejection> {
        let param = |name: &'static str| {
            query
                .get(name)
                .map(String::as_str)
                .ok_or(PresignRejection::MissingParameter(name))
        };

        let signature = hex::decode(param(QUERY_SIGNATURE)?)
            .map_err(|_| PresignRejection::Malformed(QUERY_SIGNATURE))?;
        if param(QUERY_ALGORITHM)? != SIGNING_ALGORITHM {
            return Err(PresignRejection::Malformed(QUERY_ALGORITHM));
        }
        if param(QUERY_CREDENTIAL)? != self.access_key {
            return Err(PresignRejection::SignatureMismatch);
        }
        let date = param(QUERY_DATE)?;
        let expires = param(QUERY_EXPIRES)?
            .parse::<u64>()
            .map_err(|_| PresignRejection::Malformed(QUERY_EXPIRES))?;
        let overrides = ResponseOverrides {
            content_disposition: query.get(QUERY_CONTENT_DISPOSITION).cloned(),
            content_type: query.get(QUERY_CONTENT_TYPE).cloned(),
        };

        self.mac(bucket, key, date, expires, &overrides)
            .ok_or(PresignRejection::SignatureMismatch)?
            .verify_slice(&signature)
            .map_err(|_| PresignRejection::SignatureMismatch)?;

        let signed_at = NaiveDateTime::parse_from_str(date, AMZ_DATE_FORMAT)
            .map_err(|_| PresignRejection::Malformed(QUERY_DATE))?
            .and_utc();
        let deadline = i64::try_from(expires)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|ttl| signed_at.checked_add_signed(ttl));
        match deadline {
            Some(deadline) if deadline >= now => Ok(overrides),
            Some(_) => Err(PresignRejection::Expired),
            None => Ok(overrides),
        }
    }
}

/// Thread-safe in-memory bucket/object map.
#[derive(Clone)]
pub struct MemoryObjectStore {
    buckets: Arc<Mutex<Buckets>>,
    signer: Arc<LinkSigner>,
}

impl MemoryObjectStore {
    /// `base_url` is where [`store_routes`](crate::routes::routes::store_routes)
    /// is reachable, e.g. `http://127.0.0.1:5500/store`.
    pub fn new(
        base_url: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            signer: Arc::new(LinkSigner {
                base_url: base_url.into(),
                access_key: access_key.into(),
                secret_key: secret_key.into(),
            }),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.signer.base_url
    }

    /// `HEAD /{bucket}`.
    pub async fn head_bucket(&self, bucket: &str) -> bool {
        self.buckets.lock().await.contains_key(bucket)
    }

    /// `PUT /{bucket}/{key}`.
    ///
    /// An empty key creates the bucket (a no-op when it exists). Otherwise the
    /// object is written only if the bucket exists.
    pub async fn put(
        &self,
        bucket: &str,
        key: &str,
        content: Bytes,
        content_type: Option<String>,
    ) -> ObjectStoreResult<Option<ObjectInfo>> {
        let mut buckets = self.buckets.lock().await;
        if key.is_empty() {
            buckets.entry(bucket.to_string()).or_default();
            return Ok(None);
        }

        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| ObjectStoreError::BucketNotFound(bucket.to_string()))?;
        let object = StoredObject::new(content, content_type);
        let info = ObjectInfo {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: object.content.len() as u64,
            etag: Some(object.etag.clone()),
        };
        objects.insert(key.to_string(), object);
        Ok(Some(info))
    }

    /// `GET /{bucket}/{key}`.
    pub async fn get(&self, bucket: &str, key: &str) -> ObjectStoreResult<StoredObject> {
        let buckets = self.buckets.lock().await;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| ObjectStoreError::BucketNotFound(bucket.to_string()))?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    /// Direct lookup, `None` when the bucket or key is missing.
    pub async fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.get(bucket, key).await.ok()
    }

    /// Number of objects in `bucket` (0 when it does not exist).
    pub async fn object_count(&self, bucket: &str) -> usize {
        self.buckets
            .lock()
            .await
            .get(bucket)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// Validate the query string of a presigned link for `bucket`/`key`.
    pub fn verify_presigned(
        &self,
        bucket: &str,
        key: &str,
        query: &HashMap<String, String>,
    ) -> Result<ResponseOverrides, PresignRejection> {
        self.signer.verify(bucket, key, query, Utc::now())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> ObjectStoreResult<bool> {
        Ok(self.head_bucket(bucket).await)
    }

    async fn create_bucket(&self, bucket: &str) -> ObjectStoreResult<()> {
        self.put(bucket, "", Bytes::new(), None).await.map(|_| ())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        mut body: ByteStream,
        size: u64,
        content_type: &str,
    ) -> ObjectStoreResult<ObjectInfo> {
        if key.is_empty() {
            return Err(ObjectStoreError::backend("object key must not be empty"));
        }

        let mut content = BytesMut::with_capacity(usize::try_from(size).unwrap_or(0));
        while let Some(chunk) = body.next().await {
            content.extend_from_slice(&chunk?);
        }

        self.put(bucket, key, content.freeze(), Some(content_type.to_string()))
            .await?
            .ok_or_else(|| ObjectStoreError::backend("object write did not produce an object"))
    }

    async fn get_object(&self, bucket: &str, key: &str) -> ObjectStoreResult<ObjectBody> {
        let object = self.get(bucket, key).await?;
        let size = object.content.len() as u64;
        let content = object.content;
        Ok(ObjectBody {
            stream: Box::pin(stream::once(async move { Ok(content) })),
            content_type: object.content_type,
            size: Some(size),
        })
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
        overrides: &ResponseOverrides,
    ) -> ObjectStoreResult<String> {
        self.signer.sign(bucket, key, ttl, overrides, Utc::now())
    }
}
