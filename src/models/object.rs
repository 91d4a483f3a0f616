//! Represents an object (file) held by the object store.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content type written for every primary upload.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Content type of the sidecar metadata document.
pub const JSON: &str = "application/json";

/// A single object in the in-memory store.
///
/// Bucket and key are not repeated here; the store's map provides them.
/// Writing the same key again replaces the object, there is no versioning.
#[derive(Clone, Debug)]
pub struct StoredObject {
    /// Full payload.
    pub content: Bytes,

    /// Content type tag given on PUT, if any.
    pub content_type: Option<String>,

    /// MD5 of the payload, hex encoded.
    pub etag: String,

    /// Time of the last successful PUT.
    pub last_modified: DateTime<Utc>,
}

impl StoredObject {
    pub fn new(content: Bytes, content_type: Option<String>) -> Self {
        let etag = format!("{:x}", md5::compute(&content));
        Self {
            content,
            content_type,
            etag,
            last_modified: Utc::now(),
        }
    }
}

/// What a store reports back after a successful PUT.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
}

/// Key of the sidecar metadata document for `key`.
pub fn metadata_key(key: &str) -> String {
    format!("{}.metadata.json", key)
}
