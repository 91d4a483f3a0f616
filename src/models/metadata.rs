//! Client-side encryption parameters uploaded alongside a file.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sidecar document describing how a client prepared an upload.
///
/// Every field is optional and nothing is cross-checked against the stored
/// file. Unknown fields are kept so the stored document round-trips.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Cipher used on the client, e.g. `AES-GCM`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,

    /// Initialization vector, encoded by the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,

    /// Reference to the key material; never the key itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,

    /// Digest of the plaintext.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    /// Plaintext size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_size: Option<u64>,

    /// Client timestamp, milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UploadMetadata {
    /// Decode the raw `metadata` form field.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
