//! Data carried between the HTTP layer and the object store.
//!
//! Objects are addressed by `(bucket, key)`; the sidecar metadata document
//! lives next to its file under `<key>.metadata.json`.

pub mod metadata;
pub mod object;
