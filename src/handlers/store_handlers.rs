//! Serves presigned links handed out by the in-memory store.
//!
//! Only `GET /{bucket}/{*key}` is exposed. Writes go through the upload API,
//! never through this surface.

use crate::{
    errors::AppError,
    models::object::{OCTET_STREAM, StoredObject},
    services::{
        memory_store::MemoryObjectStore,
        object_store::{ObjectStoreError, ResponseOverrides},
    },
};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use std::collections::HashMap;
use tracing::debug;

fn store_error(err: ObjectStoreError) -> AppError {
    if err.is_not_found() {
        AppError::not_found(err.to_string())
    } else {
        AppError::internal(err.to_string())
    }
}

/// `GET /{bucket}/{*key}`
///
/// Only presigned requests are served. A missing, altered or expired
/// signature is a 403; the object is looked up only after the link checks out.
pub async fn get_object(
    State(store): State<MemoryObjectStore>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let overrides = store
        .verify_presigned(&bucket, &key, &query)
        .map_err(|rejection| {
            debug!(bucket = %bucket, key = %key, %rejection, "refused presigned request");
            AppError::new(StatusCode::FORBIDDEN, rejection.to_string())
        })?;

    let object = store.get(&bucket, &key).await.map_err(store_error)?;
    Ok(object_response(object, &overrides))
}

fn object_response(object: StoredObject, overrides: &ResponseOverrides) -> Response {
    let content_type = overrides
        .content_type
        .clone()
        .or(object.content_type)
        .unwrap_or_else(|| OCTET_STREAM.into());
    let length = object.content.len() as u64;

    let mut response = Response::new(Body::from(object.content));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(OCTET_STREAM)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", object.etag)) {
        headers.insert(header::ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(&object.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    if let Some(disposition) = &overrides.content_disposition {
        if let Ok(value) = HeaderValue::from_str(disposition) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }
    response
}
