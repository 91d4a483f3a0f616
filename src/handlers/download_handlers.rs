//! `GET /download` and `GET /metadata`.

use crate::{
    errors::AppError,
    models::object::JSON,
    services::{upload_service::UploadService, validation::sanitize_filename},
};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

/// `?filename=<name>`
#[derive(Debug, Deserialize)]
pub struct FilenameQuery {
    pub filename: Option<String>,
}

impl FilenameQuery {
    /// Storage key named by the query. Missing or blank is a 400.
    fn key(&self) -> Result<String, AppError> {
        match self.filename.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Ok(sanitize_filename(name)),
            _ => Err(AppError::bad_request("missing `filename` query parameter")),
        }
    }
}

/// Presigned link for a previously uploaded file, as plain text.
pub async fn download_link(
    State(service): State<UploadService>,
    Query(query): Query<FilenameQuery>,
) -> Result<Response, AppError> {
    let key = query.key()?;
    let url = service.presign_download(&key).await?;
    Ok((StatusCode::OK, url).into_response())
}

/// Stream back the sidecar metadata stored with an upload.
pub async fn get_metadata(
    State(service): State<UploadService>,
    Query(query): Query<FilenameQuery>,
) -> Result<Response, AppError> {
    let key = query.key()?;
    let object = service.fetch_metadata(&key).await?;

    let mut response = Response::new(Body::from_stream(object.stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON));
    if let Some(size) = object.size {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    }

    Ok(response)
}
