//! `POST /upload`: multipart upload that answers with a presigned link.
//!
//! The `file` part is staged on disk, measured, and streamed to the store;
//! the optional `metadata` part is decoded and stored as a sidecar.
//! Validation failures end the request before the store is contacted.

use crate::{
    errors::AppError,
    models::metadata::UploadMetadata,
    services::{
        object_store::ByteStream,
        upload_service::{PreparedUpload, UploadError, UploadService},
        validation::{sanitize_filename, validate_extension, validate_size},
    },
};
use anyhow::Context;
use axum::{
    extract::{
        Multipart, State,
        multipart::{Field, MultipartError, MultipartRejection},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncSeekExt, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

const FILE_FIELD: &str = "file";
const METADATA_FIELD: &str = "metadata";
const SUCCESS_LINE: &str = "File uploaded successfully";

/// Removes a staged upload when the request is done with it.
struct SpoolGuard(PathBuf);

impl Drop for SpoolGuard {
    fn drop(&mut self) {
        let path = std::mem::take(&mut self.0);
        // Unlinking blocks; keep it off the async workers when a runtime is around.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_spooled(&path));
            }
            Err(_) => remove_spooled(&path),
        }
    }
}

fn remove_spooled(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("removed staged upload {}", path.display()),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!("failed to remove staged upload {}: {}", path.display(), err),
    }
}

/// The `file` part, written to the spool directory.
struct SpooledPart {
    declared_name: String,
    file: File,
    _guard: SpoolGuard,
}

#[derive(Default)]
struct UploadForm {
    file: Option<SpooledPart>,
    metadata: Option<String>,
}

/// Upload a file from the `file` form field.
pub async fn upload_file(
    State(service): State<UploadService>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    let config = service.config();

    // Trust a declared length enough to refuse obviously oversized bodies
    // before reading any of them.
    if let Some(declared) = declared_length(&headers) {
        let limit = config.body_limit();
        if declared > limit {
            return Err(UploadError::PayloadTooLarge { declared, limit }.into());
        }
    }

    let mut multipart = multipart.map_err(|rejection| {
        AppError::bad_request(format!("invalid multipart request: {}", rejection.body_text()))
    })?;
    let form = read_form(&mut multipart, &config.spool_dir).await?;

    let Some(mut part) = form.file else {
        return Err(UploadError::bad_request("missing `file` field").into());
    };

    part.file
        .rewind()
        .await
        .context("failed to rewind staged upload")?;

    let key = sanitize_filename(&part.declared_name);
    if key != part.declared_name {
        debug!(declared = %part.declared_name, key = %key, "sanitized filename");
    }
    if config.restrict_extensions {
        validate_extension(&key).map_err(UploadError::from)?;
    }

    let size = validate_size(&mut part.file, config.max_upload_bytes)
        .await
        .map_err(UploadError::from)?;

    let metadata = form
        .metadata
        .as_deref()
        .map(UploadMetadata::from_json)
        .transpose()
        .map_err(|err| UploadError::bad_request(format!("invalid metadata JSON: {}", err)))?;

    debug!(key = %key, size, has_metadata = metadata.is_some(), "upload validated");

    let body: ByteStream = Box::pin(ReaderStream::new(part.file));
    let url = service
        .store_upload(PreparedUpload {
            key,
            body,
            size,
            metadata,
        })
        .await?;

    Ok((StatusCode::OK, format!("{}\n{}", url, SUCCESS_LINE)).into_response())
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

fn parse_error(err: MultipartError) -> AppError {
    AppError::bad_request(format!("failed to parse multipart body: {}", err.body_text()))
}

/// Walk the form. The first `file` and `metadata` fields win; anything else
/// is skipped.
async fn read_form(multipart: &mut Multipart, spool_dir: &Path) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();

    while let Some(mut field) = multipart.next_field().await.map_err(parse_error)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some(FILE_FIELD) if form.file.is_none() => {
                let declared_name = field.file_name().unwrap_or_default().to_string();
                form.file = Some(spool_field(&mut field, spool_dir, declared_name).await?);
            }
            Some(METADATA_FIELD) if form.metadata.is_none() => {
                let text = field.text().await.map_err(parse_error)?;
                if !text.trim().is_empty() {
                    form.metadata = Some(text);
                }
            }
            other => debug!(field = ?other, "ignoring form field"),
        }
    }

    Ok(form)
}

/// Copy a field to a fresh file in `spool_dir`, chunk by chunk.
async fn spool_field(
    field: &mut Field<'_>,
    spool_dir: &Path,
    declared_name: String,
) -> Result<SpooledPart, AppError> {
    let path = spool_dir.join(format!(".upload-{}", Uuid::new_v4()));
    let guard = SpoolGuard(path.clone());

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(&path)
        .await
        .context("failed to stage upload")?;

    let mut written: u64 = 0;
    while let Some(chunk) = field.chunk().await.map_err(parse_error)? {
        written += chunk.len() as u64;
        file.write_all(&chunk)
            .await
            .context("failed to stage upload")?;
    }
    file.flush().await.context("failed to stage upload")?;
    debug!(bytes = written, "staged file part");

    Ok(SpooledPart {
        declared_name,
        file,
        _guard: guard,
    })
}
