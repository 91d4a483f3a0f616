//! Health & readiness handlers.
//!
//! - GET /health  -> simple liveness (`OK`)
//! - GET /readyz  -> readiness that checks configuration and bucket reachability

use crate::services::upload_service::{UploadError, UploadService};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::BTreeMap;

/// `GET /health`
///
/// Cheap liveness probe; never touches the object store.
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// `GET /readyz`
///
/// 1. Store endpoint and credentials are configured.
/// 2. The configured bucket can be checked (it need not exist yet; uploads
///    create it on demand).
///
/// HTTP 200 when both pass, 503 otherwise.
pub async fn readyz(State(service): State<UploadService>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();

    match service.probe_store().await {
        Ok(bucket_exists) => {
            checks.insert("config", CheckStatus::ok());
            checks.insert(
                "store",
                CheckStatus {
                    ok: true,
                    error: None,
                    detail: Some(if bucket_exists {
                        "bucket present".into()
                    } else {
                        "bucket will be created on first upload".into()
                    }),
                },
            );
        }
        Err(err @ UploadError::Config(_)) => {
            checks.insert("config", CheckStatus::failed(err.to_string()));
        }
        Err(err) => {
            checks.insert("config", CheckStatus::ok());
            checks.insert("store", CheckStatus::failed(err.to_string()));
        }
    }

    let overall_ok = checks.values().all(|check| check.ok);
    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
            detail: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
            detail: None,
        }
    }
}
