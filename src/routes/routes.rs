//! Defines the HTTP surface of the uploader.
//!
//! ## Structure
//! - **Upload API**
//!   - `POST /upload`   -> multipart upload, answers with a presigned link
//!   - `GET  /download` -> presigned link for `?filename=`
//!   - `GET  /metadata` -> sidecar metadata for `?filename=`
//!
//! - **Probes**
//!   - `GET /health` -> liveness
//!   - `GET /readyz` -> configuration + store reachability
//!
//! - **In-memory store** (only with the memory backend, nested under `/store`)
//!   - `GET /{bucket}/{*key}` -> presigned download, 403 unless the link verifies
//!
//! Every route answers CORS preflights permissively; any other method on a
//! known path is a 405.

use crate::{
    config::AppConfig,
    handlers::{
        download_handlers::{download_link, get_metadata},
        health_handlers::{health, readyz},
        store_handlers::get_object,
        upload_handlers::upload_file,
    },
    services::{memory_store::MemoryObjectStore, upload_service::UploadService},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::Method,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Build the upload API router. Carries `UploadService` as shared state.
pub fn routes(config: &AppConfig) -> Router<UploadService> {
    Router::new()
        .route("/health", get(health))
        .route("/readyz", get(readyz))
        .route(
            "/upload",
            post(upload_file).layer(DefaultBodyLimit::max(body_limit(config))),
        )
        .route("/download", get(download_link))
        .route("/metadata", get(get_metadata))
}

/// Presigned downloads from the in-memory store. Read-only.
pub fn store_routes() -> Router<MemoryObjectStore> {
    Router::new().route("/{bucket}/{*key}", get(get_object))
}

/// The complete application: API routes, the optional store emulation under
/// `/store`, CORS and request tracing.
pub fn app(service: UploadService, store: Option<MemoryObjectStore>) -> Router {
    let mut router = routes(service.config()).with_state(service);

    if let Some(store) = store {
        router = router.nest("/store", store_routes().with_state(store));
    }

    router.layer(cors()).layer(TraceLayer::new_for_http())
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any)
}

fn body_limit(config: &AppConfig) -> usize {
    usize::try_from(config.body_limit()).unwrap_or(usize::MAX)
}
