//! Upload API integration tests.
//!
//! Drives the full router in-process with `tower::ServiceExt::oneshot`,
//! backed by the in-memory store so presigned links can be fetched back
//! through the same router.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use http_body_util::BodyExt;
use presign_uploader::{
    config::{AppConfig, StoreBackend, StoreSettings},
    models::metadata::UploadMetadata,
    routes::routes::app,
    services::{memory_store::MemoryObjectStore, upload_service::UploadService},
};
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;
use tower::ServiceExt;

const ORIGIN: &str = "http://uploader.test";
const BOUNDARY: &str = "----uploader-test-boundary";

struct TestApp {
    router: Router,
    store: MemoryObjectStore,
    _spool: TempDir,
}

fn test_config(spool: &TempDir) -> AppConfig {
    AppConfig {
        spool_dir: spool.path().to_path_buf(),
        store: StoreSettings {
            backend: Some(StoreBackend::Memory),
            endpoint: Some(format!("{}/store", ORIGIN)),
            access_key: Some("dummy".into()),
            secret_key: Some("dummy".into()),
            ..AppConfig::default().store
        },
        ..AppConfig::default()
    }
}

fn build(configure: impl FnOnce(&mut AppConfig)) -> TestApp {
    let spool = TempDir::new().expect("Failed to create spool dir");
    let mut config = test_config(&spool);
    configure(&mut config);

    let store = MemoryObjectStore::new(format!("{}/store", ORIGIN), "dummy", "dummy");
    let service = UploadService::new(Arc::new(config), Arc::new(store.clone()));

    TestApp {
        router: app(service, Some(store.clone())),
        store,
        _spool: spool,
    }
}

fn test_app() -> TestApp {
    build(|_| {})
}

enum Part<'a> {
    File { filename: &'a str, content: &'a [u8] },
    Text { name: &'a str, value: &'a str },
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File { filename, content } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        filename
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(content);
            }
            Part::Text { name, value } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}",
                        name, value
                    )
                    .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(parts: &[Part<'_>]) -> Request<Body> {
    let body = multipart_body(parts);
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &TestApp, request: Request<Body>) -> Response {
    app.router.clone().oneshot(request).await.unwrap()
}

async fn body_to_string(body: Body) -> String {
    let bytes = body.collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Path and query of a link handed out by the in-memory store.
fn local_path(url: &str) -> &str {
    url.strip_prefix(ORIGIN)
        .unwrap_or_else(|| panic!("link `{}` does not point at this server", url))
}

// ============================================================================
// Upload
// ============================================================================

#[tokio::test]
async fn test_upload_returns_link_and_stores_file() {
    let app = test_app();

    let response = send(
        &app,
        upload_request(&[Part::File {
            filename: "test.txt",
            content: b"hello world",
        }]),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_string(response.into_body()).await;
    let (url, message) = body.split_once('\n').unwrap();
    assert!(url.contains("test.txt"));
    assert_eq!(message, "File uploaded successfully");

    let stored = app.store.object("sarvesh", "test.txt").await.unwrap();
    assert_eq!(stored.content, "hello world");
    assert_eq!(app.store.object_count("sarvesh").await, 1);
}

#[tokio::test]
async fn test_presigned_link_downloads_the_file() {
    let app = test_app();

    let response = send(
        &app,
        upload_request(&[Part::File {
            filename: "report.txt",
            content: b"quarterly numbers",
        }]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_string(response.into_body()).await;
    let url = body.lines().next().unwrap();

    let response = send(&app, get(local_path(url))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"report.txt\""
    );
    assert_eq!(body_to_string(response.into_body()).await, "quarterly numbers");
}

#[tokio::test]
async fn test_tampered_link_is_forbidden() {
    let app = test_app();

    let response = send(
        &app,
        upload_request(&[Part::File {
            filename: "secret.txt",
            content: b"classified",
        }]),
    )
    .await;
    let body = body_to_string(response.into_body()).await;
    let url = body.lines().next().unwrap();
    let tampered = local_path(url).replace("secret.txt", "other.txt");

    let response = send(&app, get(&tampered)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_store_refuses_unsigned_reads_and_all_writes() {
    let app = test_app();

    let response = send(
        &app,
        upload_request(&[Part::File {
            filename: "secret.txt",
            content: b"classified",
        }]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, get("/store/sarvesh/secret.txt")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_to_string(response.into_body()).await;
    assert!(!body.contains("classified"));

    let overwrite = Request::builder()
        .method("PUT")
        .uri("/store/sarvesh/secret.txt")
        .body(Body::from("overwritten"))
        .unwrap();
    let response = send(&app, overwrite).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let create = Request::builder()
        .method("PUT")
        .uri("/store/another-bucket")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, create).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let stored = app.store.object("sarvesh", "secret.txt").await.unwrap();
    assert_eq!(stored.content, "classified");
    assert!(!app.store.head_bucket("another-bucket").await);
}

#[tokio::test]
async fn test_expired_link_is_forbidden() {
    let app = build(|config| config.presign_ttl = Duration::ZERO);

    let response = send(
        &app,
        upload_request(&[Part::File {
            filename: "short-lived.txt",
            content: b"gone soon",
        }]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_string(response.into_body()).await;
    let url = body.lines().next().unwrap().to_string();

    // Link dates have one-second resolution.
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let response = send(&app, get(local_path(&url))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_upload_with_metadata_stores_sidecar() {
    let app = test_app();
    let metadata = r#"{"version":"1","originalFilename":"orig.txt","algorithm":"AES-GCM"}"#;

    let response = send(
        &app,
        upload_request(&[
            Part::File {
                filename: "encrypted.dat",
                content: b"\x00\x01ciphertext",
            },
            Part::Text {
                name: "metadata",
                value: metadata,
            },
        ]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(app.store.object_count("sarvesh").await, 2);
    let sidecar = app
        .store
        .object("sarvesh", "encrypted.dat.metadata.json")
        .await
        .unwrap();
    assert_eq!(sidecar.content_type.as_deref(), Some("application/json"));

    let stored: UploadMetadata = serde_json::from_slice(&sidecar.content).unwrap();
    assert_eq!(stored, UploadMetadata::from_json(metadata).unwrap());
    assert_eq!(stored.original_filename.as_deref(), Some("orig.txt"));
}

#[tokio::test]
async fn test_upload_sanitizes_filename() {
    let app = test_app();

    let response = send(
        &app,
        upload_request(&[Part::File {
            filename: "../../etc/passwd.txt",
            content: b"nope",
        }]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert!(app.store.object("sarvesh", "passwd.txt").await.is_some());
    assert_eq!(app.store.object_count("sarvesh").await, 1);
}

#[tokio::test]
async fn test_oversized_file_is_rejected() {
    let app = build(|config| config.max_upload_bytes = 8);

    let response = send(
        &app,
        upload_request(&[Part::File {
            filename: "big.bin",
            content: b"more than eight bytes",
        }]),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.store.object_count("sarvesh").await, 0);
}

#[tokio::test]
async fn test_file_at_exact_limit_is_accepted() {
    let app = build(|config| config.max_upload_bytes = 11);

    let response = send(
        &app,
        upload_request(&[Part::File {
            filename: "exact.txt",
            content: b"hello world",
        }]),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_declared_length_over_limit_is_413() {
    let app = build(|config| config.max_upload_bytes = 8);
    let body = multipart_body(&[Part::File {
        filename: "a.txt",
        content: b"a",
    }]);

    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .header(header::CONTENT_LENGTH, 10 * 1024 * 1024)
        .body(Body::from(body))
        .unwrap();

    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(app.store.object_count("sarvesh").await, 0);
}

#[tokio::test]
async fn test_missing_file_field_is_400() {
    let app = test_app();

    let response = send(
        &app,
        upload_request(&[Part::Text {
            name: "metadata",
            value: "{}",
        }]),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!app.store.head_bucket("sarvesh").await);
}

#[tokio::test]
async fn test_non_multipart_body_is_400() {
    let app = test_app();

    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("hello"))
        .unwrap();

    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_metadata_json_is_400() {
    let app = test_app();

    let response = send(
        &app,
        upload_request(&[
            Part::File {
                filename: "a.dat",
                content: b"abc",
            },
            Part::Text {
                name: "metadata",
                value: "{not json",
            },
        ]),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_to_string(response.into_body()).await;
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], 400);
    assert_eq!(app.store.object_count("sarvesh").await, 0);
}

#[tokio::test]
async fn test_restricted_extensions_reject_executables() {
    let app = build(|config| config.restrict_extensions = true);

    let response = send(
        &app,
        upload_request(&[Part::File {
            filename: "setup.exe",
            content: b"MZ",
        }]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        upload_request(&[Part::File {
            filename: "notes.txt",
            content: b"fine",
        }]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_credentials_is_500() {
    let app = build(|config| config.store.secret_key = None);

    let response = send(
        &app,
        upload_request(&[Part::File {
            filename: "test.txt",
            content: b"hello",
        }]),
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!app.store.head_bucket("sarvesh").await);
}

#[tokio::test]
async fn test_get_on_upload_is_405() {
    let app = test_app();

    let response = send(&app, get("/upload")).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_preflight_is_answered_with_cors_headers() {
    let app = test_app();

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/upload")
        .header(header::ORIGIN, "http://client.example")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();

    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
}

// ============================================================================
// Download and metadata
// ============================================================================

#[tokio::test]
async fn test_download_requires_filename() {
    let app = test_app();

    for uri in ["/download", "/download?filename=", "/metadata"] {
        let response = send(&app, get(uri)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
    }
}

#[tokio::test]
async fn test_download_returns_presigned_link() {
    let app = test_app();
    app.store
        .put("sarvesh", "", Default::default(), None)
        .await
        .unwrap();
    app.store
        .put("sarvesh", "xyz.bin", "payload".into(), None)
        .await
        .unwrap();

    let response = send(&app, get("/download?filename=xyz.bin")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let url = body_to_string(response.into_body()).await;
    assert!(url.contains("xyz.bin"));

    let response = send(&app, get(local_path(&url))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_to_string(response.into_body()).await, "payload");
}

#[tokio::test]
async fn test_metadata_lookup() {
    let app = test_app();

    let response = send(&app, get("/metadata?filename=encrypted.dat")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(
        &app,
        upload_request(&[
            Part::File {
                filename: "encrypted.dat",
                content: b"ciphertext",
            },
            Part::Text {
                name: "metadata",
                value: r#"{"iv":"abc","originalSize":10}"#,
            },
        ]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, get("/metadata?filename=encrypted.dat")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    let body = body_to_string(response.into_body()).await;
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["iv"], "abc");
    assert_eq!(json["originalSize"], 10);
}

// ============================================================================
// Probes
// ============================================================================

#[tokio::test]
async fn test_health() {
    let app = test_app();

    let response = send(&app, get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_to_string(response.into_body()).await, "OK");
}

#[tokio::test]
async fn test_readyz_reports_configuration() {
    let app = test_app();
    let response = send(&app, get("/readyz")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let app = build(|config| config.store.access_key = None);
    let response = send(&app, get("/readyz")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_to_string(response.into_body()).await;
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["checks"]["config"]["ok"], false);
}
