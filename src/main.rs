use anyhow::{Context, Result};
use presign_uploader::{
    config::{AppConfig, StoreBackend},
    routes::routes::app,
    services::{
        memory_store::MemoryObjectStore, object_store::ObjectStore, s3_store::S3ObjectStore,
        upload_service::UploadService,
    },
};
use std::{io::ErrorKind, net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;
    tracing::info!("Starting presign-uploader with config: {:?}", cfg);

    if let Err(err) = cfg.store.connection() {
        tracing::warn!(
            "Object store is not fully configured ({}); uploads will fail until it is",
            err
        );
    }

    // --- Ensure spool directory exists ---
    if !cfg.spool_dir.exists() {
        tokio::fs::create_dir_all(&cfg.spool_dir)
            .await
            .with_context(|| format!("creating spool directory {}", cfg.spool_dir.display()))?;
        tracing::info!("Created spool directory at {}", cfg.spool_dir.display());
    }

    // --- Initialize object store ---
    let (store, emulation): (Arc<dyn ObjectStore>, Option<MemoryObjectStore>) =
        match cfg.store.backend() {
            StoreBackend::S3 => {
                let s3: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(&cfg.store));
                (s3, None)
            }
            StoreBackend::Memory => {
                let conn = cfg.store.connection()?;
                let memory =
                    MemoryObjectStore::new(conn.endpoint, conn.access_key, conn.secret_key);
                tracing::info!("Using in-memory object store at {}", memory.base_url());
                let shared: Arc<dyn ObjectStore> = Arc::new(memory.clone());
                (shared, Some(memory))
            }
        };

    let cfg = Arc::new(cfg);
    let service = UploadService::new(cfg.clone(), store);

    // --- Build router ---
    let router = app(service, emulation);

    // --- Start server ---
    if cfg.tls.enabled {
        run_https_server(&cfg, router).await
    } else {
        run_http_server(&cfg, router).await
    }
}

async fn run_http_server(cfg: &AppConfig, router: axum::Router) -> Result<()> {
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn run_https_server(cfg: &AppConfig, router: axum::Router) -> Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let cert_path = cfg
        .tls
        .cert_path
        .as_ref()
        .context("TLS certificate path not configured")?;
    let key_path = cfg
        .tls
        .key_path
        .as_ref()
        .context("TLS private key path not configured")?;

    tracing::info!("Loading TLS certificate from {:?}", cert_path);
    let rustls_config = RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .context("Failed to load TLS certificate and key")?;

    let addr: SocketAddr = cfg
        .addr()
        .parse()
        .with_context(|| format!("parsing listen address `{}`", cfg.addr()))?;

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(30)));
    });

    tracing::info!("Server listening on https://{}", addr);
    axum_server::bind_rustls(addr, rustls_config)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, starting graceful shutdown..."),
        _ = terminate => tracing::info!("Received terminate signal, starting graceful shutdown..."),
    }
}
