use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, fmt, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;

/// Bytes allowed on top of `max_upload_bytes` for multipart boundaries,
/// part headers and the optional metadata field.
pub const MULTIPART_FRAMING_ALLOWANCE: u64 = 64 * 1024;

const DEFAULT_MAX_UPLOAD_BYTES: u64 = 1 << 30;
const DEFAULT_PRESIGN_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_BUCKET: &str = "sarvesh";
const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_PORT: u16 = 5500;

/// Which object store implementation backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// Remote S3-compatible endpoint (MinIO, AWS, ...).
    S3,
    /// In-process store, served under `/store`.
    Memory,
}

/// Raised at request time when the store connection is not fully configured.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
}

/// Object store connection settings.
///
/// Every field is optional at startup; [`StoreSettings::connection`] is the
/// single place that decides whether a request may talk to the store.
#[derive(Clone, Default)]
pub struct StoreSettings {
    pub backend: Option<StoreBackend>,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub region: String,
}

/// Validated view of [`StoreSettings`].
#[derive(Clone, Copy)]
pub struct StoreConnection<'a> {
    pub endpoint: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub region: &'a str,
}

impl StoreSettings {
    pub fn backend(&self) -> StoreBackend {
        self.backend.unwrap_or(StoreBackend::S3)
    }

    /// Returns the endpoint and credentials, or the first missing one.
    pub fn connection(&self) -> Result<StoreConnection<'_>, ConfigError> {
        let endpoint = non_empty(&self.endpoint).ok_or(ConfigError::Missing(ENV_ENDPOINT))?;
        let access_key = non_empty(&self.access_key).ok_or(ConfigError::Missing(ENV_ACCESS_KEY))?;
        let secret_key = non_empty(&self.secret_key).ok_or(ConfigError::Missing(ENV_SECRET_KEY))?;
        Ok(StoreConnection {
            endpoint,
            access_key,
            secret_key,
            region: &self.region,
        })
    }
}

impl fmt::Debug for StoreSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSettings")
            .field("backend", &self.backend())
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field(
                "secret_key",
                &self.secret_key.as_ref().map(|_| "<redacted>"),
            )
            .field("region", &self.region)
            .finish()
    }
}

/// TLS settings. Both paths are required once TLS is enabled.
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    pub enabled: bool,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
}

impl TlsSettings {
    pub fn validate(&self) -> Result<()> {
        if self.enabled {
            if self.cert_path.is_none() {
                bail!("TLS enabled but {} is not set", ENV_TLS_CERT);
            }
            if self.key_path.is_none() {
                bail!("TLS enabled but {} is not set", ENV_TLS_KEY);
            }
        }
        Ok(())
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments; built once in `main`
/// and shared read-only with every handler.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub bucket: String,
    pub max_upload_bytes: u64,
    pub presign_ttl: Duration,
    pub restrict_extensions: bool,
    pub spool_dir: PathBuf,
    pub store: StoreSettings,
    pub tls: TlsSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            bucket: DEFAULT_BUCKET.into(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            presign_ttl: Duration::from_secs(DEFAULT_PRESIGN_TTL_SECS),
            restrict_extensions: false,
            spool_dir: env::temp_dir(),
            store: StoreSettings {
                region: DEFAULT_REGION.into(),
                ..StoreSettings::default()
            },
            tls: TlsSettings::default(),
        }
    }
}

const ENV_HOST: &str = "UPLOADER_HOST";
const ENV_PORT: &str = "UPLOADER_PORT";
const ENV_BUCKET: &str = "UPLOADER_BUCKET";
const ENV_MAX_UPLOAD: &str = "UPLOADER_MAX_UPLOAD_BYTES";
const ENV_PRESIGN_TTL: &str = "UPLOADER_PRESIGN_TTL_SECS";
const ENV_RESTRICT_EXT: &str = "UPLOADER_RESTRICT_EXTENSIONS";
const ENV_SPOOL_DIR: &str = "UPLOADER_SPOOL_DIR";
const ENV_BACKEND: &str = "UPLOADER_STORE_BACKEND";
const ENV_ENDPOINT: &str = "UPLOADER_STORE_ENDPOINT";
const ENV_ACCESS_KEY: &str = "UPLOADER_ACCESS_KEY";
const ENV_SECRET_KEY: &str = "UPLOADER_SECRET_KEY";
const ENV_REGION: &str = "UPLOADER_STORE_REGION";
const ENV_TLS_ENABLED: &str = "UPLOADER_TLS_ENABLED";
const ENV_TLS_CERT: &str = "UPLOADER_TLS_CERT";
const ENV_TLS_KEY: &str = "UPLOADER_TLS_KEY";

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Upload files to an S3-compatible store and hand out presigned links")]
pub struct Args {
    /// Host to bind to (overrides UPLOADER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOADER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Bucket uploads are written to (overrides UPLOADER_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Largest accepted file in bytes (overrides UPLOADER_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<u64>,

    /// Lifetime of presigned links in seconds (overrides UPLOADER_PRESIGN_TTL_SECS)
    #[arg(long)]
    pub presign_ttl_secs: Option<u64>,

    /// Reject files whose extension is not allow-listed
    #[arg(long)]
    pub restrict_extensions: bool,

    /// Directory used to stage uploads while they are measured
    #[arg(long)]
    pub spool_dir: Option<PathBuf>,

    /// Object store backend (overrides UPLOADER_STORE_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<StoreBackend>,

    /// Object store endpoint, e.g. `http://127.0.0.1:9000` (overrides UPLOADER_STORE_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Object store region (overrides UPLOADER_STORE_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Serve HTTPS (overrides UPLOADER_TLS_ENABLED)
    #[arg(long)]
    pub tls: bool,

    /// PEM certificate (overrides UPLOADER_TLS_CERT)
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key (overrides UPLOADER_TLS_KEY)
    #[arg(long)]
    pub tls_key: Option<PathBuf>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_args(Args::parse())
    }

    /// Merge already-parsed args over the process environment.
    pub fn from_args(args: Args) -> Result<Self> {
        Self::from_sources(args, &|name| env::var(name).ok())
    }

    /// Merge `args` over the values `env` returns for the `UPLOADER_*` names.
    ///
    /// Credentials are only read from `env` so they never show up in a
    /// process listing.
    pub fn from_sources(args: Args, env: EnvLookup<'_>) -> Result<Self> {
        let defaults = Self::default();

        let backend = match args.backend {
            Some(backend) => Some(backend),
            None => env_opt(env, ENV_BACKEND)
                .map(|value| {
                    <StoreBackend as ValueEnum>::from_str(&value, true)
                        .map_err(|err| anyhow::anyhow!(err))
                        .with_context(|| format!("parsing {} value `{}`", ENV_BACKEND, value))
                })
                .transpose()?,
        };

        let host = args
            .host
            .or_else(|| env_opt(env, ENV_HOST))
            .unwrap_or(defaults.host);
        let port = match args.port {
            Some(port) => port,
            None => env_parse(env, ENV_PORT, defaults.port)?,
        };

        let tls = TlsSettings {
            enabled: args.tls || env_parse(env, ENV_TLS_ENABLED, false)?,
            cert_path: args
                .tls_cert
                .or_else(|| env_opt(env, ENV_TLS_CERT).map(PathBuf::from)),
            key_path: args
                .tls_key
                .or_else(|| env_opt(env, ENV_TLS_KEY).map(PathBuf::from)),
        };
        tls.validate()?;

        let mut store = StoreSettings {
            backend,
            endpoint: args.endpoint.or_else(|| env_opt(env, ENV_ENDPOINT)),
            access_key: env_opt(env, ENV_ACCESS_KEY),
            secret_key: env_opt(env, ENV_SECRET_KEY),
            region: args
                .region
                .or_else(|| env_opt(env, ENV_REGION))
                .unwrap_or(defaults.store.region),
        };

        // The in-process store has no remote endpoint; presigned links point
        // back at this server.
        if store.backend() == StoreBackend::Memory {
            store
                .endpoint
                .get_or_insert_with(|| local_store_url(&host, port, tls.enabled));
            store.access_key.get_or_insert_with(|| "memory".into());
            store.secret_key.get_or_insert_with(|| "memory".into());
        }

        let max_upload_bytes = match args.max_upload_bytes {
            Some(value) => value,
            None => env_parse(env, ENV_MAX_UPLOAD, defaults.max_upload_bytes)?,
        };
        if max_upload_bytes == 0 {
            bail!("{} must be greater than zero", ENV_MAX_UPLOAD);
        }

        let presign_ttl_secs = match args.presign_ttl_secs {
            Some(value) => value,
            None => env_parse(env, ENV_PRESIGN_TTL, defaults.presign_ttl.as_secs())?,
        };

        Ok(Self {
            host,
            port,
            bucket: args
                .bucket
                .or_else(|| env_opt(env, ENV_BUCKET))
                .unwrap_or(defaults.bucket),
            max_upload_bytes,
            presign_ttl: Duration::from_secs(presign_ttl_secs),
            restrict_extensions: args.restrict_extensions
                || env_parse(env, ENV_RESTRICT_EXT, defaults.restrict_extensions)?,
            spool_dir: args
                .spool_dir
                .or_else(|| env_opt(env, ENV_SPOOL_DIR).map(PathBuf::from))
                .unwrap_or(defaults.spool_dir),
            store,
            tls,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Hard ceiling on request bodies sent to `/upload`.
    pub fn body_limit(&self) -> u64 {
        self.max_upload_bytes
            .saturating_add(MULTIPART_FRAMING_ALLOWANCE)
    }
}

/// Looks up one configuration variable by name.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Where this server serves the in-memory store. Wildcard bind addresses
/// are replaced by loopback.
fn local_store_url(host: &str, port: u16, tls: bool) -> String {
    let scheme = if tls { "https" } else { "http" };
    let host = match host.trim() {
        "" | "0.0.0.0" => "127.0.0.1".to_string(),
        "::" | "[::]" => "[::1]".to_string(),
        h if h.contains(':') && !h.starts_with('[') => format!("[{}]", h),
        h => h.to_string(),
    };
    format!("{}://{}:{}/store", scheme, host, port)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn env_opt(env: EnvLookup<'_>, name: &str) -> Option<String> {
    env(name).filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(env: EnvLookup<'_>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_opt(env, name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(default),
    }
}
