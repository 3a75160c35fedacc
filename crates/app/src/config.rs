use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use spaceshare_api::UploadQuota;
use spaceshare_auth::MIN_SECRET_LEN;
use spaceshare_core::protocol::DeliveryStrategy;
use spaceshare_realtime::broker::BrokerConfig;
use spaceshare_realtime::DEFAULT_POLL_INTERVAL;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_FILE_STORAGE_PATH: &str = "./data/files";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub storage: StorageConfig,
    pub session_secret: SessionSecret,
    pub file_storage: FileStorageConfig,
    pub realtime: RealtimeConfig,
    pub upload_quota: UploadQuota,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Memory,
    Postgres { database_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStorageConfig {
    Memory,
    Local {
        path: PathBuf,
    },
    S3 {
        endpoint: String,
        access_key: String,
        secret_key: String,
        bucket: String,
        region: String,
        use_ssl: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealtimeConfig {
    pub strategy: DeliveryStrategy,
    pub poll_interval: Duration,
    pub broker: BrokerConfig,
}

/// HS256 secret for bearer tokens. Never printed.
#[derive(Clone)]
pub struct SessionSecret(String);

impl SessionSecret {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionSecret(..)")
    }
}

/// Raw environment values, kept separate from parsing so tests can feed them.
#[derive(Debug, Clone, Default)]
pub(crate) struct ConfigEnv {
    pub listen_addr: Option<String>,
    pub storage_backend: Option<String>,
    pub database_url: Option<String>,
    pub session_secret: Option<String>,
    pub realtime_strategy: Option<String>,
    pub poll_interval_secs: Option<String>,
    pub max_connections_per_user: Option<String>,
    pub upload_rate_limit: Option<String>,
    pub upload_rate_window_secs: Option<String>,
    pub file_storage: FileStorageEnv,
}

impl ConfigEnv {
    fn from_env() -> Self {
        Self {
            listen_addr: std::env::var("LISTEN_ADDR").ok(),
            storage_backend: std::env::var("STORAGE_BACKEND").ok(),
            database_url: std::env::var("DATABASE_URL").ok(),
            session_secret: std::env::var("SESSION_SECRET").ok(),
            realtime_strategy: std::env::var("REALTIME_STRATEGY").ok(),
            poll_interval_secs: std::env::var("POLL_INTERVAL_SECS").ok(),
            max_connections_per_user: std::env::var("MAX_CONNECTIONS_PER_USER").ok(),
            upload_rate_limit: std::env::var("UPLOAD_RATE_LIMIT").ok(),
            upload_rate_window_secs: std::env::var("UPLOAD_RATE_WINDOW_SECS").ok(),
            file_storage: FileStorageEnv::from_env(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FileStorageEnv {
    pub backend: Option<String>,
    pub path: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_use_ssl: Option<String>,
}

impl FileStorageEnv {
    fn from_env() -> Self {
        Self {
            backend: std::env::var("FILE_STORAGE_BACKEND").ok(),
            path: std::env::var("FILE_STORAGE_PATH").ok(),
            s3_endpoint: std::env::var("FILE_S3_ENDPOINT").ok(),
            s3_access_key: std::env::var("FILE_S3_ACCESS_KEY").ok(),
            s3_secret_key: std::env::var("FILE_S3_SECRET_KEY").ok(),
            s3_bucket: std::env::var("FILE_S3_BUCKET").ok(),
            s3_region: std::env::var("FILE_S3_REGION").ok(),
            s3_use_ssl: std::env::var("FILE_S3_USE_SSL").ok(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_values(ConfigEnv::from_env())
    }

    pub(crate) fn from_values(env: ConfigEnv) -> anyhow::Result<Self> {
        let listen_addr = non_empty(env.listen_addr);
        let listen_addr = SocketAddr::from_str(listen_addr.as_deref().unwrap_or(DEFAULT_LISTEN_ADDR))
            .map_err(|error| anyhow::anyhow!("invalid LISTEN_ADDR: {error}"))?;

        Ok(Self {
            listen_addr,
            storage: parse_storage(env.storage_backend, env.database_url)?,
            session_secret: parse_session_secret(env.session_secret)?,
            file_storage: parse_file_storage(env.file_storage)?,
            realtime: parse_realtime(
                env.realtime_strategy,
                env.poll_interval_secs,
                env.max_connections_per_user,
            )?,
            upload_quota: parse_upload_quota(env.upload_rate_limit, env.upload_rate_window_secs)?,
        })
    }
}

fn parse_storage(
    backend: Option<String>,
    database_url: Option<String>,
) -> anyhow::Result<StorageConfig> {
    let backend = non_empty(backend).unwrap_or_else(|| "postgres".to_owned());
    match backend.as_str() {
        "memory" => Ok(StorageConfig::Memory),
        "postgres" => {
            let database_url = non_empty(database_url)
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?;
            Ok(StorageConfig::Postgres { database_url })
        }
        _ => Err(anyhow::anyhow!(
            "invalid STORAGE_BACKEND {backend:?}: expected \"postgres\" or \"memory\""
        )),
    }
}

fn parse_session_secret(value: Option<String>) -> anyhow::Result<SessionSecret> {
    let secret = non_empty(value).ok_or_else(|| anyhow::anyhow!("SESSION_SECRET must be set"))?;
    if secret.len() < MIN_SECRET_LEN {
        return Err(anyhow::anyhow!(
            "SESSION_SECRET must be at least {MIN_SECRET_LEN} bytes"
        ));
    }
    Ok(SessionSecret(secret))
}

fn parse_realtime(
    strategy: Option<String>,
    poll_interval_secs: Option<String>,
    max_connections_per_user: Option<String>,
) -> anyhow::Result<RealtimeConfig> {
    let strategy = match non_empty(strategy).as_deref() {
        None | Some("push") => DeliveryStrategy::Push,
        Some("poll") => DeliveryStrategy::Poll,
        Some(other) => {
            return Err(anyhow::anyhow!(
                "invalid REALTIME_STRATEGY {other:?}: expected \"push\" or \"poll\""
            ))
        }
    };
    let poll_interval = match parse_positive(poll_interval_secs, "POLL_INTERVAL_SECS")? {
        Some(secs) => Duration::from_secs(secs),
        None => DEFAULT_POLL_INTERVAL,
    };
    let mut broker = BrokerConfig::default();
    if let Some(limit) = parse_positive(max_connections_per_user, "MAX_CONNECTIONS_PER_USER")? {
        broker.max_connections_per_user = usize::try_from(limit)?;
    }

    Ok(RealtimeConfig {
        strategy,
        poll_interval,
        broker,
    })
}

fn parse_upload_quota(
    limit: Option<String>,
    window_secs: Option<String>,
) -> anyhow::Result<UploadQuota> {
    let mut quota = UploadQuota::default();
    if let Some(limit) = parse_positive(limit, "UPLOAD_RATE_LIMIT")? {
        quota.max_uploads = u32::try_from(limit)
            .map_err(|_| anyhow::anyhow!("UPLOAD_RATE_LIMIT is too large"))?;
    }
    if let Some(secs) = parse_positive(window_secs, "UPLOAD_RATE_WINDOW_SECS")? {
        quota.window = Duration::from_secs(secs);
    }
    Ok(quota)
}

pub(crate) fn parse_file_storage(env: FileStorageEnv) -> anyhow::Result<FileStorageConfig> {
    let backend = non_empty(env.backend).unwrap_or_else(|| "local".to_owned());
    match backend.as_str() {
        "memory" => Ok(FileStorageConfig::Memory),
        "local" | "fs" => Ok(FileStorageConfig::Local {
            path: PathBuf::from(
                non_empty(env.path).unwrap_or_else(|| DEFAULT_FILE_STORAGE_PATH.to_owned()),
            ),
        }),
        "s3" => {
            let endpoint = required_s3_var(env.s3_endpoint, "FILE_S3_ENDPOINT")?;
            let access_key = required_s3_var(env.s3_access_key, "FILE_S3_ACCESS_KEY")?;
            let secret_key = required_s3_var(env.s3_secret_key, "FILE_S3_SECRET_KEY")?;
            let bucket = required_s3_var(env.s3_bucket, "FILE_S3_BUCKET")?;
            let region = non_empty(env.s3_region).unwrap_or_else(|| "us-east-1".to_owned());
            let use_ssl = env.s3_use_ssl.as_deref().map(str::trim) != Some("false");

            Ok(FileStorageConfig::S3 {
                endpoint,
                access_key,
                secret_key,
                bucket,
                region,
                use_ssl,
            })
        }
        _ => Err(anyhow::anyhow!(
            "invalid FILE_STORAGE_BACKEND {backend:?}: expected \"memory\", \"local\", or \"s3\""
        )),
    }
}

fn required_s3_var(value: Option<String>, name: &str) -> anyhow::Result<String> {
    non_empty(value)
        .ok_or_else(|| anyhow::anyhow!("{name} is required when FILE_STORAGE_BACKEND=s3"))
}

fn parse_positive(value: Option<String>, name: &str) -> anyhow::Result<Option<u64>> {
    let Some(raw) = non_empty(value) else {
        return Ok(None);
    };
    match raw.parse::<u64>() {
        Ok(parsed) if parsed > 0 => Ok(Some(parsed)),
        _ => Err(anyhow::anyhow!("{name} must be a positive integer, got {raw:?}")),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}
