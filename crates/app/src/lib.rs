#![forbid(unsafe_code)]

use std::sync::Arc;

use object_store::aws::AmazonS3Builder;
use spaceshare_api::{ApiState, BlobStore, ObjectStoreBlobStore, UploadRateLimiter};
use spaceshare_auth::SessionTokenValidator;
use spaceshare_core::protocol::DeliveryStrategy;
use spaceshare_realtime::{FanoutHub, PollingHub, PushHub};
use spaceshare_storage::{migrate_with_pool, MemoryStorage, PostgresStorage, Storage};
use tokio::sync::watch;
use tracing::{info, warn};

mod config;
pub mod housekeeping;

pub use config::{
    AppConfig, FileStorageConfig, RealtimeConfig, SessionSecret, StorageConfig,
};

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let state = build_state(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let housekeeping = tokio::spawn(housekeeping::run(
        state.upload_limiter(),
        housekeeping::HOUSEKEEPING_INTERVAL,
        shutdown_rx,
    ));

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(
        addr = %config.listen_addr,
        strategy = ?config.realtime.strategy,
        "server listening"
    );
    let served = axum::serve(listener, spaceshare_api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    let _ = shutdown_tx.send(true);
    let _ = housekeeping.await;
    served?;
    Ok(())
}

/// Wires storage, token validation, fanout, blobs, and the upload limiter.
pub async fn build_state(config: &AppConfig) -> anyhow::Result<ApiState> {
    let storage = build_storage(&config.storage).await?;
    let validator = Arc::new(SessionTokenValidator::new(config.session_secret.as_bytes()));
    let hub = build_hub(&config.realtime);
    let blobs = build_blob_store(&config.file_storage)?;
    let limiter = Arc::new(UploadRateLimiter::new(config.upload_quota));

    Ok(ApiState::new(storage, validator, hub, blobs).with_upload_limiter(limiter))
}

async fn build_storage(config: &StorageConfig) -> anyhow::Result<Arc<dyn Storage>> {
    match config {
        StorageConfig::Memory => {
            warn!("using in-memory storage; data will not survive a restart");
            Ok(Arc::new(MemoryStorage::new()))
        }
        StorageConfig::Postgres { database_url } => {
            let storage = PostgresStorage::connect(database_url).await?;
            migrate_with_pool(storage.pool()).await?;
            Ok(Arc::new(storage))
        }
    }
}

fn build_hub(config: &RealtimeConfig) -> Arc<dyn FanoutHub> {
    match config.strategy {
        DeliveryStrategy::Push => Arc::new(PushHub::new(config.broker, config.poll_interval)),
        DeliveryStrategy::Poll => Arc::new(PollingHub::new(config.poll_interval)),
    }
}

fn build_blob_store(config: &FileStorageConfig) -> anyhow::Result<Arc<dyn BlobStore>> {
    match config {
        FileStorageConfig::Memory => Ok(Arc::new(ObjectStoreBlobStore::in_memory())),
        FileStorageConfig::Local { path } => {
            std::fs::create_dir_all(path)?;
            Ok(Arc::new(ObjectStoreBlobStore::local_filesystem(path)?))
        }
        FileStorageConfig::S3 {
            endpoint,
            access_key,
            secret_key,
            bucket,
            region,
            use_ssl,
        } => {
            let endpoint = normalize_s3_endpoint(endpoint, *use_ssl);
            let mut builder = AmazonS3Builder::new()
                .with_endpoint(endpoint.clone())
                .with_access_key_id(access_key)
                .with_secret_access_key(secret_key)
                .with_bucket_name(bucket)
                .with_region(region)
                .with_virtual_hosted_style_request(false);
            if endpoint.starts_with("http://") {
                builder = builder.with_allow_http(true);
            }
            let store = builder.build().map_err(|error| {
                anyhow::anyhow!("failed to initialize S3 object store: {error}")
            })?;
            Ok(Arc::new(ObjectStoreBlobStore::new(Arc::new(store))))
        }
    }
}

fn normalize_s3_endpoint(endpoint: &str, use_ssl: bool) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_owned()
    } else if use_ssl {
        format!("https://{endpoint}")
    } else {
        format!("http://{endpoint}")
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "failed to install shutdown handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
