//! Clickstream Ingestion Engine
//!
//! - Event validation and quota checks at the HTTP boundary
//! - In-memory buffering with batched, retried storage writes
//! - Per-visitor funnel matching over every flushed batch
//! - Monthly partition lifecycle for the event table

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use api::{router, AppState, QuotaClient, QuotaConfig};
use buffer::{BufferConfig, EventBuffer, FlushReport};
use engine_core::{
    EventStore, FunnelAnalyticsSink, FunnelDefinitionStore, FunnelProgressRepository,
    PartitionStore,
};
use funnel::{FunnelConfig, FunnelMatcher};
use storage::{ClickHouseClient, ClickHouseConfig, ClickHouseStore, MemoryStore};
use telemetry::{health, init_tracing, metrics, LoggingConfig};
use worker::{PartitionConfig, PartitionMaintenanceWorker, PartitionManager};

/// Where events, partitions and funnel state are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum StorageBackend {
    #[default]
    Clickhouse,
    /// Process memory; nothing survives a restart
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Config {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    storage: StorageBackend,
    #[serde(default)]
    quota: QuotaConfig,
    #[serde(default)]
    buffer: BufferConfig,
    #[serde(default)]
    clickhouse: ClickHouseConfig,
    #[serde(default)]
    partitions: PartitionConfig,
    #[serde(default)]
    funnels: FunnelConfig,
}

/// Storage ports of the selected backend.
struct Backend {
    events: Arc<dyn EventStore>,
    partitions: Arc<dyn PartitionStore>,
    funnels: Arc<dyn FunnelDefinitionStore>,
    progress: Arc<dyn FunnelProgressRepository>,
    analytics: Arc<dyn FunnelAnalyticsSink>,
}

impl Backend {
    fn from_store<S>(store: Arc<S>) -> Self
    where
        S: EventStore
            + PartitionStore
            + FunnelDefinitionStore
            + FunnelProgressRepository
            + FunnelAnalyticsSink
            + 'static,
    {
        Self {
            events: store.clone(),
            partitions: store.clone(),
            funnels: store.clone(),
            progress: store.clone(),
            analytics: store,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = load_config()?;
    init_tracing(&config.logging.clone().with_env_overrides());

    info!("Starting Clickstream Engine v{}", env!("CARGO_PKG_VERSION"));
    info!(storage = ?config.storage, port = config.server.port, "Configuration loaded");
    let backend = connect_storage(&config).await?;

    // Partitions first so the first flush has somewhere to land.
    let partitions = Arc::new(PartitionManager::new(
        backend.partitions.clone(),
        config.partitions.clone(),
    ));
    ensure_partitions(&partitions).await;

    let matcher = Arc::new(FunnelMatcher::new(
        &config.funnels,
        backend.funnels.clone(),
        backend.progress.clone(),
        backend.analytics.clone(),
    ));

    let buffer = Arc::new(
        EventBuffer::new(config.buffer.clone(), backend.events.clone()).with_observer(matcher),
    );
    let _flush_handle = buffer.start_flush_task();

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let maintenance = Arc::new(PartitionMaintenanceWorker::new(partitions));
    let maintenance_handle = maintenance.start(worker_shutdown_rx);

    let quota = QuotaClient::new(&config.quota).context("Failed to create quota client")?;
    if quota.is_mock() {
        warn!("No quota service configured; all websites are allowed");
    }
    let state = AppState::new(buffer.clone(), Arc::new(quota), config.quota.on_unknown);
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    // The buffer drains before the listener closes.
    let drain = {
        let buffer = buffer.clone();
        let timeout = config.buffer.shutdown_timeout();
        async move {
            shutdown_signal().await;
            info!("Shutting down...");
            drain_buffer(&buffer, timeout).await;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(drain)
        .await
        .context("Server error")?;

    worker_shutdown_tx.send_replace(true);
    if let Err(e) = tokio::time::timeout(Duration::from_secs(5), maintenance_handle).await {
        warn!(error = %e, "Partition maintenance worker did not stop in time");
    }

    match serde_json::to_string(&metrics().snapshot()) {
        Ok(snapshot) => info!(metrics = %snapshot, "Final metrics"),
        Err(e) => warn!(error = %e, "Failed to serialize final metrics"),
    }
    info!("Shutdown complete");
    Ok(())
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        .add_source(config::Config::try_from(&Config::default())?)
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("CLICKSTREAM")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let config: Config = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;
    config
        .partitions
        .validate()
        .context("Invalid partition configuration")?;
    Ok(config)
}

async fn connect_storage(config: &Config) -> Result<Backend> {
    match config.storage {
        StorageBackend::Memory => {
            warn!("Using in-memory storage; data is lost on restart");
            health().storage.mark_up();
            Ok(Backend::from_store(Arc::new(MemoryStore::partitioned())))
        }
        StorageBackend::Clickhouse => {
            let client = Arc::new(
                ClickHouseClient::new(config.clickhouse.clone())
                    .context("Failed to create ClickHouse client")?,
            );

            if storage::health::check_connection(&client).await {
                info!("ClickHouse connection: healthy");
            } else {
                error!("ClickHouse connection: unhealthy");
            }

            storage::health::init_schema(&client)
                .await
                .context("Failed to initialize ClickHouse schema")?;

            Ok(Backend::from_store(Arc::new(ClickHouseStore::new(client))))
        }
    }
}

/// Startup partition pass. Failures are logged; ingestion starts anyway and
/// uncovered rows are rejected per row.
async fn ensure_partitions(manager: &PartitionManager) {
    let config = manager.config();

    match manager.ensure_future_partitions(config.future_months).await {
        Ok(report) => {
            info!(
                created = report.created.len(),
                existing = report.existing,
                failed = report.failed.len(),
                gaps = report.gaps().count(),
                "Future partitions ensured"
            );
        }
        Err(e) => error!(error = %e, "Failed to ensure future partitions"),
    }

    match manager
        .ensure_historical_partitions(config.history_months)
        .await
    {
        Ok(report) => {
            info!(
                created = report.created.len(),
                failed = report.failed.len(),
                "Historical partitions ensured"
            );
        }
        Err(e) => error!(error = %e, "Failed to ensure historical partitions"),
    }
}

async fn drain_buffer(buffer: &Arc<EventBuffer>, timeout: Duration) {
    match buffer.shutdown(timeout).await {
        Ok(FlushReport::Dropped { events, error, .. }) => {
            error!(events = events, error = %error, "Final flush dropped events");
        }
        Ok(report) => info!(events = report.events(), "Buffer drained"),
        Err(e) => error!(error = %e, "Buffer drain incomplete"),
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
