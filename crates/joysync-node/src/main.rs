//! joysync daemon entry point.
//!
//! Responsibilities:
//! - Load and validate configuration (flag, env, `./config.yml`)
//! - Wire the state store, quota tracker and external clients
//! - Run the orchestrator until a shutdown signal arrives

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use joysync_chain::{ChainConfig, SubxtVideoCreator};
use joysync_fleet::{FleetClient, ResponseTimeBook};
use joysync_indexer::GraphQlClient;
use joysync_node::{
    AssetDirectory, Config, DownloadWorker, MetadataPoller, OnChainCreator, Orchestrator,
    QuotaTracker, Uploader,
};
use joysync_store::{CreatorRegistry, StateStore};
use joysync_youtube::{DataApiClient, DataApiConfig, HttpMediaDownloader};
use sp_core::{sr25519, Pair};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "joysync-node")]
#[command(about = "Channel mirroring daemon", long_about = None)]
struct Cli {
    /// Configuration file path (falls back to CONFIG_PATH, then ./config.yml)
    #[arg(long = "configPath")]
    config_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if cli.json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_target(true)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_target(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let config_path = Config::resolve_path(cli.config_path);
    info!(config = %config_path.display(), "Starting joysync node");
    let config = Config::load(&config_path).context("loading configuration")?;
    if let Some(ref env) = config.env {
        info!(env = %env, "Deployment environment");
    }

    // Durable state and local staging.
    let store = Arc::new(StateStore::open(&config.directories.data).await?);
    let assets = Arc::new(
        AssetDirectory::open(&config.directories.assets, config.storage_budget_bytes()?).await?,
    );

    // Quota accountant, anchored to today's UTC date.
    let quota = Arc::new(QuotaTracker::new(
        config.limits.daily_api_quota.sync,
        config.limits.daily_api_quota.signup,
        Utc::now(),
    ));

    // External edges.
    let youtube = Arc::new(DataApiClient::new(DataApiConfig {
        api_base_url: config.youtube.api_base_url.clone(),
        token_url: config.youtube.token_url.clone(),
        client_id: config.youtube.client_id.clone(),
        client_secret: config.youtube.client_secret.clone(),
        request_timeout: Duration::from_secs(config.youtube.request_timeout_s),
    })?);

    let media_downloader = Arc::new(HttpMediaDownloader::new(
        config.endpoints.media_resolver.clone(),
        Duration::from_secs(600),
    )?);

    let collaborator = &config.joystream.channel_collaborator;
    let keypair = sr25519::Pair::from_string(&collaborator.account_suri, None)
        .map_err(|e| anyhow::anyhow!("invalid collaborator SURI: {:?}", e))?;
    let chain = Arc::new(SubxtVideoCreator::new(
        ChainConfig {
            rpc_url: config.endpoints.joystream_node_ws.clone(),
            ..ChainConfig::default()
        },
        vec![(collaborator.member_id.clone(), keypair)],
    ));

    let indexer = Arc::new(GraphQlClient::new(config.endpoints.query_node.clone())?);
    let fleet = Arc::new(FleetClient::new(Duration::from_secs(600))?);
    let response_times = Arc::new(ResponseTimeBook::new());

    // Pipeline stages.
    let registry = Arc::new(CreatorRegistry::new(store.clone()));
    let poller = Arc::new(MetadataPoller::new(
        store.clone(),
        registry,
        youtube,
        quota.clone(),
        config.limits.poll_fanout,
    ));
    let downloader = Arc::new(DownloadWorker::new(
        store.clone(),
        media_downloader,
        assets.clone(),
        config.limits.max_concurrent_downloads,
        config.limits.max_download_attempts,
    ));
    let creator = Arc::new(OnChainCreator::new(
        store.clone(),
        assets.clone(),
        chain,
        indexer.clone(),
        collaborator.member_id.clone(),
    ));
    let uploader = Arc::new(Uploader::new(
        store,
        assets,
        indexer,
        fleet,
        response_times,
        config.limits.pending_upload_batch_size,
        config.limits.max_concurrent_uploads,
    ));

    let metrics_port = config.http_api.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = joysync_node::metrics::start_metrics_server(metrics_port).await {
            warn!(error = %e, "Metrics server failed");
        }
    });

    // Shutdown on ctrl-c: stop admissions, let the orchestrator drain.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut orchestrator = Orchestrator::new(
        poller,
        downloader,
        creator,
        uploader,
        quota,
        config.polling_period(),
        config.probe_period(),
        Duration::from_secs(config.limits.shutdown_grace_s),
        shutdown_rx,
    );

    orchestrator.run().await?;
    info!("joysync node exited cleanly");
    Ok(())
}
