//! Long-running daemon: loads configuration, constructs the scheduler, and
//! runs it until a shutdown signal arrives.

use std::env;
use std::sync::Arc;

use sync_scheduler::embeddings::EmbeddingConfig;
use sync_scheduler::{
    FsIndexPipeline, MetadataStore, ProcessGitProvider, SchedulerConfig, Scheduler,
    StaticDiscovery, SyncEngine,
};
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            env::var("RUST_LOG").unwrap_or_else(|_| "info,sync_scheduler=debug".to_string()),
        )
        .init();

    let config = SchedulerConfig::from_env();

    if !config.sync_enabled {
        tracing::info!("SYNC_ENABLED=false, daemon exiting without starting the scheduler");
        return Ok(());
    }

    tracing::info!("starting sync scheduler daemon");
    tracing::info!(
        check_interval = ?config.check_interval,
        default_sync_interval = ?config.default_sync_interval,
        max_retries = config.max_retries,
        retry_base_delay = ?config.retry_base_delay,
        auto_register = config.auto_register,
        history_capacity = config.history_capacity,
        max_concurrent = config.max_concurrent,
        "scheduler configuration loaded"
    );

    let store = Arc::new(MetadataStore::open(&config.metadata_dir).await?);
    let git = Arc::new(ProcessGitProvider::new());
    let pipeline = Arc::new(FsIndexPipeline::new(EmbeddingConfig::default())?);

    let retry_base_delay = chrono::Duration::from_std(config.retry_base_delay)?;
    let default_sync_interval = chrono::Duration::from_std(config.default_sync_interval)?;

    let engine = Arc::new(SyncEngine::new(
        store.clone(),
        git,
        pipeline,
        config.repos_dir.clone(),
        config.max_retries,
        retry_base_delay,
        config.history_capacity,
    ));

    let scheduler = Arc::new(Scheduler::new(
        store,
        engine,
        config.check_interval,
        config.max_retries,
        retry_base_delay,
        default_sync_interval,
        config.max_concurrent,
    ));

    let discovery_path = env::var("SYNC_DISCOVERY_SEED_FILE")
        .unwrap_or_else(|_| "./data/discovery_seed.toml".to_string());
    let discovery = Arc::new(StaticDiscovery::new(discovery_path));

    scheduler.start(config.auto_register, Some(discovery)).await;
    tracing::info!("sync scheduler running, press Ctrl+C to shut down");

    signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, stopping scheduler");
    scheduler.stop().await;
    tracing::info!("sync scheduler stopped");

    Ok(())
}
