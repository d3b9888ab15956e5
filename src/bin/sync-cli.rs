//! Administrative CLI over the [`sync_scheduler::registry::Registry`] API.

use std::env;
use std::sync::Arc;

use clap::Parser;
use sync_scheduler::cli::{Cli, Commands};
use sync_scheduler::embeddings::EmbeddingConfig;
use sync_scheduler::{
    FsIndexPipeline, MetadataStore, ProcessGitProvider, Registry, SchedulerConfig, Scheduler,
    SyncEngine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()))
        .init();

    let cli = Cli::parse();
    let mut config = SchedulerConfig::from_env();
    if let Some(dir) = cli.metadata_dir {
        config.metadata_dir = dir;
    }

    let store = Arc::new(MetadataStore::open(&config.metadata_dir).await?);
    let git = Arc::new(ProcessGitProvider::new());
    let pipeline = Arc::new(FsIndexPipeline::new(EmbeddingConfig::default())?);

    let retry_base_delay = chrono::Duration::from_std(config.retry_base_delay)?;
    let default_sync_interval = chrono::Duration::from_std(config.default_sync_interval)?;

    let engine = Arc::new(SyncEngine::new(
        store.clone(),
        git.clone(),
        pipeline,
        config.repos_dir.clone(),
        config.max_retries,
        retry_base_delay,
        config.history_capacity,
    ));

    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        engine,
        config.check_interval,
        config.max_retries,
        retry_base_delay,
        default_sync_interval,
        config.max_concurrent,
    ));

    let registry = Registry::new(
        store,
        git,
        scheduler.clone(),
        config.default_sync_interval.as_secs() as i64 / 60,
    );

    match cli.command {
        Commands::Add {
            repo_url,
            owner,
            repo,
            repo_type,
            sync_interval,
            access_token,
            disabled,
        } => {
            let record = registry
                .add(
                    repo_url,
                    owner,
                    repo,
                    repo_type.into(),
                    sync_interval,
                    access_token,
                    !disabled,
                )
                .await?;
            // `add` returns the full ProjectRecord per the registry contract;
            // redact before it reaches stdout/terminal history.
            let outward = sync_scheduler::OutwardRecord::from(record);
            println!("{}", serde_json::to_string_pretty(&outward)?);
        }

        Commands::Remove(args) => {
            let removed = registry.remove(&args.key()).await?;
            if removed {
                println!("removed {}", args.key());
            } else {
                println!("not found: {}", args.key());
            }
        }

        Commands::Get(args) => match registry.get(&args.key()).await {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => println!("not found: {}", args.key()),
        },

        Commands::List => {
            let records = registry.list().await;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }

        Commands::Update {
            key,
            sync_interval,
            enabled,
        } => match registry.update(&key.key(), sync_interval, enabled).await? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => println!("not found: {}", key.key()),
        },

        Commands::ResetRetries(args) => match registry.reset_retries(&args.key()).await? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => println!("not found: {}", args.key()),
        },

        Commands::CheckUpdates(args) => {
            match registry.check_updates(&args.key(), &config.repos_dir).await? {
                Some(check) => println!("{}", serde_json::to_string_pretty(&check)?),
                None => println!("not found: {}", args.key()),
            }
        }

        Commands::History { key, limit } => match registry.history(&key.key(), limit).await {
            Some(history) => println!("{}", serde_json::to_string_pretty(&history)?),
            None => println!("not found: {}", key.key()),
        },

        Commands::Trigger(args) => {
            // The registry's trigger() enqueues onto the scheduler's manual
            // channel, so the supervisor loop must be running to drain it.
            // For this one-shot CLI invocation, start it just long enough to
            // service this single request.
            scheduler.start(false, None).await;
            let result = registry.trigger(args.key()).await;
            scheduler.stop().await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::Stats => {
            let stats = registry.stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
