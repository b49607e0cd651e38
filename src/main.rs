use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vkcommunity::adapters::{MemoryStore, PhotoStore, PostgresStore};
use vkcommunity::cli::{self, Cli, Commands};
use vkcommunity::config::{AppConfig, LoggingConfig};
use vkcommunity::error::{CommunityError, Result};
use vkcommunity::services::CommunityApp;
use vkcommunity::vk::{ImageFetcher, VkApi, VkClient};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;

    match &cli.command {
        Commands::Photos { .. } => init_logging_simple(),
        _ => init_logging(&config.logging),
    }

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("Invalid configuration: {}", e);
        }
        return Err(CommunityError::Validation(errors.join("; ")));
    }

    if let Commands::Migrate = cli.command {
        let store = PostgresStore::new(&config.database.url, config.database.max_connections).await?;
        store.migrate().await?;
        return Ok(());
    }

    let store: Arc<dyn PhotoStore> = if cli.memory {
        warn!("Using in-memory store, records are dropped on exit");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(PostgresStore::new(&config.database.url, config.database.max_connections).await?)
    };

    let client = Arc::new(VkClient::new(&config.vk)?);
    let api: Arc<dyn VkApi> = client.clone();
    let fetcher: Arc<dyn ImageFetcher> = client;
    let app = CommunityApp::new(config, api, fetcher, store).await?;

    match cli.command {
        Commands::Migrate => {}
        Commands::Sync { source, mark } => {
            let source = match source {
                Some(source) => source,
                None => app.default_source()?,
            };
            let report = if mark {
                app.synchronize_and_mark(source).await?
            } else {
                app.synchronize(source).await?
            };
            cli::show_sync_report(&report);
        }
        Commands::Mark => {
            let marked = app.mark_images().await?;
            println!("Marked {} images", marked);
        }
        Commands::Post { filters } => {
            let filters = match filters {
                Some(raw) => cli::parse_filters(Some(&raw))?,
                None => app.config().posting.filters.clone(),
            };
            let posted = app.post_random_photos(&filters).await?;
            cli::show_posted(&posted);
        }
        Commands::SyncWall => {
            let plan = app.synchronize_wall_posts().await?;
            cli::show_wall_plan(&plan);
        }
        Commands::Repost { owner_id, post_id, reload, text } => {
            let new_id = app
                .duplicate_post(owner_id, post_id, reload, text.as_deref())
                .await?;
            println!("Posted wall{}_{}", -app.community().id, new_id);
        }
        Commands::Photos { filters } => {
            let filters = cli::parse_filters(filters.as_deref())?;
            let photos = app.list_photos(&filters).await?;
            cli::show_photos(&photos);
        }
        Commands::Run => run_bot(&app).await?,
    }

    Ok(())
}

async fn run_bot(app: &CommunityApp) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    info!(
        "Bot is running for community {}. Press Ctrl+C to stop.",
        app.community().screen_name
    );
    app.run(shutdown_rx).await?;

    info!("Shutdown complete");
    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("info,vkcommunity={},sqlx=warn", config.level))
    });

    if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

fn init_logging_simple() {
    // Minimal logging for listing commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
