use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use notification_hub::archive::Archive;
use notification_hub::config::{AppConfig, CliConfig, FileConfig};
use notification_hub::groups::GroupManager;
use notification_hub::kv_store::{InMemoryKeyValueStore, KeyValueStore, SqliteKeyValueStore};
use notification_hub::manager::NotificationManager;
use notification_hub::notifications::{now_millis, PreferencesStore};
use notification_hub::optimizer::{DeliveryLoadSource, Optimizer};
use notification_hub::priority::{PriorityManager, PriorityProcessor};
use notification_hub::pubsub::PubSub;
use notification_hub::scheduler::{DeliverySink, Scheduler};
use notification_hub::security::{AccessPolicy, NotificationCipher};
use notification_hub::server::{metrics, run_server, RequestsLoggingLevel, ServerConfig, ServerState};
use notification_hub::store::NotificationStore;
use notification_hub::sync::{SyncEngine, SyncHub};
use notification_hub::templates::TemplateRegistry;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path_buf))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the SQLite database file. Without it everything is kept in memory.
    #[clap(long, value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Path to a TOML config file. Its values override the command line.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3100)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Interval in seconds between sweeps of expired notifications.
    #[clap(long, default_value_t = 60)]
    pub expiry_sweep_interval_secs: u64,

    /// Identifier of this node in the sync log.
    #[clap(long)]
    pub device_id: Option<String>,

    /// Passphrase for encrypting notifications at rest.
    #[clap(long)]
    pub encryption_passphrase: Option<String>,
}

/// Run `task` every `period` until `shutdown_token` is cancelled. The first
/// run happens one period after start.
fn spawn_periodic<F>(period: Duration, shutdown_token: CancellationToken, task: F)
where
    F: Fn() + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => task(),
                _ = shutdown_token.cancelled() => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let cli_config = CliConfig {
        db_path: cli_args.db_path.clone(),
        port: cli_args.port,
        logging_level: cli_args.logging_level.clone(),
        expiry_sweep_interval_secs: cli_args.expiry_sweep_interval_secs,
        device_id: cli_args.device_id.clone(),
        encryption_passphrase: cli_args.encryption_passphrase.clone(),
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    let kv: Arc<dyn KeyValueStore> = match &config.db_path {
        Some(path) => {
            info!("Opening SQLite database at {:?}...", path);
            Arc::new(SqliteKeyValueStore::new(path)?)
        }
        None => {
            info!("No database configured, notifications are kept in memory");
            Arc::new(InMemoryKeyValueStore::new())
        }
    };

    let shutdown_token = CancellationToken::new();

    let store = Arc::new(NotificationStore::new(&config.store, Some(kv.clone())));
    let loaded = store.load().context("Failed to load notifications")?;
    info!("Loaded {} notifications", loaded);

    let archive = Arc::new(Archive::new(config.archive.clone(), Some(kv.clone())));
    let archived = archive.load().context("Failed to load archive")?;
    info!("Loaded {} archived notifications", archived);

    let pubsub = PubSub::new(config.pubsub.clone(), shutdown_token.child_token());
    let priority = PriorityManager::new(
        config.priority.clone(),
        pubsub.clone() as Arc<dyn PriorityProcessor>,
        shutdown_token.child_token(),
    );
    let optimizer = Arc::new(Optimizer::new(
        config.optimizer.clone(),
        Arc::new(DeliveryLoadSource::new(pubsub.clone(), Some(priority.clone()))),
        shutdown_token.child_token(),
    ));
    pubsub.attach_optimizer(&optimizer);

    // Peers would share the hub; a lone server syncs against its own log.
    let hub = SyncHub::new();
    let sync = Arc::new(SyncEngine::new(
        config.sync.clone(),
        store.clone(),
        kv.clone(),
        Arc::new(hub.transport()),
        shutdown_token.child_token(),
    )?);

    let mut manager = NotificationManager::new(
        store,
        Arc::new(GroupManager::new()),
        pubsub.clone(),
        Arc::new(TemplateRegistry::with_defaults()),
        PreferencesStore::new(kv.clone()),
    )
    .with_priority_manager(priority.clone())
    .with_optimizer(optimizer.clone())
    .with_sync(sync.clone())
    .with_archive(archive);

    match NotificationCipher::from_settings(&config.security) {
        Ok(Some(cipher)) => {
            info!("Encryption at rest enabled");
            manager = manager.with_cipher(Arc::new(cipher));
        }
        Ok(None) => {}
        Err(err) => return Err(err).context("Failed to set up encryption"),
    }
    let manager = Arc::new(manager);

    let scheduler = Arc::new(Scheduler::new(
        manager.clone() as Arc<dyn DeliverySink>,
        shutdown_token.child_token(),
    ));

    pubsub.start();
    priority.start();
    {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await });
    }
    {
        let optimizer = optimizer.clone();
        tokio::spawn(async move { optimizer.run().await });
    }
    {
        let sync = sync.clone();
        tokio::spawn(async move { sync.run().await });
    }

    if config.expiry_sweep_interval_secs > 0 {
        let manager = manager.clone();
        spawn_periodic(
            Duration::from_secs(config.expiry_sweep_interval_secs),
            shutdown_token.clone(),
            move || {
                if let Err(err) = manager.sweep_expired(now_millis()) {
                    error!("Expiry sweep failed: {}", err);
                }
            },
        );
    }
    if config.archive.sweep_interval_secs > 0 {
        let manager = manager.clone();
        spawn_periodic(
            Duration::from_secs(config.archive.sweep_interval_secs),
            shutdown_token.clone(),
            move || match manager.sweep_archive(now_millis()) {
                Ok(report) if report.archived + report.expired + report.evicted > 0 => {
                    info!(
                        "Archive sweep: {} archived, {} expired, {} evicted",
                        report.archived, report.expired, report.evicted
                    );
                }
                Ok(_) => {}
                Err(err) => error!("Archive sweep failed: {}", err),
            },
        );
    }

    {
        let shutdown_token = shutdown_token.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", err);
                return;
            }
            info!("Shutting down...");
            shutdown_token.cancel();
        });
    }

    let state = ServerState::new(
        ServerConfig {
            port: config.port,
            requests_logging_level: config.logging_level.clone(),
            access: AccessPolicy::from_settings(&config.security),
            ..Default::default()
        },
        manager,
        Some(scheduler),
    );

    info!("Ready to serve at port {}!", config.port);
    run_server(state, shutdown_token).await
}
