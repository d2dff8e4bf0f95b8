use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use vault_alerts::config::Config;
use vault_alerts::email::{LogMailer, Mailer, MailgunMailer};
use vault_alerts::follower::{Follower, PathFollower};
use vault_alerts::store::{MemoryStore, Store, ValkeyStore};
use vault_alerts::vstorage::{
    fetch_network_config, BoardDecoder, BrandCache, ChainStorageWatcher, QueryError, StorageQuery,
    VstorageClient,
};

const CONFIG_PATH: &str = "vault-alerts.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Load config
    let config_file = Path::new(CONFIG_PATH);
    let config = if config_file.exists() {
        Config::load(config_file)?
    } else {
        Config::from_env()?
    };

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    info!("vault-alerts v{} starting", env!("CARGO_PKG_VERSION"));
    if !config_file.exists() {
        info!("no {CONFIG_PATH} found, using env-only config");
    }

    // --- Store ---
    let store: Arc<dyn Store> = if config.valkey.enabled {
        match ValkeyStore::connect(&config.valkey.url, &config.valkey.prefix).await {
            Ok(s) => {
                if let Err(e) = s.ping().await {
                    error!(error = %e, "Valkey ping failed, falling back to in-memory store");
                    Arc::new(MemoryStore::new())
                } else {
                    Arc::new(s)
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    url = %config.valkey.url,
                    "failed to connect to Valkey, running without persistent state"
                );
                Arc::new(MemoryStore::new())
            }
        }
    } else {
        info!("Valkey disabled, using in-memory store");
        Arc::new(MemoryStore::new())
    };

    // --- RPC endpoint ---
    let rpc_url = match &config.rpc.url {
        Some(url) => url.clone(),
        None => {
            let http = reqwest::Client::builder()
                .timeout(config.request_timeout())
                .build()?;
            let network = fetch_network_config(&http, &config.rpc.network_config_url).await?;
            network.rpc_url().map(str::to_string).ok_or_else(|| {
                anyhow::anyhow!(
                    "network config {} lists no rpc address",
                    config.rpc.network_config_url
                )
            })?
        }
    };
    info!(rpc = %rpc_url, "using vstorage RPC endpoint");

    let client: Arc<dyn StorageQuery> = Arc::new(VstorageClient::new(
        rpc_url,
        config.request_timeout(),
        Arc::new(BoardDecoder),
    )?);

    // --- Watcher ---
    let watcher = ChainStorageWatcher::start(
        client.clone(),
        config.watcher_config(),
        Some(Box::new(|e: &QueryError| {
            warn!(error = %e, "vstorage poll failed");
        })),
    );
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let paths = PathFollower::new(watcher.clone(), event_tx);

    // --- Brands ---
    let brands = BrandCache::new(store.clone(), client.clone());
    if let Err(e) = brands.load_from_store().await {
        warn!(error = %e, "failed to load brands from store");
    }

    // --- Email ---
    let mailer: Arc<dyn Mailer> = if config.email.enabled {
        match MailgunMailer::new(&config.email.api_key, &config.email.domain, &config.email.from) {
            Ok(m) => {
                info!(domain = %config.email.domain, "Mailgun delivery enabled");
                Arc::new(m)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "email enabled but not configured (set EMAIL_API_KEY and email.domain), logging alerts instead"
                );
                Arc::new(LogMailer)
            }
        }
    } else {
        info!("email disabled, alerts are logged only");
        Arc::new(LogMailer)
    };

    // --- Follower ---
    let follower = Follower::new(store, mailer, brands, paths);
    follower.follow_stored().await?;

    tokio::select! {
        _ = follower.run(event_rx) => {
            warn!("follower stopped");
        }
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
        }
    }

    watcher.shutdown();
    info!("vault-alerts stopped");
    Ok(())
}
