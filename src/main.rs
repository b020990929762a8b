use std::sync::Arc;
use tokio::net::TcpListener;

use alertnet_server::backplane::{ClusterBackplane, MemoryBackplane, RedisBackplane};
use alertnet_server::config::{generate_config_template, Config};
use alertnet_server::push::LogPushNotifier;
use alertnet_server::store::{EphemeralStateStore, MemoryStore, RedisStore};
use alertnet_server::{auth, routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "alertnet_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "alertnet_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("alertnet server v{} starting", env!("CARGO_PKG_VERSION"));

    std::fs::create_dir_all(&config.data_dir)?;
    let jwt_secret = auth::load_or_generate_jwt_secret(&config.data_dir)?;

    // Shared state + backplane: Redis when configured (required for running
    // multiple processes behind a load balancer), otherwise in-process.
    let (store, bp): (Arc<dyn EphemeralStateStore>, Arc<dyn ClusterBackplane>) =
        match &config.redis_url {
            Some(url) => {
                tracing::info!(url = %url, "Using Redis store and backplane");
                let store = RedisStore::connect(url).await?;
                let bp = RedisBackplane::connect(url).await?;
                (Arc::new(store), Arc::new(bp))
            }
            None => {
                tracing::info!("No Redis URL configured, running single-node in-memory");
                let mem = Arc::new(MemoryStore::new());

                // Expired entries are invisible to readers immediately; this
                // just reclaims their memory.
                let purge_store = mem.clone();
                tokio::spawn(async move {
                    let mut ticker =
                        tokio::time::interval(std::time::Duration::from_secs(60));
                    loop {
                        ticker.tick().await;
                        let purged = purge_store.purge_expired();
                        if purged > 0 {
                            tracing::debug!(purged, "Purged expired store entries");
                        }
                    }
                });

                (mem, Arc::new(MemoryBackplane::new()))
            }
        };

    let app_state = state::AppState::build(
        config.settings(),
        auth::AuthGate::new(jwt_secret),
        store,
        bp,
        Arc::new(LogPushNotifier),
    );
    state::spawn_background_tasks(&app_state);

    let app = routes::build_router(app_state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
