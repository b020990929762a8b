//! Shared application state and background tasks.
//!
//! The whole alert service is an explicit object graph constructed once at
//! process start and handed to every handler via axum's `State` extractor —
//! no global singletons, so tests build isolated instances freely.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::auth::AuthGate;
use crate::backplane::{Channel, ClusterBackplane};
use crate::broadcaster::AlertBroadcaster;
use crate::metrics::MetricsCollector;
use crate::push::PushNotifier;
use crate::registry::ConnectionRegistry;
use crate::rooms::RoomRouter;
use crate::store::EphemeralStateStore;

/// Runtime tunables, extracted from the full config so tests can construct
/// state without the CLI layer.
#[derive(Debug, Clone)]
pub struct Settings {
    /// A connection missing heartbeats for this long is force-disconnected.
    pub heartbeat_timeout: Duration,
    /// How often the stale-connection sweep runs.
    pub sweep_interval: Duration,
    /// How often the metrics collector snapshots.
    pub metrics_interval: Duration,
    /// Default nearby-query radius in km when the client sends none.
    pub nearby_radius_km: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(90),
            sweep_interval: Duration::from_secs(15),
            metrics_interval: Duration::from_secs(30),
            nearby_radius_km: 50.0,
        }
    }
}

/// Shared state cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub auth: Arc<AuthGate>,
    pub registry: Arc<ConnectionRegistry>,
    pub router: Arc<RoomRouter>,
    pub store: Arc<dyn EphemeralStateStore>,
    pub backplane: Arc<dyn ClusterBackplane>,
    pub broadcaster: Arc<AlertBroadcaster>,
    pub metrics: Arc<MetricsCollector>,
}

impl AppState {
    /// Wire up one process's service graph. Each call gets a fresh process
    /// id, so two states sharing a backplane behave like two cluster nodes.
    pub fn build(
        settings: Settings,
        auth: AuthGate,
        store: Arc<dyn EphemeralStateStore>,
        backplane: Arc<dyn ClusterBackplane>,
        push: Arc<dyn PushNotifier>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(RoomRouter::new());
        let broadcaster = Arc::new(AlertBroadcaster::new(
            Uuid::new_v4(),
            store.clone(),
            backplane.clone(),
            registry.clone(),
            router.clone(),
            push,
        ));

        Self {
            settings: Arc::new(settings),
            auth: Arc::new(auth),
            registry,
            router,
            store,
            backplane,
            broadcaster,
            metrics: Arc::new(MetricsCollector::new()),
        }
    }
}

/// Spawn the per-process background tasks: backplane consumers, the stale
/// connection sweep, and the metrics collector. Idempotent per state; call
/// once after `build`.
pub fn spawn_background_tasks(state: &AppState) {
    // Alert fan-in from sibling processes.
    {
        let broadcaster = state.broadcaster.clone();
        let mut rx = state.backplane.subscribe(Channel::Alerts);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(raw) => broadcaster.on_backplane_alert(&raw),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(missed = n, "Backplane alert consumer lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    // Operator system messages from sibling processes.
    {
        let broadcaster = state.broadcaster.clone();
        let mut rx = state.backplane.subscribe(Channel::System);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(raw) => broadcaster.on_backplane_system(&raw),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(missed = n, "Backplane system consumer lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    // Heartbeat sweep: one periodic pass over the registry, not a timer per
    // connection.
    {
        let registry = state.registry.clone();
        let router = state.router.clone();
        let timeout = state.settings.heartbeat_timeout;
        let sweep_interval = state.settings.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.tick().await; // skip the immediate first tick
            loop {
                ticker.tick().await;
                for entry in registry.sweep_stale(timeout) {
                    router.remove_connection(entry.conn_id);
                }
            }
        });
    }

    // Metrics snapshots.
    {
        let registry = state.registry.clone();
        let router = state.router.clone();
        let store = state.store.clone();
        let metrics = state.metrics.clone();
        let interval = state.settings.metrics_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                metrics.collect(&registry, &router, &store).await;
            }
        });
    }
}
