//! Periodic service metrics.
//!
//! Every interval (30s in production) the collector snapshots connection
//! count, active alert count, and per-cell connection tallies. Reads never
//! touch the broadcast path; a failed snapshot is logged and skipped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::registry::ConnectionRegistry;
use crate::rooms::RoomRouter;
use crate::store::EphemeralStateStore;

/// One metrics snapshot, serialized as-is by `GET /api/metrics`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub taken_at: Option<DateTime<Utc>>,
    pub connections: usize,
    pub active_alerts: usize,
    /// Connection count per geo cell, keyed by the cell's display id.
    pub per_cell: BTreeMap<String, usize>,
    pub uptime_secs: u64,
}

/// Collects and serves the latest snapshot.
pub struct MetricsCollector {
    started_at: Instant,
    latest: RwLock<MetricsSnapshot>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            latest: RwLock::new(MetricsSnapshot::default()),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Take a fresh snapshot and make it the readable one.
    pub async fn collect(
        &self,
        registry: &ConnectionRegistry,
        router: &RoomRouter,
        store: &Arc<dyn EphemeralStateStore>,
    ) {
        let active_alerts = match store.scan_prefix("alert:").await {
            Ok(values) => values.len(),
            Err(e) => {
                tracing::warn!(error = %e, "Metrics alert scan failed, keeping previous count");
                self.latest.read().await.active_alerts
            }
        };

        let per_cell: BTreeMap<String, usize> = router
            .cell_occupancy()
            .into_iter()
            .map(|(cell, count)| (cell.to_string(), count))
            .collect();

        let snapshot = MetricsSnapshot {
            taken_at: Some(Utc::now()),
            connections: registry.len(),
            active_alerts,
            per_cell,
            uptime_secs: self.uptime_secs(),
        };

        tracing::debug!(
            connections = snapshot.connections,
            active_alerts = snapshot.active_alerts,
            regions = snapshot.per_cell.len(),
            "Metrics snapshot"
        );
        *self.latest.write().await = snapshot;
    }

    pub async fn get_metrics(&self) -> MetricsSnapshot {
        self.latest.read().await.clone()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
