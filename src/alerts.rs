//! Emergency alert data model and active-alert queries.
//!
//! Alerts are append-only: severity and kind never change after creation,
//! and updates are modeled by callers as new alerts referencing the prior
//! id. The active set lives in the ephemeral store under `alert:<id>` with
//! a 24-hour TTL, so queries here are linear scans over at most a few
//! hundred live records — deliberately not spatially indexed.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::geo::haversine_km;
use crate::store::{EphemeralStateStore, StoreError};

/// TTL for cached alerts.
pub const ALERT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// TTL for cached connection locations.
pub const LOCATION_TTL: Duration = Duration::from_secs(60 * 60);
/// TTL for cached citizen reports.
pub const REPORT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// TTL for cached responder status.
pub const RESPONDER_STATUS_TTL: Duration = Duration::from_secs(30 * 60);

/// How many alerts the connect-time snapshot returns (window: last hour).
const INITIAL_LIMIT: usize = 10;

/// Alert severity, lowest to highest. Only `critical` reaches the global room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Alert center point plus affected radius.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertLocation {
    pub lat: f64,
    pub lng: f64,
    pub radius_km: f64,
    #[serde(default)]
    pub address: String,
}

/// A single emergency alert as broadcast to clients.
///
/// `kind` is an open lowercase label (`flood`, `evacuation`, `weather`, ...)
/// rather than a closed enum: upstream feeds mint new kinds and alert-type
/// rooms key on the label verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyAlert {
    pub id: String,
    pub kind: String,
    pub severity: Severity,
    pub location: AlertLocation,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub source: String,
    #[serde(default)]
    pub affected_areas: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_duration: Option<String>,
    #[serde(default)]
    pub instructions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    /// Id of the alert this one supersedes, if any (append-only updates).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
}

/// Alert submission payload accepted from the REST API and external feeds.
/// Missing id and timestamp are generated server-side.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertSubmission {
    #[serde(default)]
    pub id: Option<String>,
    pub kind: String,
    pub severity: Severity,
    pub location: AlertLocation,
    pub message: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub affected_areas: Vec<String>,
    #[serde(default)]
    pub expected_duration: Option<String>,
    #[serde(default)]
    pub instructions: Vec<String>,
    #[serde(default)]
    pub resources: Option<Value>,
    #[serde(default)]
    pub supersedes: Option<String>,
}

impl AlertSubmission {
    /// Materialize the submission into a full alert, filling generated fields.
    pub fn into_alert(self, default_source: &str) -> EmergencyAlert {
        EmergencyAlert {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            kind: self.kind.to_lowercase(),
            severity: self.severity,
            location: self.location,
            message: self.message,
            created_at: Utc::now(),
            source: self.source.unwrap_or_else(|| default_source.to_string()),
            affected_areas: self.affected_areas,
            expected_duration: self.expected_duration,
            instructions: self.instructions,
            resources: self.resources,
            supersedes: self.supersedes,
        }
    }
}

/// An alert paired with its distance from a query point.
#[derive(Debug, Clone, Serialize)]
pub struct NearbyAlert {
    pub distance_km: f64,
    #[serde(flatten)]
    pub alert: EmergencyAlert,
}

/// Scan the active alert set and return those within `radius_km` of the
/// point, sorted ascending by great-circle distance.
pub async fn nearby_alerts(
    store: &Arc<dyn EphemeralStateStore>,
    lat: f64,
    lng: f64,
    radius_km: f64,
) -> Result<Vec<NearbyAlert>, StoreError> {
    let mut hits: Vec<NearbyAlert> = active_alerts(store)
        .await?
        .into_iter()
        .filter_map(|alert| {
            let d = haversine_km(lat, lng, alert.location.lat, alert.location.lng);
            (d <= radius_km).then_some(NearbyAlert {
                distance_km: d,
                alert,
            })
        })
        .collect();

    hits.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    Ok(hits)
}

/// Up to 10 most-recent alerts from the last hour, newest first.
/// Sent once to each connection right after it is registered, which is also
/// how a client recovers alerts published while it was offline.
pub async fn initial_alerts(
    store: &Arc<dyn EphemeralStateStore>,
) -> Result<Vec<EmergencyAlert>, StoreError> {
    let cutoff = Utc::now() - ChronoDuration::hours(1);
    let mut recent: Vec<EmergencyAlert> = active_alerts(store)
        .await?
        .into_iter()
        .filter(|a| a.created_at >= cutoff)
        .collect();

    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    recent.truncate(INITIAL_LIMIT);
    Ok(recent)
}

/// All live alerts from the store, silently skipping payloads that no
/// longer parse (a newer process may have written an extended schema).
async fn active_alerts(
    store: &Arc<dyn EphemeralStateStore>,
) -> Result<Vec<EmergencyAlert>, StoreError> {
    let values = store.scan_prefix("alert:").await?;
    Ok(values
        .into_iter()
        .filter_map(|v| match serde_json::from_value::<EmergencyAlert>(v) {
            Ok(alert) => Some(alert),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unparseable cached alert");
                None
            }
        })
        .collect())
}

/// Storage key for an alert.
pub fn alert_key(id: &str) -> String {
    format!("alert:{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn test_alert(id: &str, lat: f64, lng: f64, severity: Severity) -> EmergencyAlert {
        EmergencyAlert {
            id: id.to_string(),
            kind: "flood".to_string(),
            severity,
            location: AlertLocation {
                lat,
                lng,
                radius_km: 50.0,
                address: String::new(),
            },
            message: "test".to_string(),
            created_at: Utc::now(),
            source: "test".to_string(),
            affected_areas: vec![],
            expected_duration: None,
            instructions: vec![],
            resources: None,
            supersedes: None,
        }
    }

    async fn seed(store: &Arc<dyn EphemeralStateStore>, alert: &EmergencyAlert) {
        store
            .put(
                &alert_key(&alert.id),
                serde_json::to_value(alert).unwrap(),
                ALERT_TTL,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn nearby_sorted_ascending_with_exact_point_first() {
        let store: Arc<dyn EphemeralStateStore> = Arc::new(MemoryStore::new());
        // Same point, ~5 km off, ~40 km off
        seed(&store, &test_alert("exact", 19.0760, 72.8777, Severity::High)).await;
        seed(&store, &test_alert("near", 19.1200, 72.8777, Severity::High)).await;
        seed(&store, &test_alert("far", 19.4000, 72.8777, Severity::High)).await;
        // Outside the radius entirely
        seed(&store, &test_alert("delhi", 28.6139, 77.2090, Severity::High)).await;

        let hits = nearby_alerts(&store, 19.0760, 72.8777, 50.0).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.alert.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "near", "far"]);
        assert_eq!(hits[0].distance_km, 0.0);
    }

    #[tokio::test]
    async fn initial_snapshot_caps_at_ten_newest_first() {
        let store: Arc<dyn EphemeralStateStore> = Arc::new(MemoryStore::new());
        for i in 0..15 {
            let mut alert = test_alert(&format!("a{i}"), 19.0, 72.0, Severity::Low);
            alert.created_at = Utc::now() - ChronoDuration::seconds(i);
            seed(&store, &alert).await;
        }
        // An old alert outside the one-hour window
        let mut stale = test_alert("stale", 19.0, 72.0, Severity::Low);
        stale.created_at = Utc::now() - ChronoDuration::hours(2);
        seed(&store, &stale).await;

        let snapshot = initial_alerts(&store).await.unwrap();
        assert_eq!(snapshot.len(), 10);
        assert_eq!(snapshot[0].id, "a0");
        assert!(snapshot.iter().all(|a| a.id != "stale"));
    }

    #[test]
    fn severity_orders_low_to_critical() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn severity_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"critical\""
        );
    }
}
