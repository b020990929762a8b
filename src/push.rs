//! Push-notification collaborator boundary.
//!
//! Critical alerts trigger a high-priority push on top of the WebSocket
//! fan-out. The provider lives outside this service; failures are logged
//! and never block or fail the broadcast path.

use async_trait::async_trait;

use crate::alerts::EmergencyAlert;

#[async_trait]
pub trait PushNotifier: Send + Sync {
    /// Fire a high-priority push for a critical alert.
    async fn notify_critical(&self, alert: &EmergencyAlert) -> Result<(), String>;
}

/// Default notifier: records the hand-off in the log. Deployments wire a
/// real provider here.
pub struct LogPushNotifier;

#[async_trait]
impl PushNotifier for LogPushNotifier {
    async fn notify_critical(&self, alert: &EmergencyAlert) -> Result<(), String> {
        tracing::info!(
            alert_id = %alert.id,
            kind = %alert.kind,
            "Critical alert handed to push notifier"
        );
        Ok(())
    }
}
