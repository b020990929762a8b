//! Alert broadcast orchestration.
//!
//! Ordering is cache-then-publish: an alert that cannot be written to the
//! ephemeral store is not broadcast at all, so reconnecting clients can
//! always recover anything that was delivered. After caching, the alert is
//! delivered to this process's connections in the target rooms, published
//! on the cluster channel for sibling processes, and — for critical
//! severity — handed to the push notifier as a fire-and-forget side effect.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::alerts::{alert_key, EmergencyAlert, Severity, ALERT_TTL};
use crate::backplane::{AlertEnvelope, Channel, ClusterBackplane, SystemEnvelope};
use crate::push::PushNotifier;
use crate::registry::ConnectionRegistry;
use crate::rooms::{Room, RoomRouter};
use crate::store::EphemeralStateStore;
use crate::ws::protocol::ServerMessage;

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    /// The store write failed; nothing was delivered.
    #[error("failed to persist alert: {0}")]
    Persistence(#[from] crate::store::StoreError),
    /// Local delivery happened but sibling processes were not reached.
    #[error("failed to publish on cluster backplane: {0}")]
    Backplane(#[from] crate::backplane::BackplaneError),
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Fan-out orchestrator, one per process.
pub struct AlertBroadcaster {
    process_id: Uuid,
    store: Arc<dyn EphemeralStateStore>,
    backplane: Arc<dyn ClusterBackplane>,
    registry: Arc<ConnectionRegistry>,
    router: Arc<RoomRouter>,
    push: Arc<dyn PushNotifier>,
}

impl AlertBroadcaster {
    pub fn new(
        process_id: Uuid,
        store: Arc<dyn EphemeralStateStore>,
        backplane: Arc<dyn ClusterBackplane>,
        registry: Arc<ConnectionRegistry>,
        router: Arc<RoomRouter>,
        push: Arc<dyn PushNotifier>,
    ) -> Self {
        Self {
            process_id,
            store,
            backplane,
            registry,
            router,
            push,
        }
    }

    pub fn process_id(&self) -> Uuid {
        self.process_id
    }

    /// Broadcast an alert: cache with 24h TTL, deliver to local target-room
    /// connections, publish for siblings, then trigger push for critical
    /// severity.
    pub async fn broadcast(&self, alert: EmergencyAlert) -> Result<(), BroadcastError> {
        self.store
            .put(
                &alert_key(&alert.id),
                serde_json::to_value(&alert)?,
                ALERT_TTL,
            )
            .await?;

        let rooms = RoomRouter::target_rooms_for(&alert);
        let delivered = self.deliver_to_rooms(&rooms, &ServerMessage::Alert(alert.clone()));
        tracing::info!(
            alert_id = %alert.id,
            severity = ?alert.severity,
            kind = %alert.kind,
            local_delivered = delivered,
            "Alert broadcast"
        );

        let envelope = AlertEnvelope {
            origin: self.process_id,
            alert: alert.clone(),
        };
        self.backplane
            .publish(Channel::Alerts, serde_json::to_string(&envelope)?)
            .await?;

        if alert.severity == Severity::Critical {
            let push = self.push.clone();
            tokio::spawn(async move {
                if let Err(e) = push.notify_critical(&alert).await {
                    tracing::warn!(alert_id = %alert.id, error = %e, "Push notification failed");
                }
            });
        }

        Ok(())
    }

    /// Operator system-wide message: deliver to every local connection and
    /// publish for siblings.
    pub async fn broadcast_system(&self, message: String) -> Result<(), BroadcastError> {
        let envelope = SystemEnvelope {
            origin: self.process_id,
            message: message.clone(),
            sent_at: Utc::now(),
        };
        self.deliver_to_rooms(
            &[Room::Global],
            &ServerMessage::SystemMessage {
                message,
                sent_at: envelope.sent_at,
            },
        );
        self.backplane
            .publish(Channel::System, serde_json::to_string(&envelope)?)
            .await?;
        Ok(())
    }

    /// Handle an alert envelope received from the backplane. Envelopes this
    /// process published are skipped: local delivery already happened in
    /// `broadcast`.
    pub fn on_backplane_alert(&self, raw: &str) {
        let envelope: AlertEnvelope = match serde_json::from_str(raw) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed backplane alert envelope");
                return;
            }
        };
        if envelope.origin == self.process_id {
            return;
        }

        let rooms = RoomRouter::target_rooms_for(&envelope.alert);
        let delivered =
            self.deliver_to_rooms(&rooms, &ServerMessage::Alert(envelope.alert.clone()));
        tracing::debug!(
            alert_id = %envelope.alert.id,
            origin = %envelope.origin,
            local_delivered = delivered,
            "Delivered backplane alert"
        );
    }

    /// Handle an operator message envelope received from the backplane.
    pub fn on_backplane_system(&self, raw: &str) {
        let envelope: SystemEnvelope = match serde_json::from_str(raw) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed backplane system envelope");
                return;
            }
        };
        if envelope.origin == self.process_id {
            return;
        }
        self.deliver_to_rooms(
            &[Room::Global],
            &ServerMessage::SystemMessage {
                message: envelope.message,
                sent_at: envelope.sent_at,
            },
        );
    }

    /// Deliver one message to every local connection in any of the rooms,
    /// at most once per connection. Returns the delivery count.
    pub fn deliver_to_rooms(&self, rooms: &[Room], message: &ServerMessage) -> usize {
        let Some(frame) = message.to_frame() else {
            return 0;
        };
        let targets = self.router.members_of_any(rooms);
        for conn_id in &targets {
            self.registry.send_to(*conn_id, frame.clone());
        }
        targets.len()
    }
}
