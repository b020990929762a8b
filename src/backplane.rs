//! Cluster pub/sub backplane.
//!
//! Lets an alert published on one process reach connections attached to any
//! sibling process behind the load balancer. Exactly two channels exist: one
//! for alert fan-out and one for operator system messages. Delivery is
//! at-least-once to currently-subscribed processes with no durable replay;
//! a process that was down recovers missed alerts through the connect-time
//! snapshot, since every alert also sits in the ephemeral store.
//!
//! Envelopes carry the publishing process's id so a process can skip its own
//! echo — it already delivered locally before publishing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::alerts::EmergencyAlert;

/// Local fan-in capacity per channel before slow subscribers start lagging.
const CHANNEL_CAPACITY: usize = 256;

/// Reconnect backoff bounds for the Redis subscriber loop.
const BACKOFF_MIN: Duration = Duration::from_millis(250);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum BackplaneError {
    #[error("backplane publish failed: {0}")]
    Publish(String),
}

/// The two backplane channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Alerts,
    System,
}

impl Channel {
    pub fn name(&self) -> &'static str {
        match self {
            Channel::Alerts => "alertnet:alerts",
            Channel::System => "alertnet:system",
        }
    }
}

/// Cross-process alert envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEnvelope {
    pub origin: Uuid,
    pub alert: EmergencyAlert,
}

/// Cross-process operator broadcast envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEnvelope {
    pub origin: Uuid,
    pub message: String,
    pub sent_at: DateTime<Utc>,
}

/// Publish/subscribe bridge between processes. Payloads are opaque strings
/// (JSON envelopes); ordering is best-effort FIFO within a channel from a
/// single publisher, nothing across channels.
#[async_trait]
pub trait ClusterBackplane: Send + Sync {
    async fn publish(&self, channel: Channel, payload: String) -> Result<(), BackplaneError>;

    /// A receiver of every payload subsequently published on `channel`,
    /// including by this process.
    fn subscribe(&self, channel: Channel) -> broadcast::Receiver<String>;
}

// --- In-process backend ---

/// Single-node backplane over `tokio::sync::broadcast`. Also what tests use
/// to stand up multiple server instances sharing one bus.
pub struct MemoryBackplane {
    alerts: broadcast::Sender<String>,
    system: broadcast::Sender<String>,
}

impl MemoryBackplane {
    pub fn new() -> Self {
        let (alerts, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (system, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { alerts, system }
    }

    fn sender(&self, channel: Channel) -> &broadcast::Sender<String> {
        match channel {
            Channel::Alerts => &self.alerts,
            Channel::System => &self.system,
        }
    }
}

impl Default for MemoryBackplane {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterBackplane for MemoryBackplane {
    async fn publish(&self, channel: Channel, payload: String) -> Result<(), BackplaneError> {
        // A send error just means no subscriber exists yet; that matches the
        // no-durable-replay contract.
        let _ = self.sender(channel).send(payload);
        Ok(())
    }

    fn subscribe(&self, channel: Channel) -> broadcast::Receiver<String> {
        self.sender(channel).subscribe()
    }
}

// --- Redis backend ---

/// Redis pub/sub backplane. Publishing goes through a reconnecting
/// connection manager; the subscriber side runs a dedicated task that
/// re-establishes the pub/sub connection with capped exponential backoff,
/// fanning received payloads into local broadcast channels. While the
/// subscriber is down the process keeps serving its own connections;
/// cross-process delivery is degraded until reconnect.
pub struct RedisBackplane {
    conn: redis::aio::ConnectionManager,
    alerts: broadcast::Sender<String>,
    system: broadcast::Sender<String>,
}

impl RedisBackplane {
    pub async fn connect(url: &str) -> Result<Self, BackplaneError> {
        let client =
            redis::Client::open(url).map_err(|e| BackplaneError::Publish(e.to_string()))?;
        let conn = redis::aio::ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BackplaneError::Publish(e.to_string()))?;

        let (alerts, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (system, _) = broadcast::channel(CHANNEL_CAPACITY);

        tokio::spawn(subscriber_loop(client, alerts.clone(), system.clone()));

        Ok(Self {
            conn,
            alerts,
            system,
        })
    }
}

/// Connect, subscribe to both channels, and pump messages until the
/// connection drops; then back off and reconnect.
async fn subscriber_loop(
    client: redis::Client,
    alerts: broadcast::Sender<String>,
    system: broadcast::Sender<String>,
) {
    let mut backoff = BACKOFF_MIN;
    loop {
        match pump_messages(&client, &alerts, &system).await {
            Ok(()) => {
                tracing::warn!("Backplane pub/sub stream ended, reconnecting");
                backoff = BACKOFF_MIN;
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    backoff_ms = backoff.as_millis() as u64,
                    "Backplane pub/sub connection lost"
                );
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(BACKOFF_MAX);
    }
}

async fn pump_messages(
    client: &redis::Client,
    alerts: &broadcast::Sender<String>,
    system: &broadcast::Sender<String>,
) -> Result<(), redis::RedisError> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(Channel::Alerts.name()).await?;
    pubsub.subscribe(Channel::System.name()).await?;
    tracing::info!("Backplane subscribed to alert and system channels");

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable backplane payload");
                continue;
            }
        };
        let target = if msg.get_channel_name() == Channel::System.name() {
            system
        } else {
            alerts
        };
        let _ = target.send(payload);
    }
    Ok(())
}

#[async_trait]
impl ClusterBackplane for RedisBackplane {
    async fn publish(&self, channel: Channel, payload: String) -> Result<(), BackplaneError> {
        let mut conn = self.conn.clone();
        redis::cmd("PUBLISH")
            .arg(channel.name())
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| BackplaneError::Publish(e.to_string()))
    }

    fn subscribe(&self, channel: Channel) -> broadcast::Receiver<String> {
        match channel {
            Channel::Alerts => self.alerts.subscribe(),
            Channel::System => self.system.subscribe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backplane_fans_out_to_all_subscribers() {
        let bus = MemoryBackplane::new();
        let mut a = bus.subscribe(Channel::Alerts);
        let mut b = bus.subscribe(Channel::Alerts);

        bus.publish(Channel::Alerts, "payload".to_string())
            .await
            .unwrap();

        assert_eq!(a.recv().await.unwrap(), "payload");
        assert_eq!(b.recv().await.unwrap(), "payload");
    }

    #[tokio::test]
    async fn channels_are_independent() {
        let bus = MemoryBackplane::new();
        let mut alerts = bus.subscribe(Channel::Alerts);
        let mut system = bus.subscribe(Channel::System);

        bus.publish(Channel::System, "op".to_string()).await.unwrap();

        assert_eq!(system.recv().await.unwrap(), "op");
        assert!(matches!(
            alerts.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn publish_without_subscribers_succeeds() {
        let bus = MemoryBackplane::new();
        // No durable replay: publishing into the void is fine.
        bus.publish(Channel::Alerts, "lost".to_string())
            .await
            .unwrap();
    }
}
