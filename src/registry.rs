//! Per-process connection registry.
//!
//! Tracks every live WebSocket connection this process accepted: identity,
//! role, last-seen timestamp, last location, and alert-type subscriptions.
//! Owned and mutated only by this process; sibling processes see traffic
//! through the cluster backplane, never this table.
//!
//! Mutations for a given connection come only from that connection's actor
//! task plus the sweep task, so entries never race on membership data.

use axum::extract::ws::{CloseFrame, Message};
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::auth::Role;

/// Sender half of a connection's outbound channel. Cloning one lets any part
/// of the system push frames to that client.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// Close code sent when a connection misses its heartbeat window.
const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4008;

/// One live connection and everything the router needs to know about it.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub conn_id: Uuid,
    pub user_id: String,
    pub role: Role,
    pub sender: ConnectionSender,
    pub last_seen: Instant,
    pub location: Option<(f64, f64)>,
    pub subscriptions: HashSet<String>,
    /// Informational device classification supplied at connect time.
    pub device: Option<String>,
}

impl ConnectionEntry {
    pub fn new(
        conn_id: Uuid,
        user_id: String,
        role: Role,
        sender: ConnectionSender,
        device: Option<String>,
    ) -> Self {
        Self {
            conn_id,
            user_id,
            role,
            sender,
            last_seen: Instant::now(),
            location: None,
            subscriptions: HashSet::new(),
            device,
        }
    }
}

/// Process-local table of live connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, entry: ConnectionEntry) {
        let conn_id = entry.conn_id;
        self.connections.insert(conn_id, entry);
        tracing::debug!(conn_id = %conn_id, total = self.connections.len(), "Connection registered");
    }

    pub fn unregister(&self, conn_id: Uuid) -> Option<ConnectionEntry> {
        let removed = self.connections.remove(&conn_id).map(|(_, e)| e);
        if removed.is_some() {
            tracing::debug!(conn_id = %conn_id, total = self.connections.len(), "Connection unregistered");
        }
        removed
    }

    /// Update a connection's last-seen timestamp (heartbeat or any inbound
    /// traffic counts as liveness).
    pub fn touch(&self, conn_id: Uuid) {
        if let Some(mut entry) = self.connections.get_mut(&conn_id) {
            entry.last_seen = Instant::now();
        }
    }

    pub fn find(&self, conn_id: Uuid) -> Option<ConnectionEntry> {
        self.connections.get(&conn_id).map(|e| e.clone())
    }

    pub fn all_in_role(&self, role: Role) -> Vec<ConnectionEntry> {
        self.connections
            .iter()
            .filter(|e| e.role == role)
            .map(|e| e.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Record an updated location for a connection.
    pub fn set_location(&self, conn_id: Uuid, lat: f64, lng: f64) {
        if let Some(mut entry) = self.connections.get_mut(&conn_id) {
            entry.location = Some((lat, lng));
        }
    }

    /// Replace a connection's alert-type subscriptions.
    pub fn set_subscriptions(&self, conn_id: Uuid, kinds: HashSet<String>) {
        if let Some(mut entry) = self.connections.get_mut(&conn_id) {
            entry.subscriptions = kinds;
        }
    }

    /// Push a frame to a single connection. Send failures mean the actor is
    /// already tearing down; the registry entry goes with it.
    pub fn send_to(&self, conn_id: Uuid, msg: Message) {
        if let Some(entry) = self.connections.get(&conn_id) {
            let _ = entry.sender.send(msg);
        }
    }

    /// Remove and close every connection whose last-seen timestamp is older
    /// than `timeout`. A missed heartbeat is an ordinary disconnect: the
    /// caller performs the same room cleanup as a client-initiated close.
    pub fn sweep_stale(&self, timeout: Duration) -> Vec<ConnectionEntry> {
        let now = Instant::now();
        let stale: Vec<Uuid> = self
            .connections
            .iter()
            .filter(|e| now.duration_since(e.last_seen) > timeout)
            .map(|e| e.conn_id)
            .collect();

        let mut removed = Vec::with_capacity(stale.len());
        for conn_id in stale {
            if let Some((_, entry)) = self.connections.remove(&conn_id) {
                tracing::info!(
                    conn_id = %conn_id,
                    user_id = %entry.user_id,
                    "Heartbeat timeout, closing connection"
                );
                let _ = entry.sender.send(Message::Close(Some(CloseFrame {
                    code: CLOSE_HEARTBEAT_TIMEOUT,
                    reason: "Heartbeat timeout".into(),
                })));
                removed.push(entry);
            }
        }
        removed
    }
}
