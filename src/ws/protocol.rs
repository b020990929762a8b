//! Wire protocol: tagged JSON messages over the WebSocket.
//!
//! Every frame is a JSON object `{"event": "...", "data": {...}}`; unit
//! events omit `data`. Inbound frames that fail to parse are dropped and
//! logged — one malformed message never closes the connection.

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::alerts::{EmergencyAlert, NearbyAlert};

/// Messages a client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    /// Updates geo-cell membership, caches the location, and returns nearby
    /// alerts directly to the sender.
    #[serde(rename = "location:update", rename_all = "camelCase")]
    LocationUpdate {
        lat: f64,
        lng: f64,
        #[serde(default)]
        accuracy: Option<f64>,
        /// Nearby-query radius override in km (server default: 50).
        #[serde(default)]
        radius_km: Option<f64>,
    },

    /// Replaces the connection's alert-type subscriptions.
    #[serde(rename = "alert:subscribe", rename_all = "camelCase")]
    Subscribe { alert_types: Vec<String> },

    /// Citizen emergency report; the payload shape belongs to the reporter.
    #[serde(rename = "emergency:report")]
    Report(Value),

    /// Responder status change; ignored for citizen connections.
    #[serde(rename = "responder:status", rename_all = "camelCase")]
    ResponderStatus {
        status: String,
        #[serde(default)]
        assigned_incident: Option<String>,
    },

    /// Liveness signal; answered with `heartbeat:ack`.
    #[serde(rename = "heartbeat")]
    Heartbeat,
}

/// Messages the server sends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage {
    /// Full alert payload, fanned out to the alert's target rooms.
    #[serde(rename = "alert:emergency")]
    Alert(EmergencyAlert),

    /// Direct reply to a location update: active alerts within the radius,
    /// ascending by distance.
    #[serde(rename = "alerts:nearby")]
    Nearby(Vec<NearbyAlert>),

    /// Connect-time snapshot: up to the 10 most recent alerts from the last
    /// hour.
    #[serde(rename = "alerts:initial")]
    Initial(Vec<EmergencyAlert>),

    /// Connect-time load snapshot.
    #[serde(rename = "system:status", rename_all = "camelCase")]
    SystemStatus {
        connections: usize,
        active_alerts: usize,
        uptime_secs: u64,
    },

    /// Operator broadcast, delivered to every connection on every process.
    #[serde(rename = "system:message", rename_all = "camelCase")]
    SystemMessage {
        message: String,
        sent_at: DateTime<Utc>,
    },

    #[serde(rename = "heartbeat:ack")]
    HeartbeatAck,

    /// A citizen report forwarded to the responder room.
    #[serde(rename = "emergency:new_report", rename_all = "camelCase")]
    NewReport {
        report_id: String,
        from_user: String,
        payload: Value,
        received_at: DateTime<Utc>,
    },

    /// Acknowledgment back to the reporting connection.
    #[serde(rename = "emergency:report_received", rename_all = "camelCase")]
    ReportReceived { report_id: String },

    /// Responder status forwarded to the coordinator room.
    #[serde(rename = "responder:status_update", rename_all = "camelCase")]
    ResponderStatusUpdate {
        user_id: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        assigned_incident: Option<String>,
        updated_at: DateTime<Utc>,
    },
}

impl ServerMessage {
    /// Serialize into a text WebSocket frame. The protocol types always
    /// serialize; a failure here is logged and the frame dropped rather
    /// than panicking the actor.
    pub fn to_frame(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(json) => Some(Message::Text(json.into())),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize server message");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_parses_without_data_field() {
        let msg: ClientMessage = serde_json::from_str(r#"{"event":"heartbeat"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Heartbeat));
    }

    #[test]
    fn location_update_parses_camel_case_payload() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"event":"location:update","data":{"lat":19.1,"lng":72.85,"accuracy":12.0}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::LocationUpdate {
                lat,
                lng,
                accuracy,
                radius_km,
            } => {
                assert_eq!(lat, 19.1);
                assert_eq!(lng, 72.85);
                assert_eq!(accuracy, Some(12.0));
                assert_eq!(radius_km, None);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn subscribe_parses_alert_types() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"event":"alert:subscribe","data":{"alertTypes":["flood","fire"]}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Subscribe { alert_types } => {
                assert_eq!(alert_types, vec!["flood", "fire"]);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn malformed_event_is_an_error_not_a_panic() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"event":"bogus:event"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json at all").is_err());
    }

    #[test]
    fn server_heartbeat_ack_serializes_as_bare_event() {
        let json = serde_json::to_string(&ServerMessage::HeartbeatAck).unwrap();
        assert_eq!(json, r#"{"event":"heartbeat:ack"}"#);
    }
}
