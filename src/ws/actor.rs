//! Actor-per-connection lifecycle.
//!
//! Each authenticated WebSocket gets one actor: a writer task owning the
//! sink (fed by an mpsc channel anyone can clone a sender to) and a reader
//! loop dispatching inbound events. Liveness is client heartbeats checked
//! by a process-wide sweep, so the actor itself runs no timers.

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::HashSet;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::alerts::{self, LOCATION_TTL, REPORT_TTL, RESPONDER_STATUS_TTL};
use crate::auth::{AuthedUser, Role};
use crate::registry::{ConnectionEntry, ConnectionSender};
use crate::rooms::Room;
use crate::state::AppState;
use crate::ws::protocol::{ClientMessage, ServerMessage};

/// Run one authenticated connection to completion.
pub async fn run_connection(
    socket: WebSocket,
    state: AppState,
    user: AuthedUser,
    device: Option<String>,
) {
    let conn_id = Uuid::new_v4();
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    state.registry.register(ConnectionEntry::new(
        conn_id,
        user.user_id.clone(),
        user.role,
        tx.clone(),
        device,
    ));
    state.router.join_initial(conn_id, user.role);

    tracing::info!(
        conn_id = %conn_id,
        user_id = %user.user_id,
        role = %user.role,
        "Connection actor started"
    );

    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    send_initial_data(&state, &tx).await;

    // Reader loop: dispatch inbound events until the client goes away.
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(event) => {
                        handle_client_message(&state, conn_id, &user, &tx, event).await;
                    }
                    Err(e) => {
                        // Drop the bad message, keep the connection.
                        tracing::warn!(
                            conn_id = %conn_id,
                            error = %e,
                            "Dropping malformed client message"
                        );
                    }
                },
                Message::Binary(_) => {
                    tracing::debug!(conn_id = %conn_id, "Ignoring binary frame (protocol is JSON text)");
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Pong(_) => {}
                Message::Close(frame) => {
                    tracing::info!(conn_id = %conn_id, reason = ?frame, "Client initiated close");
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
            None => break,
        }
    }

    writer_handle.abort();

    // Same cleanup for client close, transport error, and heartbeat timeout.
    state.router.remove_connection(conn_id);
    state.registry.unregister(conn_id);

    tracing::info!(conn_id = %conn_id, user_id = %user.user_id, "Connection actor stopped");
}

/// Writer task: forwards queued frames to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            break;
        }
    }
}

/// One-shot data pushed right after registration: recent alerts (also the
/// recovery path after a missed-backplane window) and a load snapshot.
async fn send_initial_data(state: &AppState, tx: &ConnectionSender) {
    match alerts::initial_alerts(&state.store).await {
        Ok(recent) => send(tx, &ServerMessage::Initial(recent)),
        Err(e) => tracing::warn!(error = %e, "Failed to load initial alert snapshot"),
    }

    let active_alerts = match state.store.scan_prefix("alert:").await {
        Ok(values) => values.len(),
        Err(_) => 0,
    };
    send(
        tx,
        &ServerMessage::SystemStatus {
            connections: state.registry.len(),
            active_alerts,
            uptime_secs: state.metrics.uptime_secs(),
        },
    );
}

/// Dispatch one inbound event. Any traffic counts as liveness.
async fn handle_client_message(
    state: &AppState,
    conn_id: Uuid,
    user: &AuthedUser,
    tx: &ConnectionSender,
    event: ClientMessage,
) {
    state.registry.touch(conn_id);

    match event {
        ClientMessage::LocationUpdate {
            lat,
            lng,
            accuracy,
            radius_km,
        } => {
            state.registry.set_location(conn_id, lat, lng);
            let cell = state.router.on_location_update(conn_id, lat, lng);
            tracing::debug!(conn_id = %conn_id, cell = %cell, "Location updated");

            let cached = json!({
                "lat": lat,
                "lng": lng,
                "accuracy": accuracy,
                "updated_at": Utc::now(),
            });
            if let Err(e) = state
                .store
                .put(&format!("location:{}", user.user_id), cached, LOCATION_TTL)
                .await
            {
                tracing::warn!(conn_id = %conn_id, error = %e, "Failed to cache location");
            }

            let radius = radius_km.unwrap_or(state.settings.nearby_radius_km);
            match alerts::nearby_alerts(&state.store, lat, lng, radius).await {
                Ok(hits) => send(tx, &ServerMessage::Nearby(hits)),
                Err(e) => tracing::warn!(conn_id = %conn_id, error = %e, "Nearby alert query failed"),
            }
        }

        ClientMessage::Subscribe { alert_types } => {
            let kinds: HashSet<String> =
                alert_types.into_iter().map(|k| k.to_lowercase()).collect();
            state.router.on_subscription_change(conn_id, &kinds);
            state.registry.set_subscriptions(conn_id, kinds);
        }

        ClientMessage::Report(payload) => {
            let report_id = Uuid::new_v4().to_string();
            if let Err(e) = state
                .store
                .put(&format!("report:{report_id}"), payload.clone(), REPORT_TTL)
                .await
            {
                // No ack on failure: the client retries the submission.
                tracing::warn!(conn_id = %conn_id, error = %e, "Failed to cache emergency report");
                return;
            }

            state.broadcaster.deliver_to_rooms(
                &[Room::Role(Role::Responder)],
                &ServerMessage::NewReport {
                    report_id: report_id.clone(),
                    from_user: user.user_id.clone(),
                    payload,
                    received_at: Utc::now(),
                },
            );
            send(tx, &ServerMessage::ReportReceived { report_id });
        }

        ClientMessage::ResponderStatus {
            status,
            assigned_incident,
        } => {
            if user.role == Role::Citizen {
                tracing::debug!(conn_id = %conn_id, "Ignoring responder status from citizen connection");
                return;
            }

            let cached = json!({
                "status": status,
                "assigned_incident": assigned_incident,
                "updated_at": Utc::now(),
            });
            if let Err(e) = state
                .store
                .put(
                    &format!("responder:{}", user.user_id),
                    cached,
                    RESPONDER_STATUS_TTL,
                )
                .await
            {
                tracing::warn!(conn_id = %conn_id, error = %e, "Failed to cache responder status");
            }

            state.broadcaster.deliver_to_rooms(
                &[Room::Coordinators],
                &ServerMessage::ResponderStatusUpdate {
                    user_id: user.user_id.clone(),
                    status,
                    assigned_incident,
                    updated_at: Utc::now(),
                },
            );
        }

        ClientMessage::Heartbeat => {
            send(tx, &ServerMessage::HeartbeatAck);
        }
    }
}

fn send(tx: &ConnectionSender, message: &ServerMessage) {
    if let Some(frame) = message.to_frame() {
        let _ = tx.send(frame);
    }
}
