//! WebSocket upgrade endpoint.
//!
//! Auth happens at upgrade time via a `?token=` query parameter. A rejected
//! token never touches the registry: the socket is upgraded only to deliver
//! the close code, then dropped.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::AuthError;
use crate::state::AppState;
use crate::ws::actor;

/// Close codes for failed handshakes:
/// 4001 = token expired, 4002 = token invalid.
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;

#[derive(Debug, Deserialize)]
pub struct WsConnectQuery {
    pub token: String,
    /// Informational device classification (type/OS/browser).
    #[serde(default)]
    pub device: Option<String>,
}

/// GET /ws?token=JWT[&device=...]
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match state.auth.authenticate(&params.token) {
        Ok(user) => {
            tracing::info!(user_id = %user.user_id, role = %user.role, "WebSocket authenticated");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, user, params.device))
        }
        Err(err) => {
            let (close_code, reason) = match err {
                AuthError::Expired => (CLOSE_TOKEN_EXPIRED, "Token expired"),
                AuthError::Invalid => (CLOSE_TOKEN_INVALID, "Token invalid"),
            };
            tracing::warn!(close_code, reason, "WebSocket auth failed");
            ws.on_upgrade(move |socket| reject(socket, close_code, reason))
        }
    }
}

async fn reject(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}
