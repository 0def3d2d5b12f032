//! WebSocket handler for real-time client communication.
//!
//! Each connection is seeded with the current registry snapshot as
//! synthetic `added` events, then streams live discovery events from its
//! outbound queue until the client leaves or is force-closed. The server
//! pings on every heartbeat check; a peer that sends nothing back (not
//! even a pong) within the timeout is considered dead.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::sink::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use serde::{Deserialize, Serialize};

use crate::api::ws_connection::ConnectionState;
use crate::api::{AppState, ConnectionId};
use crate::error::TransportWriteError;
use crate::events::DiscoveryEvent;

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Message Types
// ─────────────────────────────────────────────────────────────────────────────

/// Incoming WebSocket message envelope.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum WsIncoming {
    Heartbeat,
}

/// Outgoing control messages. Discovery events are sent as-is.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum WsOutgoing {
    HeartbeatAck,
}

impl WsOutgoing {
    /// Serializes the message to a WebSocket text message.
    fn to_message(&self) -> Option<Message> {
        serde_json::to_string(self)
            .ok()
            .map(|s| Message::Text(s.into()))
    }
}

/// Why the per-connection loop ended.
#[derive(Debug)]
enum Exit {
    ForceClosed,
    ClientClosed,
    HeartbeatTimeout,
    QueueClosed,
    WriteFailed,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Main WebSocket connection handler.
async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Register connection for tracking and force-close capability
    let conn_guard = state.ws_manager.register();
    let conn_id = conn_guard.id();
    let cancel_token = conn_guard.cancel_token().clone();

    // Subscribe under the registry lock so the snapshot precedes every live event.
    let queue = state.registry.seed_subscriber(|records| {
        log::debug!("[WS] Seeding {} with {} device(s)", conn_id, records.len());
        state
            .dispatcher
            .subscribe(conn_id, records.into_iter().map(DiscoveryEvent::Added))
    });
    conn_guard.set_state(ConnectionState::Open);

    let heartbeat_timeout = state.config.heartbeat_timeout();
    let mut last_activity = Instant::now();

    // Delay mode skips missed ticks rather than bursting to catch up.
    let mut heartbeat_interval = tokio::time::interval(state.config.heartbeat_check_interval());
    heartbeat_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            // Handle force-close request
            _ = cancel_token.cancelled() => break Exit::ForceClosed,

            // Handle incoming messages from the client
            msg = receiver.next() => {
                last_activity = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        // Anything but a heartbeat is ignored
                        if let Ok(WsIncoming::Heartbeat) = serde_json::from_str::<WsIncoming>(&text) {
                            if let Some(ack) = WsOutgoing::HeartbeatAck.to_message() {
                                if let Err(e) = send(&mut sender, conn_id, ack).await {
                                    log::warn!("[WS] {}", e);
                                    break Exit::WriteFailed;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break Exit::ClientClosed,
                    _ => {}
                }
            }

            // Drain discovery events queued by the dispatcher
            next = queue.recv() => match next {
                Some(payload) => {
                    let msg = Message::Text(payload.to_string().into());
                    if let Err(e) = send(&mut sender, conn_id, msg).await {
                        log::warn!("[WS] {}", e);
                        break Exit::WriteFailed;
                    }
                }
                None => break Exit::QueueClosed,
            },

            // Heartbeat: a live peer answers the ping with a pong, which
            // counts as activity like any other inbound frame.
            _ = heartbeat_interval.tick() => {
                if last_activity.elapsed() > heartbeat_timeout {
                    break Exit::HeartbeatTimeout;
                }
                if let Err(e) = send(&mut sender, conn_id, Message::Ping(Bytes::new())).await {
                    log::warn!("[WS] {}", e);
                    break Exit::WriteFailed;
                }
            }
        }
    };

    conn_guard.set_state(ConnectionState::Closing);
    log::info!("[WS] {} ending: {:?}", conn_id, exit);

    let close = match exit {
        Exit::QueueClosed => Some(CloseFrame {
            code: close_code::POLICY,
            reason: Utf8Bytes::from_static("outbound queue overflow"),
        }),
        Exit::HeartbeatTimeout => Some(CloseFrame {
            code: close_code::AWAY,
            reason: Utf8Bytes::from_static("heartbeat timeout"),
        }),
        Exit::ForceClosed => Some(CloseFrame {
            code: close_code::AWAY,
            reason: Utf8Bytes::from_static("server shutting down"),
        }),
        Exit::ClientClosed | Exit::WriteFailed => None,
    };
    if let Some(frame) = close {
        let _ = sender.send(Message::Close(Some(frame))).await;
    }
    let _ = sender.close().await;

    // ConnectionGuard drop unsubscribes and removes the entry
}

async fn send(
    sender: &mut SplitSink<WebSocket, Message>,
    connection_id: ConnectionId,
    msg: Message,
) -> Result<(), TransportWriteError> {
    sender
        .send(msg)
        .await
        .map_err(|source| TransportWriteError {
            connection_id,
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_round_trips_as_screaming_snake_case() {
        assert!(matches!(
            serde_json::from_str::<WsIncoming>(r#"{"type":"HEARTBEAT"}"#),
            Ok(WsIncoming::Heartbeat)
        ));
        assert!(serde_json::from_str::<WsIncoming>(r#"{"type":"SUBSCRIBE"}"#).is_err());
        assert_eq!(
            serde_json::to_string(&WsOutgoing::HeartbeatAck).unwrap(),
            r#"{"type":"HEARTBEAT_ACK"}"#
        );
    }
}
