use crate::error::RelayError;
use crate::protocol::Frame;
use crate::shutdown::ShutdownListener;
use crate::sync::{ConnectionId, ConnectionState, DocumentSession, Outbound, SessionRegistry};
use axum::{
    body::Bytes,
    extract::{
        Path, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info, warn};

/// Document served when the request path carries no identifier.
pub const DEFAULT_DOCUMENT_ID: &str = "default";

/// Shared state for WebSocket handler
#[derive(Clone)]
pub struct WsState {
    pub registry: Arc<SessionRegistry>,
    pub keepalive_interval: Duration,
    pub shutdown: ShutdownListener,
}

/// Extract the document identifier from a request path: its final
/// non-empty segment.
pub fn document_id_from_path(path: &str) -> Result<String, RelayError> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let segment = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .trim();

    if segment.is_empty() {
        Err(RelayError::InvalidTarget(path.to_string()))
    } else {
        Ok(segment.to_string())
    }
}

/// Resolve the document for a request, falling back to
/// [`DEFAULT_DOCUMENT_ID`] for lightly malformed clients.
pub fn resolve_document_id(path: &str) -> String {
    document_id_from_path(path).unwrap_or_else(|e| {
        debug!("{}, using default document", e);
        DEFAULT_DOCUMENT_ID.to_string()
    })
}

/// WebSocket upgrade handler for `/`
pub async fn ws_root_handler(State(state): State<WsState>, ws: WebSocketUpgrade) -> Response {
    upgrade(ws, state, "")
}

/// WebSocket upgrade handler for `/{*path}`
pub async fn ws_document_handler(
    State(state): State<WsState>,
    Path(path): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    upgrade(ws, state, &path)
}

fn upgrade(ws: WebSocketUpgrade, state: WsState, path: &str) -> Response {
    let doc_id = resolve_document_id(path);
    debug!(
        "WebSocket upgrade: document={}, state={:?}",
        doc_id,
        ConnectionState::Connecting
    );

    ws.on_upgrade(move |socket| handle_socket(socket, state, doc_id))
        .into_response()
}

fn transition(id: ConnectionId, from: ConnectionState, to: ConnectionState) -> ConnectionState {
    debug!("Connection {}: {:?} -> {:?}", id, from, to);
    to
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, mut state: WsState, doc_id: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    if state.shutdown.is_triggered() {
        let _ = ws_tx.send(Message::Close(Some(shutdown_frame()))).await;
        return;
    }

    let (session, mut conn) = state.registry.join(&doc_id).await;
    let id = conn.id();
    let mut phase = transition(id, ConnectionState::Connecting, ConnectionState::Handshaking);

    info!(
        "WebSocket connected: connection={}, document={}, connections={}",
        id,
        doc_id,
        session.connection_count().await
    );

    // The handshake frames are already first in the outbound queue
    phase = transition(id, phase, ConnectionState::Active);

    let period = state.keepalive_interval;
    let mut keepalive = interval_at(Instant::now() + period, period);
    let mut awaiting_pong = false;

    let outcome: Result<(), RelayError> = loop {
        tokio::select! {
            // Handle incoming messages from client
            inbound = ws_rx.next() => match inbound {
                Some(Ok(Message::Binary(data))) => {
                    if let Err(e) = handle_frame(&session, id, data).await {
                        break Err(e);
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                        break Err(e.into());
                    }
                }
                Some(Ok(Message::Pong(_))) => awaiting_pong = false,
                Some(Ok(Message::Text(_))) => debug!("Ignoring text frame from {}", id),
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Client {} requested close", id);
                    break Ok(());
                }
                Some(Err(e)) => break Err(e.into()),
            },

            // Frames fanned out by other connections
            outbound = conn.next_outbound() => match outbound {
                Outbound::Frame(frame) => {
                    if let Err(e) = ws_tx.send(Message::Binary(frame)).await {
                        break Err(e.into());
                    }
                }
                Outbound::Evicted => break Err(RelayError::SlowConsumer),
                Outbound::Closed => break Ok(()),
            },

            _ = keepalive.tick() => {
                if awaiting_pong {
                    break Err(RelayError::KeepaliveTimeout);
                }
                awaiting_pong = true;
                if let Err(e) = ws_tx.send(Message::Ping(Bytes::new())).await {
                    break Err(e.into());
                }
            }

            _ = state.shutdown.triggered() => {
                let _ = ws_tx.send(Message::Close(Some(shutdown_frame()))).await;
                break Ok(());
            }
        }
    };

    phase = transition(id, phase, ConnectionState::Closing);
    if let Err(e) = &outcome {
        warn!("Closing connection {} on {}: {}", id, doc_id, e);
    }

    state.registry.leave(&session, id).await;
    let _ = ws_tx.close().await;

    transition(id, phase, ConnectionState::Closed);
    info!("WebSocket disconnected: connection={}, document={}", id, doc_id);
}

/// Decode one binary frame and apply it to the session.
async fn handle_frame(
    session: &DocumentSession,
    from: ConnectionId,
    data: Bytes,
) -> Result<(), RelayError> {
    match Frame::decode(&data)? {
        Frame::Sync(payload) => {
            session.relay_update(from, &data, &payload).await?;
        }
        Frame::Presence(update) => {
            session.relay_presence(from, &update).await;
        }
        Frame::Unknown(tag) => {
            warn!("Ignoring frame with unknown type {} from {}", tag, from);
        }
    }
    Ok(())
}

fn shutdown_frame() -> CloseFrame {
    CloseFrame {
        code: close_code::AWAY,
        reason: "server shutting down".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_segment() {
        assert_eq!(document_id_from_path("doc-1").unwrap(), "doc-1");
        assert_eq!(document_id_from_path("notes/doc-1").unwrap(), "doc-1");
        assert_eq!(document_id_from_path("notes/doc-1/").unwrap(), "doc-1");
        assert_eq!(document_id_from_path("/doc-1?token=abc").unwrap(), "doc-1");
    }

    #[test]
    fn test_empty_target_is_invalid() {
        assert!(matches!(
            document_id_from_path(""),
            Err(RelayError::InvalidTarget(_))
        ));
        assert!(matches!(
            document_id_from_path("///"),
            Err(RelayError::InvalidTarget(_))
        ));
        assert!(matches!(
            document_id_from_path("  /"),
            Err(RelayError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_fallback_to_default() {
        assert_eq!(resolve_document_id(""), DEFAULT_DOCUMENT_ID);
        assert_eq!(resolve_document_id("?x=1"), DEFAULT_DOCUMENT_ID);
        assert_eq!(resolve_document_id("doc-2"), "doc-2");
    }
}
