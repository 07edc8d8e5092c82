use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use axum::body::Bytes;
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

/// Identifies one attached client for the lifetime of its transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport accepted, document identifier being resolved
    Connecting,
    /// Attached to a session, initial state queued
    Handshaking,
    /// Exchanging frames
    Active,
    /// Detaching from the session
    Closing,
    Closed,
}

/// The session's side of a connection: where fan-out writes go.
#[derive(Debug)]
pub(crate) struct ConnectionHandle {
    outbound: mpsc::Sender<Bytes>,
    evict: Arc<Notify>,
    /// Presence client ids this connection has announced
    pub(crate) client_ids: HashSet<u64>,
}

impl ConnectionHandle {
    /// Queue a frame without waiting.
    ///
    /// A full queue means the peer is not keeping up; it is told to close
    /// and the frame is dropped. Returns whether the frame was queued.
    pub(crate) fn deliver(&self, frame: Bytes) -> bool {
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.evict.notify_one();
                false
            }
            // The handler is already on its way out
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// What a connection handler should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Bytes),
    /// A fan-out found the queue full; the peer is too slow to keep.
    Evicted,
    /// The session dropped this connection.
    Closed,
}

/// The handler's side of a connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    outbound: mpsc::Receiver<Bytes>,
    evict: Arc<Notify>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Wait for the next thing to write to the transport.
    ///
    /// Eviction takes priority over queued frames.
    pub async fn next_outbound(&mut self) -> Outbound {
        tokio::select! {
            biased;
            _ = self.evict.notified() => Outbound::Evicted,
            frame = self.outbound.recv() => match frame {
                Some(frame) => Outbound::Frame(frame),
                None => Outbound::Closed,
            },
        }
    }

    /// Take a queued frame without waiting, if any.
    pub fn try_next_outbound(&mut self) -> Option<Bytes> {
        self.outbound.try_recv().ok()
    }
}

/// Create both halves of a connection with a queue of `capacity` frames.
pub(crate) fn connection_pair(capacity: usize) -> (Connection, ConnectionHandle) {
    let (tx, rx) = mpsc::channel(capacity.max(2));
    let evict = Arc::new(Notify::new());
    let id = ConnectionId::new();

    (
        Connection {
            id,
            outbound: rx,
            evict: evict.clone(),
        },
        ConnectionHandle {
            outbound: tx,
            evict,
            client_ids: HashSet::new(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deliver_in_order() {
        let (mut conn, handle) = connection_pair(4);
        assert!(handle.deliver(Bytes::from_static(b"1")));
        assert!(handle.deliver(Bytes::from_static(b"2")));

        assert_eq!(conn.next_outbound().await, Outbound::Frame(Bytes::from_static(b"1")));
        assert_eq!(conn.next_outbound().await, Outbound::Frame(Bytes::from_static(b"2")));

        drop(handle);
        assert_eq!(conn.next_outbound().await, Outbound::Closed);
    }

    #[tokio::test]
    async fn test_full_queue_evicts() {
        let (mut conn, handle) = connection_pair(2);
        assert!(handle.deliver(Bytes::from_static(b"1")));
        assert!(handle.deliver(Bytes::from_static(b"2")));
        assert!(!handle.deliver(Bytes::from_static(b"3")));

        assert_eq!(conn.next_outbound().await, Outbound::Evicted);
    }

    #[tokio::test]
    async fn test_deliver_after_handler_gone() {
        let (conn, handle) = connection_pair(2);
        drop(conn);
        assert!(!handle.deliver(Bytes::from_static(b"1")));
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }
}
