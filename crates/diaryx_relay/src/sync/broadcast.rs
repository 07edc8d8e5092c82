use std::collections::HashMap;

use axum::body::Bytes;
use tracing::warn;

use super::connection::{ConnectionHandle, ConnectionId};

/// Outcome of one fan-out call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Connections the frame was queued for
    pub delivered: usize,
    /// Connections skipped because their queue was full or closed
    pub dropped: usize,
}

/// Queue `frame` for every connection except `exclude`.
///
/// Never waits on a peer. A peer whose queue is full is signalled to close
/// and skipped; delivery to the rest is unaffected.
pub(crate) fn fan_out(
    connections: &HashMap<ConnectionId, ConnectionHandle>,
    frame: &Bytes,
    exclude: Option<ConnectionId>,
) -> FanOut {
    let mut result = FanOut::default();

    for (id, handle) in connections {
        if Some(*id) == exclude {
            continue;
        }
        if handle.deliver(frame.clone()) {
            result.delivered += 1;
        } else {
            warn!("Dropping frame for slow or closed connection {}", id);
            result.dropped += 1;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::connection::{Connection, Outbound, connection_pair};

    fn peers(n: usize, capacity: usize) -> (Vec<Connection>, HashMap<ConnectionId, ConnectionHandle>) {
        let mut conns = Vec::new();
        let mut handles = HashMap::new();
        for _ in 0..n {
            let (conn, handle) = connection_pair(capacity);
            handles.insert(conn.id(), handle);
            conns.push(conn);
        }
        (conns, handles)
    }

    #[tokio::test]
    async fn test_excludes_sender() {
        let (mut conns, handles) = peers(3, 8);
        let sender = conns[0].id();

        let result = fan_out(&handles, &Bytes::from_static(b"x"), Some(sender));
        assert_eq!(result, FanOut { delivered: 2, dropped: 0 });

        assert!(conns[0].try_next_outbound().is_none());
        assert_eq!(conns[1].try_next_outbound().unwrap().as_ref(), b"x");
        assert_eq!(conns[2].try_next_outbound().unwrap().as_ref(), b"x");
    }

    #[tokio::test]
    async fn test_slow_peer_isolated() {
        let (mut conns, handles) = peers(2, 2);
        let slow = conns[0].id();

        // Fill only the slow peer's queue
        let slow_handle = &handles[&slow];
        assert!(slow_handle.deliver(Bytes::from_static(b"a")));
        assert!(slow_handle.deliver(Bytes::from_static(b"b")));

        let result = fan_out(&handles, &Bytes::from_static(b"c"), None);
        assert_eq!(result, FanOut { delivered: 1, dropped: 1 });
        assert_eq!(conns[1].try_next_outbound().unwrap().as_ref(), b"c");

        // The slow peer was told to go away
        assert_eq!(conns[0].next_outbound().await, Outbound::Evicted);
    }

    #[test]
    fn test_empty_session() {
        let handles = HashMap::new();
        assert_eq!(fan_out(&handles, &Bytes::from_static(b"x"), None), FanOut::default());
    }
}
