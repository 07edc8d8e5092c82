use std::collections::HashMap;

use axum::body::Bytes;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::broadcast::{FanOut, fan_out};
use super::connection::{Connection, ConnectionHandle, ConnectionId, connection_pair};
use super::presence::PresenceTable;
use crate::engine::MergeEngine;
use crate::error::MergeError;
use crate::protocol::{PresenceEntry, PresenceUpdate, encode_sync};

/// Idle-reaper timer armed while a session has no connections.
#[derive(Debug)]
pub(crate) struct PendingReap {
    pub(crate) epoch: u64,
    pub(crate) timer: AbortHandle,
}

/// Everything behind a session's lock.
pub(crate) struct SessionState {
    engine: Box<dyn MergeEngine>,
    presence: PresenceTable,
    pub(crate) connections: HashMap<ConnectionId, ConnectionHandle>,
    pub(crate) pending_reap: Option<PendingReap>,
    /// Incremented each time the session goes idle
    pub(crate) reap_epoch: u64,
}

impl SessionState {
    fn new(engine: Box<dyn MergeEngine>) -> Self {
        Self {
            engine,
            presence: PresenceTable::new(),
            connections: HashMap::new(),
            pending_reap: None,
            reap_epoch: 0,
        }
    }

    pub(crate) fn encode_full_state(&self) -> Vec<u8> {
        self.engine.encode_full_state()
    }

    fn cancel_reap(&mut self) -> bool {
        match self.pending_reap.take() {
            Some(pending) => {
                pending.timer.abort();
                true
            }
            None => false,
        }
    }

    fn remove_presence(&mut self, client_id: u64) -> Option<PresenceEntry> {
        let removal = self.presence.remove(client_id)?;
        fan_out(
            &self.connections,
            &PresenceUpdate::new(vec![removal.clone()]).encode_frame(),
            None,
        );
        Some(removal)
    }

    /// Drop a connection and every presence entry it announced.
    pub(crate) fn detach(&mut self, id: ConnectionId) -> bool {
        let Some(handle) = self.connections.remove(&id) else {
            return false;
        };

        let mut client_ids: Vec<u64> = handle.client_ids.into_iter().collect();
        client_ids.sort_unstable();

        let removals: Vec<_> = client_ids
            .into_iter()
            .filter_map(|client_id| self.presence.remove(client_id))
            .collect();

        if !removals.is_empty() {
            debug!(
                "Connection {} left, clearing {} presence entries",
                id,
                removals.len()
            );
            fan_out(
                &self.connections,
                &PresenceUpdate::new(removals).encode_frame(),
                None,
            );
        }
        true
    }
}

/// In-memory record of one collaboratively edited document.
pub struct DocumentSession {
    id: String,
    state: Mutex<SessionState>,
}

impl DocumentSession {
    pub fn new(id: impl Into<String>, engine: Box<dyn MergeEngine>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(SessionState::new(engine)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) async fn lock(&self) -> tokio::sync::MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    // ==================== Document State ====================

    /// Apply an update to the merge engine.
    ///
    /// `Ok(None)` means the update carried nothing new and must not be
    /// rebroadcast.
    pub async fn apply_update(&self, update: &[u8]) -> Result<Option<Vec<u8>>, MergeError> {
        self.state.lock().await.engine.apply_update(update)
    }

    /// Encode the full document state (as sent to joining connections).
    pub async fn encode_full_state(&self) -> Vec<u8> {
        self.state.lock().await.encode_full_state()
    }

    /// Encode what a peer holding `peer_state` is missing.
    pub async fn encode_diff(&self, peer_state: &[u8]) -> Result<Vec<u8>, MergeError> {
        self.state.lock().await.engine.encode_diff(peer_state)
    }

    // ==================== Presence ====================

    /// Last-writer-wins presence merge for one client.
    ///
    /// Returns `false` when `clock` is not newer than what is stored.
    pub async fn apply_presence(&self, client_id: u64, state: Option<Bytes>, clock: u64) -> bool {
        let entry = PresenceEntry {
            client_id,
            clock,
            state,
        };
        self.state.lock().await.presence.apply(&entry)
    }

    /// Remove a client's presence and tell every connection about it.
    pub async fn remove_presence(&self, client_id: u64) -> Option<PresenceEntry> {
        self.state.lock().await.remove_presence(client_id)
    }

    /// Live presence entries.
    pub async fn presence_snapshot(&self) -> PresenceUpdate {
        self.state.lock().await.presence.snapshot()
    }

    // ==================== Relay ====================

    /// Queue `frame` for every attached connection except `exclude`.
    pub async fn broadcast(&self, frame: &Bytes, exclude: Option<ConnectionId>) -> FanOut {
        fan_out(&self.state.lock().await.connections, frame, exclude)
    }

    /// Apply a SYNC frame received from `from` and forward it verbatim.
    ///
    /// Returns `Ok(None)` for a no-op update (nothing forwarded).
    pub async fn relay_update(
        &self,
        from: ConnectionId,
        frame: &Bytes,
        payload: &[u8],
    ) -> Result<Option<FanOut>, MergeError> {
        let mut state = self.state.lock().await;
        match state.engine.apply_update(payload)? {
            Some(_) => Ok(Some(fan_out(&state.connections, frame, Some(from)))),
            None => {
                debug!("No-op update from {} on {}, not forwarding", from, self.id);
                Ok(None)
            }
        }
    }

    /// Merge a PRESENCE frame received from `from` and forward the fresh part.
    ///
    /// Stale entries are dropped silently. Returns the forwarded entries.
    pub async fn relay_presence(&self, from: ConnectionId, update: &PresenceUpdate) -> PresenceUpdate {
        let mut state = self.state.lock().await;
        let fresh = state.presence.apply_update(update);
        if fresh.is_empty() {
            return fresh;
        }

        if !state.connections.contains_key(&from) {
            warn!("Presence from detached connection {} on {}", from, self.id);
        }

        // The latest writer of a client id owns it, so only that
        // connection's departure removes the entry.
        for entry in &fresh.entries {
            for (id, handle) in state.connections.iter_mut() {
                if *id == from && entry.state.is_some() {
                    handle.client_ids.insert(entry.client_id);
                } else {
                    handle.client_ids.remove(&entry.client_id);
                }
            }
        }

        fan_out(&state.connections, &fresh.encode_frame(), Some(from));
        fresh
    }

    // ==================== Membership ====================

    /// Attach a new connection.
    ///
    /// Cancels any pending reap, then queues the full state and the presence
    /// table as the first two frames for the new connection.
    pub(crate) async fn attach(&self, capacity: usize) -> Connection {
        let (conn, handle) = connection_pair(capacity);
        let mut state = self.state.lock().await;

        if state.cancel_reap() {
            debug!("Connection {} revived idle session {}", conn.id(), self.id);
        }

        handle.deliver(encode_sync(&state.encode_full_state()));
        handle.deliver(state.presence.snapshot().encode_frame());
        state.connections.insert(conn.id(), handle);
        conn
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    pub async fn is_reap_pending(&self) -> bool {
        self.state.lock().await.pending_reap.is_some()
    }
}

impl std::fmt::Debug for DocumentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSession")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
