use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::connection::{Connection, ConnectionId};
use super::session::{DocumentSession, PendingReap};
use crate::config::{Config, DEFAULT_GRACE_PERIOD, DEFAULT_OUTBOUND_CAPACITY};
use crate::engine::EngineFactory;

/// Notified when the idle reaper discards a session.
///
/// This is where an external store can snapshot a document before its
/// in-memory state is dropped. The relay itself persists nothing.
#[async_trait]
pub trait SessionHook: Send + Sync {
    /// `state` is the session's final full-state encoding.
    async fn before_reap(&self, doc_id: &str, state: Vec<u8>);
}

/// Result of a reap attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    Removed,
    /// A connection arrived, the session was replaced, or the timer was
    /// cancelled; the session stays.
    Superseded,
}

/// Statistics about the relay
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RelayStats {
    pub active_sessions: usize,
    pub active_connections: usize,
}

/// Process-wide table of document sessions.
///
/// Lock order is always registry map first, then a session's own lock.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<DocumentSession>>>,
    engines: EngineFactory,
    grace_period: Duration,
    outbound_capacity: usize,
    hook: Option<Arc<dyn SessionHook>>,
}

impl SessionRegistry {
    pub fn new(engines: EngineFactory) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            engines,
            grace_period: DEFAULT_GRACE_PERIOD,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            hook: None,
        }
    }

    pub fn from_config(engines: EngineFactory, config: &Config) -> Self {
        Self::new(engines)
            .with_grace_period(config.grace_period)
            .with_outbound_capacity(config.outbound_capacity)
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn SessionHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Get the session for `id`, creating it if needed.
    ///
    /// Concurrent callers with the same `id` always get the same session.
    pub async fn get_or_create(&self, id: &str) -> Arc<DocumentSession> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(id) {
                return session.clone();
            }
        }

        let mut sessions = self.sessions.write().await;
        self.entry(&mut sessions, id)
    }

    fn entry(
        &self,
        sessions: &mut HashMap<String, Arc<DocumentSession>>,
        id: &str,
    ) -> Arc<DocumentSession> {
        // Double-check after acquiring write lock
        if let Some(session) = sessions.get(id) {
            return session.clone();
        }

        let session = Arc::new(DocumentSession::new(id, (self.engines)()));
        sessions.insert(id.to_string(), session.clone());
        info!("Created session for document: {}", id);
        session
    }

    /// Get an existing session without creating one.
    pub async fn get(&self, id: &str) -> Option<Arc<DocumentSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Attach a new connection to the session for `id`.
    ///
    /// The map lock is held until the connection is attached, so a reap
    /// can never remove the session between lookup and attach.
    pub async fn join(&self, id: &str) -> (Arc<DocumentSession>, Connection) {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(id) {
                let conn = session.attach(self.outbound_capacity).await;
                return (session.clone(), conn);
            }
        }

        let mut sessions = self.sessions.write().await;
        let session = self.entry(&mut sessions, id);
        let conn = session.attach(self.outbound_capacity).await;
        (session, conn)
    }

    /// Detach a connection; arm the idle reaper if it was the last one.
    pub async fn leave(self: &Arc<Self>, session: &Arc<DocumentSession>, id: ConnectionId) {
        let mut state = session.lock().await;
        if state.detach(id) {
            debug!(
                "Connection {} detached from {}, {} remaining",
                id,
                session.id(),
                state.connections.len()
            );
        }
        if !state.connections.is_empty() || state.pending_reap.is_some() {
            return;
        }

        state.reap_epoch += 1;
        let epoch = state.reap_epoch;
        let registry = Arc::clone(self);
        let target = Arc::clone(session);
        let grace_period = self.grace_period;

        let timer = tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            registry.reap(&target, epoch).await;
        })
        .abort_handle();

        state.pending_reap = Some(PendingReap { epoch, timer });
        debug!(
            "Session {} idle, reaping in {:?}",
            session.id(),
            self.grace_period
        );
    }

    /// Remove `id` only if it still maps to `expected` and has no connections.
    ///
    /// Losing the race to a new connection is not an error; the session is
    /// simply kept.
    pub async fn remove(&self, id: &str, expected: &Arc<DocumentSession>) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(current) = sessions.get(id) else {
            return false;
        };
        if !Arc::ptr_eq(current, expected) {
            return false;
        }

        let mut state = expected.lock().await;
        if !state.connections.is_empty() {
            return false;
        }
        if let Some(pending) = state.pending_reap.take() {
            pending.timer.abort();
        }
        drop(state);

        sessions.remove(id);
        info!("Removed session: {}", id);
        true
    }

    /// Timer body of the idle reaper.
    async fn reap(&self, session: &Arc<DocumentSession>, epoch: u64) -> ReapOutcome {
        let id = session.id();
        let final_state = {
            let mut sessions = self.sessions.write().await;
            let Some(current) = sessions.get(id) else {
                return ReapOutcome::Superseded;
            };
            if !Arc::ptr_eq(current, session) {
                return ReapOutcome::Superseded;
            }

            let mut state = session.lock().await;
            let armed = state.pending_reap.as_ref().map(|p| p.epoch) == Some(epoch);
            if !armed || !state.connections.is_empty() {
                debug!("Reap of {} superseded", id);
                return ReapOutcome::Superseded;
            }
            state.pending_reap = None;

            let final_state = self.hook.as_ref().map(|_| state.encode_full_state());
            drop(state);

            sessions.remove(id);
            final_state
        };

        info!("Reaped idle session: {}", id);

        if let (Some(hook), Some(state)) = (&self.hook, final_state) {
            hook.before_reap(id, state).await;
        }
        ReapOutcome::Removed
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Get statistics about the relay
    pub async fn stats(&self) -> RelayStats {
        let sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();

        let mut active_connections = 0;
        for session in &sessions {
            active_connections += session.connection_count().await;
        }

        RelayStats {
            active_sessions: sessions.len(),
            active_connections,
        }
    }
}
