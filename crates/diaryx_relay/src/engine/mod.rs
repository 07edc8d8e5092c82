//! Merge engine capability.
//!
//! The relay never interprets document updates. Each session owns one
//! [`MergeEngine`] and hands it the SYNC payloads it receives; the engine
//! decides whether an update carried new information and produces the full
//! state for late joiners.
//!
//! Engines must be CPU-local: no I/O, no blocking. The session calls them
//! while holding its lock.

mod concat;
#[cfg(feature = "yrs")]
mod yrs_engine;

use std::sync::Arc;

use crate::error::MergeError;

pub use concat::ConcatEngine;
#[cfg(feature = "yrs")]
pub use yrs_engine::YrsEngine;

/// Conflict-free state container for one document.
pub trait MergeEngine: Send + 'static {
    /// Apply an encoded update.
    ///
    /// Returns `Ok(None)` when the update carried nothing new (a replay or
    /// an empty update). On `Err` the state must be unchanged.
    fn apply_update(&mut self, update: &[u8]) -> Result<Option<Vec<u8>>, MergeError>;

    /// Encode the complete current state as a single update.
    fn encode_full_state(&self) -> Vec<u8>;

    /// Encode what a peer holding `peer_state` is missing.
    fn encode_diff(&self, peer_state: &[u8]) -> Result<Vec<u8>, MergeError>;
}

/// Builds a fresh engine for every newly created session.
pub type EngineFactory = Arc<dyn Fn() -> Box<dyn MergeEngine> + Send + Sync>;

/// Wrap a constructor into an [`EngineFactory`].
pub fn factory<E, F>(make: F) -> EngineFactory
where
    E: MergeEngine,
    F: Fn() -> E + Send + Sync + 'static,
{
    Arc::new(move || Box::new(make()) as Box<dyn MergeEngine>)
}

/// The engine the relay binary runs with.
pub fn default_factory() -> EngineFactory {
    #[cfg(feature = "yrs")]
    {
        factory(YrsEngine::new)
    }
    #[cfg(not(feature = "yrs"))]
    {
        factory(ConcatEngine::new)
    }
}
