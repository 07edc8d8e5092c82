use std::collections::HashSet;

use super::MergeEngine;
use crate::error::MergeError;

/// Opaque-blob engine: state is every distinct update, concatenated in
/// arrival order.
///
/// It performs no merging at all, which makes it useful wherever relay
/// behaviour has to be observed independently of a real CRDT.
#[derive(Debug, Default)]
pub struct ConcatEngine {
    state: Vec<u8>,
    seen: HashSet<Vec<u8>>,
}

impl ConcatEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct updates applied so far.
    pub fn update_count(&self) -> usize {
        self.seen.len()
    }
}

impl MergeEngine for ConcatEngine {
    fn apply_update(&mut self, update: &[u8]) -> Result<Option<Vec<u8>>, MergeError> {
        if update.is_empty() || self.seen.contains(update) {
            return Ok(None);
        }
        self.seen.insert(update.to_vec());
        self.state.extend_from_slice(update);
        Ok(Some(update.to_vec()))
    }

    fn encode_full_state(&self) -> Vec<u8> {
        self.state.clone()
    }

    fn encode_diff(&self, peer_state: &[u8]) -> Result<Vec<u8>, MergeError> {
        match self.state.strip_prefix(peer_state) {
            Some(missing) => Ok(missing.to_vec()),
            None => Ok(self.state.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_appends() {
        let mut engine = ConcatEngine::new();
        assert_eq!(engine.apply_update(b"U1").unwrap(), Some(b"U1".to_vec()));
        assert_eq!(engine.apply_update(b"U2").unwrap(), Some(b"U2".to_vec()));
        assert_eq!(engine.encode_full_state(), b"U1U2".to_vec());
        assert_eq!(engine.update_count(), 2);
    }

    #[test]
    fn test_replay_is_noop() {
        let mut engine = ConcatEngine::new();
        engine.apply_update(b"U1").unwrap();
        assert_eq!(engine.apply_update(b"U1").unwrap(), None);
        assert_eq!(engine.encode_full_state(), b"U1".to_vec());
    }

    #[test]
    fn test_empty_update_is_noop() {
        let mut engine = ConcatEngine::new();
        assert_eq!(engine.apply_update(b"").unwrap(), None);
        assert!(engine.encode_full_state().is_empty());
    }

    #[test]
    fn test_encode_diff() {
        let mut engine = ConcatEngine::new();
        engine.apply_update(b"abc").unwrap();
        engine.apply_update(b"def").unwrap();

        assert_eq!(engine.encode_diff(b"abc").unwrap(), b"def".to_vec());
        assert_eq!(engine.encode_diff(b"").unwrap(), b"abcdef".to_vec());
        // Divergent peer gets everything
        assert_eq!(engine.encode_diff(b"xyz").unwrap(), b"abcdef".to_vec());
    }
}
