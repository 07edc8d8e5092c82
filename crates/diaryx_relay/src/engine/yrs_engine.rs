use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, Snapshot, StateVector, Transact, Update};

use super::MergeEngine;
use crate::error::MergeError;

/// Yjs document as merge engine. SYNC payloads are v1-encoded updates.
pub struct YrsEngine {
    doc: Doc,
}

impl YrsEngine {
    pub fn new() -> Self {
        Self { doc: Doc::new() }
    }
}

impl Default for YrsEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything an update can change: integrated content, plus updates and
/// deletions held back until their dependencies arrive.
#[derive(PartialEq)]
struct Progress {
    snapshot: Snapshot,
    pending_update: Option<Vec<u8>>,
    pending_ds: Option<Vec<u8>>,
}

impl Progress {
    fn of<T: ReadTxn>(txn: &T) -> Self {
        let store = txn.store();
        Self {
            snapshot: txn.snapshot(),
            pending_update: store.pending_update().map(|p| p.update.encode_v1()),
            pending_ds: store.pending_ds().map(|ds| ds.encode_v1()),
        }
    }
}

impl MergeEngine for YrsEngine {
    fn apply_update(&mut self, update: &[u8]) -> Result<Option<Vec<u8>>, MergeError> {
        // Decode first so a malformed update never touches the document
        let decoded = Update::decode_v1(update)
            .map_err(|e| MergeError::MalformedUpdate(format!("Failed to decode update: {}", e)))?;

        let before = Progress::of(&self.doc.transact());
        let after = {
            let mut txn = self.doc.transact_mut();
            txn.apply_update(decoded)
                .map_err(|e| MergeError::MalformedUpdate(format!("Failed to apply update: {}", e)))?;
            Progress::of(&txn)
        };

        if before == after {
            Ok(None)
        } else {
            Ok(Some(update.to_vec()))
        }
    }

    fn encode_full_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    fn encode_diff(&self, peer_state: &[u8]) -> Result<Vec<u8>, MergeError> {
        let sv = StateVector::decode_v1(peer_state).map_err(|e| {
            MergeError::MalformedState(format!("Failed to decode state vector: {}", e))
        })?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }
}
