use std::collections::HashMap;

use axum::body::Bytes;

use crate::protocol::{PresenceEntry, PresenceUpdate};

/// Per-session presence state, last writer wins per client id.
///
/// Clocks are kept after a client is removed so that a late, stale update
/// for that client cannot bring it back.
#[derive(Debug, Default)]
pub struct PresenceTable {
    states: HashMap<u64, Bytes>,
    clocks: HashMap<u64, u64>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one entry. Returns `true` if it was fresher than what we hold.
    ///
    /// An entry whose clock is not strictly greater than the stored clock
    /// for the same client is dropped.
    pub fn apply(&mut self, entry: &PresenceEntry) -> bool {
        if let Some(&current) = self.clocks.get(&entry.client_id)
            && entry.clock <= current
        {
            return false;
        }

        self.clocks.insert(entry.client_id, entry.clock);
        match &entry.state {
            Some(state) => {
                self.states.insert(entry.client_id, state.clone());
            }
            None => {
                self.states.remove(&entry.client_id);
            }
        }
        true
    }

    /// Apply every entry, returning only the fresh ones.
    pub fn apply_update(&mut self, update: &PresenceUpdate) -> PresenceUpdate {
        PresenceUpdate::new(
            update
                .entries
                .iter()
                .filter(|entry| self.apply(entry))
                .cloned()
                .collect(),
        )
    }

    /// Remove a client, returning the removal entry to broadcast.
    ///
    /// `None` if the client had no live state.
    pub fn remove(&mut self, client_id: u64) -> Option<PresenceEntry> {
        self.states.remove(&client_id)?;
        let clock = self.clocks.get(&client_id).copied().unwrap_or(0) + 1;
        self.clocks.insert(client_id, clock);
        Some(PresenceEntry::removed(client_id, clock))
    }

    pub fn get(&self, client_id: u64) -> Option<&Bytes> {
        self.states.get(&client_id)
    }

    pub fn clock(&self, client_id: u64) -> Option<u64> {
        self.clocks.get(&client_id).copied()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Every live client, suitable for a joining connection.
    pub fn snapshot(&self) -> PresenceUpdate {
        let mut entries: Vec<_> = self
            .states
            .iter()
            .map(|(&client_id, state)| PresenceEntry {
                client_id,
                clock: self.clocks.get(&client_id).copied().unwrap_or(0),
                state: Some(state.clone()),
            })
            .collect();
        entries.sort_by_key(|e| e.client_id);
        PresenceUpdate::new(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(client_id: u64, clock: u64, state: &'static str) -> PresenceEntry {
        PresenceEntry::new(client_id, clock, Bytes::from_static(state.as_bytes()))
    }

    #[test]
    fn test_newer_clock_wins() {
        let mut table = PresenceTable::new();
        assert!(table.apply(&entry(1, 1, "a")));
        assert!(table.apply(&entry(1, 2, "b")));
        assert_eq!(table.get(1).unwrap().as_ref(), b"b");
    }

    #[test]
    fn test_stale_and_equal_clocks_dropped() {
        let mut table = PresenceTable::new();
        assert!(table.apply(&entry(1, 5, "five")));
        assert!(!table.apply(&entry(1, 3, "three")));
        assert!(!table.apply(&entry(1, 5, "other five")));
        assert_eq!(table.get(1).unwrap().as_ref(), b"five");
        assert_eq!(table.clock(1), Some(5));
    }

    #[test]
    fn test_order_independent() {
        let mut forward = PresenceTable::new();
        forward.apply(&entry(9, 1, "old"));
        forward.apply(&entry(9, 2, "new"));

        let mut reverse = PresenceTable::new();
        reverse.apply(&entry(9, 2, "new"));
        reverse.apply(&entry(9, 1, "old"));

        assert_eq!(forward.get(9), reverse.get(9));
        assert_eq!(forward.get(9).unwrap().as_ref(), b"new");
    }

    #[test]
    fn test_clients_are_independent() {
        let mut table = PresenceTable::new();
        table.apply(&entry(1, 10, "one"));
        assert!(table.apply(&entry(2, 1, "two")));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_apply_update_returns_fresh_subset() {
        let mut table = PresenceTable::new();
        table.apply(&entry(1, 5, "a"));

        let fresh = table.apply_update(&PresenceUpdate::new(vec![
            entry(1, 4, "stale"),
            entry(2, 1, "new client"),
        ]));
        assert_eq!(fresh.entries, vec![entry(2, 1, "new client")]);
    }

    #[test]
    fn test_remove_bumps_clock() {
        let mut table = PresenceTable::new();
        table.apply(&entry(3, 7, "cursor"));

        assert_eq!(table.remove(3), Some(PresenceEntry::removed(3, 8)));
        assert!(table.get(3).is_none());
        assert!(table.is_empty());

        // Already gone
        assert_eq!(table.remove(3), None);
    }

    #[test]
    fn test_stale_update_cannot_resurrect() {
        let mut table = PresenceTable::new();
        table.apply(&entry(3, 7, "cursor"));
        table.remove(3);

        assert!(!table.apply(&entry(3, 8, "late")));
        assert!(table.get(3).is_none());
        assert!(table.apply(&entry(3, 9, "back")));
    }

    #[test]
    fn test_removal_entry_applies() {
        let mut table = PresenceTable::new();
        table.apply(&entry(4, 1, "x"));
        assert!(table.apply(&PresenceEntry::removed(4, 2)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_snapshot_lists_live_clients() {
        let mut table = PresenceTable::new();
        table.apply(&entry(2, 1, "b"));
        table.apply(&entry(1, 3, "a"));
        table.apply(&entry(5, 1, "gone"));
        table.remove(5);

        let snapshot = table.snapshot();
        assert_eq!(snapshot.entries, vec![entry(1, 3, "a"), entry(2, 1, "b")]);
    }
}
