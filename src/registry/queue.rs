//! Matchmaking Queue
//!
//! FIFO of client identifiers waiting for a partner. Only the registry
//! mutates it, so membership always mirrors the set of waiting clients.

use std::collections::VecDeque;

use crate::registry::client::ClientId;

/// Ordered waiting list, head = longest waiting.
#[derive(Debug, Default)]
pub struct MatchQueue {
    entries: VecDeque<ClientId>,
}

impl MatchQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail unless already present. Returns true if inserted.
    pub fn push(&mut self, id: ClientId) -> bool {
        if self.contains(&id) {
            return false;
        }
        self.entries.push_back(id);
        true
    }

    /// Remove an identifier wherever it sits. Returns true if it was queued.
    pub fn remove(&mut self, id: &ClientId) -> bool {
        match self.entries.iter().position(|e| e == id) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Whether the identifier is queued.
    pub fn contains(&self, id: &ClientId) -> bool {
        self.entries.iter().any(|e| e == id)
    }

    /// Scan head-to-tail for the first entry other than `requester` accepted
    /// by `is_live`. Entries rejected by `is_live` are evicted on the way and
    /// returned alongside the match.
    pub fn claim_first<F>(&mut self, requester: &ClientId, mut is_live: F) -> (Option<ClientId>, Vec<ClientId>)
    where
        F: FnMut(&ClientId) -> bool,
    {
        let mut evicted = Vec::new();
        let mut idx = 0;

        while idx < self.entries.len() {
            if &self.entries[idx] == requester {
                idx += 1;
                continue;
            }
            if is_live(&self.entries[idx]) {
                let claimed = self.entries.remove(idx);
                return (claimed, evicted);
            }
            if let Some(stale) = self.entries.remove(idx) {
                evicted.push(stale);
            }
        }

        (None, evicted)
    }

    /// Number of queued identifiers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nobody is waiting.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate head first.
    pub fn iter(&self) -> impl Iterator<Item = &ClientId> {
        self.entries.iter()
    }
}
