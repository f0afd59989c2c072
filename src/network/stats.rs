//! Relay Statistics
//!
//! Counters updated by the router as traffic flows, plus a snapshot type that
//! combines them with live registry counts.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic relay counters.
#[derive(Debug, Default)]
pub struct RelayStats {
    connections_accepted: AtomicU64,
    sessions_started: AtomicU64,
    signals_relayed: AtomicU64,
    chats_relayed: AtomicU64,
    messages_dropped: AtomicU64,
    moderation_vetoes: AtomicU64,
}

impl RelayStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn signal_relayed(&self) {
        self.signals_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn chat_relayed(&self) {
        self.chats_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn moderation_veto(&self) {
        self.moderation_vetoes.fetch_add(1, Ordering::Relaxed);
    }

    /// Combine counters with live registry figures.
    pub fn snapshot(&self, connected: usize, waiting: usize, paired: usize) -> StatsSnapshot {
        StatsSnapshot {
            connected,
            waiting,
            active_sessions: paired / 2,
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            signals_relayed: self.signals_relayed.load(Ordering::Relaxed),
            chats_relayed: self.chats_relayed.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            moderation_vetoes: self.moderation_vetoes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Clients currently connected.
    pub connected: usize,
    /// Clients in the matchmaking queue.
    pub waiting: usize,
    /// Pairs currently in a session.
    pub active_sessions: usize,
    /// Connections accepted since start.
    pub connections_accepted: u64,
    /// Pairings made since start.
    pub sessions_started: u64,
    /// Offers, answers and ICE candidates forwarded.
    pub signals_relayed: u64,
    /// Chat messages forwarded.
    pub chats_relayed: u64,
    /// Inbound messages discarded (malformed, unpaired, undeliverable).
    pub messages_dropped: u64,
    /// Chat messages suppressed by moderation.
    pub moderation_vetoes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let stats = RelayStats::new();
        stats.connection_accepted();
        stats.connection_accepted();
        stats.session_started();
        stats.signal_relayed();
        stats.chat_relayed();
        stats.message_dropped();
        stats.moderation_veto();

        let snap = stats.snapshot(2, 0, 2);
        assert_eq!(snap.connected, 2);
        assert_eq!(snap.active_sessions, 1);
        assert_eq!(snap.connections_accepted, 2);
        assert_eq!(snap.sessions_started, 1);
        assert_eq!(snap.signals_relayed, 1);
        assert_eq!(snap.chats_relayed, 1);
        assert_eq!(snap.messages_dropped, 1);
        assert_eq!(snap.moderation_vetoes, 1);
    }
}
