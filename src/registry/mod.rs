//! Connection Registry
//!
//! Single source of truth for which clients are connected and how they are
//! paired. Owns the client table and the matchmaking queue; callers only see
//! the operations below, never the raw collections.
//!
//! All methods are synchronous and run to completion. The router serializes
//! access behind one lock, which makes the scan-and-claim step in
//! [`Registry::match_request`] atomic.

pub mod client;
pub mod queue;

use std::collections::BTreeMap;

use tracing::debug;

use crate::network::channel::ClientChannel;
use crate::network::protocol::ServerMessage;

pub use client::{Client, ClientId, Pairing};
pub use queue::MatchQueue;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Identifier already registered.
    #[error("client {0} is already registered")]
    DuplicateClient(ClientId),
}

/// Result of a matchmaking request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Requester is not registered.
    Unknown,
    /// Requester is queued, nobody eligible yet.
    Waiting,
    /// Requester was paired with this client.
    Matched(ClientId),
    /// Requester already had this partner; nothing changed.
    AlreadyPaired(ClientId),
}

/// Live clients plus the matchmaking queue.
#[derive(Debug, Default)]
pub struct Registry {
    clients: BTreeMap<ClientId, Client>,
    queue: MatchQueue,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an idle client.
    pub fn register(&mut self, id: ClientId, channel: ClientChannel) -> Result<(), RegistryError> {
        if self.clients.contains_key(&id) {
            return Err(RegistryError::DuplicateClient(id));
        }
        self.clients.insert(id.clone(), Client::new(id, channel));
        Ok(())
    }

    /// Remove a client, purging it from the queue and releasing its partner.
    ///
    /// The partner, if any, becomes idle and is sent `partner-disconnected`.
    /// Returns the former partner. Unknown ids are a no-op.
    pub fn unregister(&mut self, id: &ClientId) -> Option<ClientId> {
        let client = self.clients.remove(id)?;
        self.queue.remove(id);

        match client.pairing {
            Pairing::Paired(partner) => {
                self.release(&partner, id);
                Some(partner)
            }
            Pairing::Waiting | Pairing::Idle => None,
        }
    }

    /// Look up a client.
    pub fn lookup(&self, id: &ClientId) -> Option<&Client> {
        self.clients.get(id)
    }

    /// The client's partner, if paired.
    pub fn partner_of(&self, id: &ClientId) -> Option<&Client> {
        let partner = self.clients.get(id)?.partner_id()?;
        self.clients.get(partner)
    }

    /// Tear down the client's session, leaving both sides registered and idle.
    ///
    /// The partner is sent `partner-disconnected`. Returns the former partner;
    /// a client that is not paired is left untouched.
    pub fn end_session(&mut self, id: &ClientId) -> Option<ClientId> {
        let client = self.clients.get_mut(id)?;
        let partner = client.partner_id()?.clone();
        client.pairing = Pairing::Idle;

        self.release(&partner, id);
        Some(partner)
    }

    /// Enter matchmaking and try to pair with the longest-waiting live client.
    pub fn match_request(&mut self, id: &ClientId) -> MatchOutcome {
        let Some(client) = self.clients.get_mut(id) else {
            return MatchOutcome::Unknown;
        };

        if let Some(partner) = client.partner_id() {
            return MatchOutcome::AlreadyPaired(partner.clone());
        }
        if client.pairing == Pairing::Idle {
            client.pairing = Pairing::Waiting;
            self.queue.push(id.clone());
        }

        let clients = &self.clients;
        let (claimed, evicted) = self.queue.claim_first(id, |candidate| {
            clients
                .get(candidate)
                .is_some_and(|c| c.is_waiting() && c.is_reachable())
        });

        for stale in evicted {
            if let Some(c) = self.clients.get_mut(&stale) {
                if c.is_waiting() {
                    c.pairing = Pairing::Idle;
                }
            }
            debug!("evicted stale queue entry {}", stale.short());
        }

        let Some(partner) = claimed else {
            return MatchOutcome::Waiting;
        };

        self.queue.remove(id);
        if let Some(c) = self.clients.get_mut(id) {
            c.pairing = Pairing::Paired(partner.clone());
        }
        if let Some(p) = self.clients.get_mut(&partner) {
            p.pairing = Pairing::Paired(id.clone());
        }

        MatchOutcome::Matched(partner)
    }

    /// Queue a message on a client's channel. Returns whether it was accepted.
    pub fn deliver(&self, id: &ClientId, message: ServerMessage) -> bool {
        match self.clients.get(id) {
            Some(client) => client.channel.deliver(message),
            None => {
                debug!("no client {} for {}", id.short(), message.kind());
                false
            }
        }
    }

    /// Clear `partner`'s pairing if it points back at `from`, and notify it.
    fn release(&mut self, partner: &ClientId, from: &ClientId) {
        let Some(p) = self.clients.get_mut(partner) else {
            return;
        };
        if p.partner_id() != Some(from) {
            return;
        }
        p.pairing = Pairing::Idle;
        if !p.channel.deliver(ServerMessage::PartnerDisconnected) {
            debug!("partner-disconnected not delivered to {}", partner.short());
        }
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no clients are registered.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Number of queued clients.
    pub fn waiting_count(&self) -> usize {
        self.queue.len()
    }

    /// Number of clients currently in a session.
    pub fn paired_count(&self) -> usize {
        self.clients.values().filter(|c| c.partner_id().is_some()).count()
    }

    /// Snapshot of the queue, head first.
    pub fn queued_ids(&self) -> Vec<ClientId> {
        self.queue.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::{BTreeSet, HashMap};
    use tokio::sync::mpsc;

    fn id(s: &str) -> ClientId {
        ClientId::from(s)
    }

    fn register(registry: &mut Registry, name: &str) -> mpsc::Receiver<ServerMessage> {
        let (channel, rx) = ClientChannel::pair(16);
        registry.register(id(name), channel).unwrap();
        rx
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    /// Queue mirrors waiting flags, no duplicates, pairings symmetric.
    fn assert_invariants(registry: &Registry) {
        let queued = registry.queued_ids();
        let unique: BTreeSet<_> = queued.iter().cloned().collect();
        assert_eq!(unique.len(), queued.len(), "duplicate queue entries");

        let waiting: BTreeSet<_> = registry
            .clients
            .values()
            .filter(|c| c.is_waiting())
            .map(|c| c.id.clone())
            .collect();
        assert_eq!(unique, waiting, "queue membership differs from waiting set");

        for client in registry.clients.values() {
            if let Some(partner) = client.partner_id() {
                let other = registry.lookup(partner).expect("partner must be registered");
                assert_eq!(other.partner_id(), Some(&client.id), "asymmetric pairing");
                assert!(!unique.contains(&client.id));
            }
        }
    }

    #[test]
    fn test_register_creates_idle_client() {
        let mut registry = Registry::new();
        let _rx = register(&mut registry, "X");

        let client = registry.lookup(&id("X")).unwrap();
        assert_eq!(client.pairing(), &Pairing::Idle);
        assert!(registry.partner_of(&id("X")).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_register_is_rejected() {
        let mut registry = Registry::new();
        let _rx = register(&mut registry, "X");
        let (channel, _rx2) = ClientChannel::pair(1);
        assert_eq!(
            registry.register(id("X"), channel),
            Err(RegistryError::DuplicateClient(id("X")))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_unknown() {
        let registry = Registry::new();
        assert!(registry.lookup(&id("nobody")).is_none());
        assert!(registry.partner_of(&id("nobody")).is_none());
    }

    #[test]
    fn test_match_request_unknown_client() {
        let mut registry = Registry::new();
        assert_eq!(registry.match_request(&id("ghost")), MatchOutcome::Unknown);
        assert!(registry.queued_ids().is_empty());
    }

    #[test]
    fn test_first_request_waits() {
        let mut registry = Registry::new();
        let _rx = register(&mut registry, "X");

        assert_eq!(registry.match_request(&id("X")), MatchOutcome::Waiting);
        assert!(registry.lookup(&id("X")).unwrap().is_waiting());
        assert_eq!(registry.queued_ids(), vec![id("X")]);
        assert_invariants(&registry);
    }

    #[test]
    fn test_repeated_request_does_not_duplicate() {
        let mut registry = Registry::new();
        let _rx = register(&mut registry, "X");

        registry.match_request(&id("X"));
        assert_eq!(registry.match_request(&id("X")), MatchOutcome::Waiting);
        assert_eq!(registry.queued_ids(), vec![id("X")]);
    }

    #[test]
    fn test_second_request_pairs() {
        let mut registry = Registry::new();
        let _x = register(&mut registry, "X");
        let _y = register(&mut registry, "Y");

        registry.match_request(&id("X"));
        assert_eq!(registry.match_request(&id("Y")), MatchOutcome::Matched(id("X")));

        assert_eq!(registry.partner_of(&id("X")).unwrap().id, id("Y"));
        assert_eq!(registry.partner_of(&id("Y")).unwrap().id, id("X"));
        assert!(registry.queued_ids().is_empty());
        assert_eq!(registry.paired_count(), 2);
        assert_invariants(&registry);
    }

    #[test]
    fn test_request_while_paired_is_idempotent() {
        let mut registry = Registry::new();
        let _x = register(&mut registry, "X");
        let _y = register(&mut registry, "Y");
        registry.match_request(&id("X"));
        registry.match_request(&id("Y"));

        assert_eq!(registry.match_request(&id("X")), MatchOutcome::AlreadyPaired(id("Y")));
        assert!(registry.queued_ids().is_empty());
        assert_invariants(&registry);
    }

    #[test]
    fn test_pairs_with_longest_waiting() {
        let mut registry = Registry::new();
        let a_rx = register(&mut registry, "A");
        registry.match_request(&id("A"));
        drop(a_rx);
        let _b = register(&mut registry, "B");
        registry.match_request(&id("B"));

        let _a2 = register(&mut registry, "A2");
        let _c = register(&mut registry, "C");
        registry.match_request(&id("A2"));
        assert_eq!(registry.lookup(&id("A2")).unwrap().partner_id(), Some(&id("B")));
        registry.match_request(&id("C"));
        assert!(registry.lookup(&id("C")).unwrap().is_waiting());
        assert_invariants(&registry);
    }

    #[test]
    fn test_stale_entries_are_evicted() {
        let mut registry = Registry::new();
        let x_rx = register(&mut registry, "X");
        registry.match_request(&id("X"));
        drop(x_rx);

        let _y = register(&mut registry, "Y");
        assert_eq!(registry.match_request(&id("Y")), MatchOutcome::Waiting);

        assert_eq!(registry.queued_ids(), vec![id("Y")]);
        assert_eq!(registry.lookup(&id("X")).unwrap().pairing(), &Pairing::Idle);
        assert_invariants(&registry);
    }

    #[test]
    fn test_unregister_paired_notifies_partner() {
        let mut registry = Registry::new();
        let mut x = register(&mut registry, "X");
        let _y = register(&mut registry, "Y");
        registry.match_request(&id("X"));
        registry.match_request(&id("Y"));

        assert_eq!(registry.unregister(&id("Y")), Some(id("X")));
        assert_eq!(drain(&mut x), vec![ServerMessage::PartnerDisconnected]);
        assert_eq!(registry.lookup(&id("X")).unwrap().pairing(), &Pairing::Idle);
        assert!(registry.lookup(&id("Y")).is_none());
        assert_invariants(&registry);
    }

    #[test]
    fn test_unregister_waiting_purges_queue() {
        let mut registry = Registry::new();
        let _x = register(&mut registry, "X");
        registry.match_request(&id("X"));

        assert_eq!(registry.unregister(&id("X")), None);
        assert!(registry.queued_ids().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let mut registry = Registry::new();
        let _x = register(&mut registry, "X");
        registry.unregister(&id("X"));
        assert_eq!(registry.unregister(&id("X")), None);
        assert_eq!(registry.unregister(&id("never")), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_with_closed_partner_channel() {
        let mut registry = Registry::new();
        let x = register(&mut registry, "X");
        let _y = register(&mut registry, "Y");
        registry.match_request(&id("X"));
        registry.match_request(&id("Y"));
        drop(x);

        assert_eq!(registry.unregister(&id("Y")), Some(id("X")));
        assert_eq!(registry.lookup(&id("X")).unwrap().pairing(), &Pairing::Idle);
    }

    #[test]
    fn test_end_session_leaves_both_idle() {
        let mut registry = Registry::new();
        let mut x = register(&mut registry, "X");
        let mut y = register(&mut registry, "Y");
        registry.match_request(&id("X"));
        registry.match_request(&id("Y"));

        assert_eq!(registry.end_session(&id("X")), Some(id("Y")));
        assert_eq!(drain(&mut y), vec![ServerMessage::PartnerDisconnected]);
        assert!(drain(&mut x).is_empty());
        assert_eq!(registry.lookup(&id("X")).unwrap().pairing(), &Pairing::Idle);
        assert_eq!(registry.lookup(&id("Y")).unwrap().pairing(), &Pairing::Idle);
        assert!(registry.queued_ids().is_empty());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_end_session_when_not_paired() {
        let mut registry = Registry::new();
        let _x = register(&mut registry, "X");
        assert_eq!(registry.end_session(&id("X")), None);

        registry.match_request(&id("X"));
        assert_eq!(registry.end_session(&id("X")), None);
        assert!(registry.lookup(&id("X")).unwrap().is_waiting());
        assert_eq!(registry.end_session(&id("ghost")), None);
        assert_invariants(&registry);
    }

    #[test]
    fn test_rematch_after_end_session() {
        let mut registry = Registry::new();
        let _x = register(&mut registry, "X");
        let _y = register(&mut registry, "Y");
        registry.match_request(&id("X"));
        registry.match_request(&id("Y"));
        registry.end_session(&id("Y"));

        assert_eq!(registry.match_request(&id("Y")), MatchOutcome::Waiting);
        assert_eq!(registry.match_request(&id("X")), MatchOutcome::Matched(id("Y")));
        assert_invariants(&registry);
    }

    #[test]
    fn test_deliver_to_unknown_client() {
        let registry = Registry::new();
        assert!(!registry.deliver(&id("ghost"), ServerMessage::WaitingForPartner));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Register(u8),
        Match(u8),
        End(u8),
        Unregister(u8),
        CloseChannel(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let slot = 0u8..6;
        prop_oneof![
            slot.clone().prop_map(Op::Register),
            slot.clone().prop_map(Op::Match),
            slot.clone().prop_map(Op::End),
            slot.clone().prop_map(Op::Unregister),
            slot.prop_map(Op::CloseChannel),
        ]
    }

    proptest! {
        #[test]
        fn prop_registry_invariants_hold(ops in prop::collection::vec(op_strategy(), 1..80)) {
            let mut registry = Registry::new();
            let mut receivers: HashMap<u8, mpsc::Receiver<ServerMessage>> = HashMap::new();

            for op in ops {
                match op {
                    Op::Register(n) => {
                        let (channel, rx) = ClientChannel::pair(64);
                        if registry.register(id(&n.to_string()), channel).is_ok() {
                            receivers.insert(n, rx);
                        }
                    }
                    Op::Match(n) => {
                        registry.match_request(&id(&n.to_string()));
                    }
                    Op::End(n) => {
                        registry.end_session(&id(&n.to_string()));
                    }
                    Op::Unregister(n) => {
                        registry.unregister(&id(&n.to_string()));
                        receivers.remove(&n);
                        // Second call must be a no-op.
                        let before = registry.queued_ids();
                        prop_assert_eq!(registry.unregister(&id(&n.to_string())), None);
                        prop_assert_eq!(registry.queued_ids(), before);
                    }
                    Op::CloseChannel(n) => {
                        receivers.remove(&n);
                    }
                }
                assert_invariants(&registry);
            }
        }
    }
}
