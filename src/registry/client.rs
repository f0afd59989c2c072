//! Client Records
//!
//! One record per live connection: its identifier, its output channel and
//! where it stands in the pairing lifecycle.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::network::channel::ClientChannel;

/// Opaque per-connection identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading characters, for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Where a client stands in the pairing lifecycle.
///
/// The partner is held as a lookup key into the registry, never as a
/// reference to the other record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Pairing {
    /// Connected, not looking for a partner.
    #[default]
    Idle,
    /// Queued for matchmaking.
    Waiting,
    /// In a session with the given client.
    Paired(ClientId),
}

/// A connected client.
#[derive(Debug)]
pub struct Client {
    /// Connection identifier.
    pub id: ClientId,
    /// Output channel owned by this record.
    pub(crate) channel: ClientChannel,
    /// Pairing state.
    pub(crate) pairing: Pairing,
    /// When the connection was registered.
    pub connected_at: Instant,
}

impl Client {
    pub(crate) fn new(id: ClientId, channel: ClientChannel) -> Self {
        Self {
            id,
            channel,
            pairing: Pairing::Idle,
            connected_at: Instant::now(),
        }
    }

    /// Current pairing state.
    pub fn pairing(&self) -> &Pairing {
        &self.pairing
    }

    /// Partner identifier, if paired.
    pub fn partner_id(&self) -> Option<&ClientId> {
        match &self.pairing {
            Pairing::Paired(partner) => Some(partner),
            _ => None,
        }
    }

    /// Whether the client sits in the matchmaking queue.
    pub fn is_waiting(&self) -> bool {
        self.pairing == Pairing::Waiting
    }

    /// Whether the client's channel still accepts messages.
    pub fn is_reachable(&self) -> bool {
        self.channel.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = ClientId::generate();
        let b = ClientId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
        assert_eq!(a.short().len(), 8);
    }

    #[test]
    fn test_short_id_of_small_string() {
        assert_eq!(ClientId::from("X").short(), "X");
    }

    #[test]
    fn test_new_client_is_idle() {
        let (channel, _rx) = ClientChannel::pair(1);
        let client = Client::new(ClientId::from("X"), channel);
        assert_eq!(client.pairing(), &Pairing::Idle);
        assert!(client.partner_id().is_none());
        assert!(!client.is_waiting());
        assert!(client.is_reachable());
    }
}
