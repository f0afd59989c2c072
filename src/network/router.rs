//! Session Router
//!
//! Turns one inbound protocol message from one client into its effect on the
//! registry and the outbound messages it causes. Every call takes the registry
//! lock, does its work (deliveries included) and releases it, so operations
//! from different connections never interleave.
//!
//! | Kind                                  | Requires   | Outbound                                  |
//! |---------------------------------------|------------|-------------------------------------------|
//! | `find-partner`                        | registered | `partner-found` to both, or `waiting-for-partner` |
//! | `offer` / `answer` / `ice-candidate`  | paired     | same payload to partner                   |
//! | `chat-message`                        | paired     | text + server timestamp to partner        |
//! | `end-chat`                            | -          | `partner-disconnected` to former partner  |
//! | unknown                               | -          | none                                      |

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::network::channel::ClientChannel;
use crate::network::moderation::{AllowAll, Moderator, Verdict};
use crate::network::protocol::{ClientMessage, Requirement, ServerMessage};
use crate::network::stats::{RelayStats, StatsSnapshot};
use crate::registry::{ClientId, MatchOutcome, Registry, RegistryError};

/// What the transport should do with the connection after a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep reading.
    Continue,
    /// Close the connection.
    Close,
}

/// Standing of the sender once a message's requirement is satisfied.
#[derive(Debug)]
enum Admitted {
    Anyone,
    Registered,
    Paired(ClientId),
}

/// Dispatches protocol messages against the shared registry.
pub struct SessionRouter {
    registry: Mutex<Registry>,
    moderator: Arc<dyn Moderator>,
    stats: RelayStats,
}

impl SessionRouter {
    /// Create a router consulting `moderator` on chat messages.
    pub fn new(moderator: Arc<dyn Moderator>) -> Self {
        Self {
            registry: Mutex::new(Registry::new()),
            moderator,
            stats: RelayStats::new(),
        }
    }

    /// Register a new connection and greet it with its identifier.
    pub async fn connect(&self, channel: ClientChannel) -> Result<ClientId, RegistryError> {
        let id = ClientId::generate();
        let mut registry = self.registry.lock().await;

        registry.register(id.clone(), channel)?;
        registry.deliver(&id, ServerMessage::Connected { client_id: id.clone() });
        self.stats.connection_accepted();

        info!(client = %id.short(), connected = registry.len(), "client connected");
        Ok(id)
    }

    /// Remove a connection. Safe to call from any state, and more than once.
    pub async fn disconnect(&self, id: &ClientId) {
        let mut registry = self.registry.lock().await;

        let Some(connected_for) = registry.lookup(id).map(|c| c.connected_at.elapsed()) else {
            return;
        };
        let partner = registry.unregister(id);
        self.moderator.forget(id);

        match partner {
            Some(partner) => info!(
                client = %id.short(),
                partner = %partner.short(),
                secs = connected_for.as_secs(),
                "client disconnected mid-session"
            ),
            None => info!(client = %id.short(), secs = connected_for.as_secs(), "client disconnected"),
        }
    }

    /// Apply one inbound message from `id`.
    pub async fn dispatch(&self, id: &ClientId, message: ClientMessage) -> Disposition {
        let mut registry = self.registry.lock().await;
        let kind = message.kind();

        let Some(admitted) = Self::admit(&registry, id, message.requirement()) else {
            debug!(client = %id.short(), kind, "dropping message, precondition not met");
            self.stats.message_dropped();
            return Disposition::Continue;
        };

        match (message, admitted) {
            (ClientMessage::FindPartner, _) => self.find_partner(&mut registry, id),
            (ClientMessage::Offer(payload), Admitted::Paired(partner)) => {
                self.relay(&registry, id, &partner, ServerMessage::Offer(payload));
            }
            (ClientMessage::Answer(payload), Admitted::Paired(partner)) => {
                self.relay(&registry, id, &partner, ServerMessage::Answer(payload));
            }
            (ClientMessage::IceCandidate(payload), Admitted::Paired(partner)) => {
                self.relay(&registry, id, &partner, ServerMessage::IceCandidate(payload));
            }
            (ClientMessage::ChatMessage { message }, Admitted::Paired(partner)) => {
                return self.chat(&mut registry, id, &partner, message);
            }
            (ClientMessage::EndChat, _) => {
                if let Some(partner) = registry.end_session(id) {
                    info!(client = %id.short(), partner = %partner.short(), "session ended");
                }
            }
            (ClientMessage::Unknown, _) => {
                debug!(client = %id.short(), "ignoring unrecognized message type");
                self.stats.message_dropped();
            }
            (_, admitted) => {
                debug!(client = %id.short(), kind, ?admitted, "dropping message");
                self.stats.message_dropped();
            }
        }

        Disposition::Continue
    }

    /// Check the sender against a requirement.
    fn admit(registry: &Registry, id: &ClientId, requirement: Requirement) -> Option<Admitted> {
        match requirement {
            Requirement::Any => Some(Admitted::Anyone),
            Requirement::Registered => registry.lookup(id).map(|_| Admitted::Registered),
            Requirement::Paired => registry
                .partner_of(id)
                .map(|partner| Admitted::Paired(partner.id.clone())),
        }
    }

    fn find_partner(&self, registry: &mut Registry, id: &ClientId) {
        match registry.match_request(id) {
            MatchOutcome::Matched(partner) => {
                registry.deliver(id, ServerMessage::PartnerFound { partner_id: partner.clone() });
                registry.deliver(&partner, ServerMessage::PartnerFound { partner_id: id.clone() });
                self.stats.session_started();
                info!(client = %id.short(), partner = %partner.short(), "clients paired");
            }
            MatchOutcome::Waiting => {
                registry.deliver(id, ServerMessage::WaitingForPartner);
                debug!(client = %id.short(), queued = registry.waiting_count(), "waiting for partner");
            }
            MatchOutcome::AlreadyPaired(partner) => {
                registry.deliver(id, ServerMessage::PartnerFound { partner_id: partner });
            }
            MatchOutcome::Unknown => {
                self.stats.message_dropped();
            }
        }
    }

    fn relay(&self, registry: &Registry, from: &ClientId, to: &ClientId, message: ServerMessage) {
        let kind = message.kind();
        if registry.deliver(to, message) {
            self.stats.signal_relayed();
        } else {
            debug!(client = %from.short(), kind, "relay abandoned, partner unreachable");
            self.stats.message_dropped();
        }
    }

    fn chat(&self, registry: &mut Registry, from: &ClientId, to: &ClientId, text: String) -> Disposition {
        match self.moderator.review(from, &text) {
            Verdict::Allow => {}
            Verdict::Warn(reason) => {
                warn!(client = %from.short(), %reason, "chat message flagged");
            }
            Verdict::Block(reason) => {
                warn!(client = %from.short(), %reason, "chat message blocked");
                self.stats.moderation_veto();
                return Disposition::Continue;
            }
            Verdict::Disconnect(reason) => {
                warn!(client = %from.short(), %reason, "disconnecting client after moderation");
                self.stats.moderation_veto();
                registry.unregister(from);
                self.moderator.forget(from);
                return Disposition::Close;
            }
        }

        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        if registry.deliver(to, ServerMessage::ChatMessage { message: text, timestamp }) {
            self.stats.chat_relayed();
        } else {
            debug!(client = %from.short(), "chat abandoned, partner unreachable");
            self.stats.message_dropped();
        }
        Disposition::Continue
    }

    /// Count a frame the transport could not decode.
    pub fn record_malformed(&self) {
        self.stats.message_dropped();
    }

    /// Number of connected clients.
    pub async fn client_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Counters plus live registry figures.
    pub async fn stats(&self) -> StatsSnapshot {
        let registry = self.registry.lock().await;
        self.stats
            .snapshot(registry.len(), registry.waiting_count(), registry.paired_count())
    }
}

impl Default for SessionRouter {
    fn default() -> Self {
        Self::new(Arc::new(AllowAll))
    }
}
