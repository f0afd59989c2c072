//! Network Layer
//!
//! WebSocket transport, wire protocol and the session router that connects
//! them to the registry.

pub mod channel;
pub mod moderation;
pub mod protocol;
pub mod router;
pub mod server;
pub mod stats;

pub use channel::ClientChannel;
pub use moderation::{AllowAll, KeywordModerator, Moderator, Verdict};
pub use protocol::{ClientMessage, ProtocolError, ServerMessage, SignalPayload};
pub use router::{Disposition, SessionRouter};
pub use server::{SignalServer, SignalServerError};
pub use stats::{RelayStats, StatsSnapshot};
