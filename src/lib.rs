//! # Tandem Relay Server
//!
//! Pairs anonymous clients one-to-one and relays the signaling messages they
//! need to open a direct peer-to-peer media channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    TANDEM RELAY SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  registry/         - Who is connected, who is paired         │
//! │  ├── client.rs     - Client records and pairing state        │
//! │  └── queue.rs      - FIFO matchmaking queue                  │
//! │                                                              │
//! │  network/          - Transport and routing                   │
//! │  ├── protocol.rs   - Wire messages                           │
//! │  ├── router.rs     - Per-message state machine               │
//! │  ├── channel.rs    - Per-client outbound queue handle        │
//! │  ├── moderation.rs - Chat moderation hook                    │
//! │  ├── stats.rs      - Relay counters                          │
//! │  └── server.rs     - WebSocket server                        │
//! │                                                              │
//! │  config.rs         - Server configuration                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Session Lifecycle
//!
//! A client connects and is **idle**. `find-partner` makes it **waiting**
//! until another client asks too, then both are **paired**. `end-chat`
//! returns both to idle; closing the connection removes the client and
//! releases its partner. Media never passes through the server.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod network;
pub mod registry;

// Re-export commonly used types
pub use config::{ConfigError, ServerConfig};
pub use network::{ClientMessage, ServerMessage, SessionRouter, SignalServer};
pub use registry::{ClientId, MatchOutcome, Registry, RegistryError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
