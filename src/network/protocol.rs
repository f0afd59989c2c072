//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame carries one JSON object with a required string `type` field.
//! Session-establishment payloads (`offer`, `answer`, `ice-candidate`) are
//! opaque to the server and relayed field-for-field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::registry::ClientId;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Enter matchmaking.
    FindPartner,

    /// SDP offer for the partner.
    Offer(SignalPayload),

    /// SDP answer for the partner.
    Answer(SignalPayload),

    /// ICE candidate for the partner.
    IceCandidate(SignalPayload),

    /// Text chat for the partner.
    ChatMessage {
        /// Message body.
        message: String,
    },

    /// Leave the current session.
    EndChat,

    /// Any `type` this server does not know.
    #[serde(other)]
    Unknown,
}

/// What a client must be for a message kind to take effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// No precondition.
    Any,
    /// Sender must be registered.
    Registered,
    /// Sender must have a live partner.
    Paired,
}

impl ClientMessage {
    /// Kebab-case kind name, as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::FindPartner => "find-partner",
            ClientMessage::Offer(_) => "offer",
            ClientMessage::Answer(_) => "answer",
            ClientMessage::IceCandidate(_) => "ice-candidate",
            ClientMessage::ChatMessage { .. } => "chat-message",
            ClientMessage::EndChat => "end-chat",
            ClientMessage::Unknown => "unknown",
        }
    }

    /// Precondition checked by the router before dispatch.
    pub fn requirement(&self) -> Requirement {
        match self {
            ClientMessage::FindPartner => Requirement::Registered,
            ClientMessage::Offer(_)
            | ClientMessage::Answer(_)
            | ClientMessage::IceCandidate(_)
            | ClientMessage::ChatMessage { .. } => Requirement::Paired,
            ClientMessage::EndChat | ClientMessage::Unknown => Requirement::Any,
        }
    }
}

/// Opaque signaling body. Every field except `type` is preserved as received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalPayload {
    /// Raw fields of the message.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SignalPayload {
    /// Look up one field of the payload.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// First frame on every connection.
    #[serde(rename_all = "camelCase")]
    Connected {
        /// Identifier assigned to this connection.
        client_id: ClientId,
    },

    /// Queued, no partner available yet.
    WaitingForPartner,

    /// Paired with another client.
    #[serde(rename_all = "camelCase")]
    PartnerFound {
        /// The partner's identifier.
        partner_id: ClientId,
    },

    /// Relayed SDP offer.
    Offer(SignalPayload),

    /// Relayed SDP answer.
    Answer(SignalPayload),

    /// Relayed ICE candidate.
    IceCandidate(SignalPayload),

    /// Relayed chat text, stamped by the server.
    ChatMessage {
        /// Message body.
        message: String,
        /// ISO-8601 UTC relay time.
        timestamp: String,
    },

    /// The partner left or ended the session.
    PartnerDisconnected,
}

impl ServerMessage {
    /// Kebab-case kind name, as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "connected",
            ServerMessage::WaitingForPartner => "waiting-for-partner",
            ServerMessage::PartnerFound { .. } => "partner-found",
            ServerMessage::Offer(_) => "offer",
            ServerMessage::Answer(_) => "answer",
            ServerMessage::IceCandidate(_) => "ice-candidate",
            ServerMessage::ChatMessage { .. } => "chat-message",
            ServerMessage::PartnerDisconnected => "partner-disconnected",
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

/// Frame decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame was not a valid message object.
    #[error("invalid JSON message: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary frame that is not UTF-8 text.
    #[error("binary frame is not valid UTF-8")]
    NonUtf8Binary,
}

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Deserialize from a binary frame holding UTF-8 JSON.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(data).map_err(|_| ProtocolError::NonUtf8Binary)?;
        Self::from_json(text)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
