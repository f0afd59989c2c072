//! Client Output Channel
//!
//! Handle used to push protocol messages towards one connection's writer task.
//! Delivery never blocks and never fails loudly: a closed or saturated channel
//! simply reports `false`.

use tokio::sync::mpsc;
use tracing::debug;

use crate::network::protocol::ServerMessage;

/// Outbound half of a client's message queue.
#[derive(Debug, Clone)]
pub struct ClientChannel {
    sender: mpsc::Sender<ServerMessage>,
}

impl ClientChannel {
    /// Wrap the sending side of a connection's outbound queue.
    pub fn new(sender: mpsc::Sender<ServerMessage>) -> Self {
        Self { sender }
    }

    /// Create a channel together with its receiving end.
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Queue a message for delivery. Returns whether it was accepted.
    pub fn deliver(&self, message: ServerMessage) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Closed(msg)) => {
                debug!("dropping {} for closed channel", msg.kind());
                false
            }
            Err(mpsc::error::TrySendError::Full(msg)) => {
                debug!("dropping {} for saturated channel", msg.kind());
                false
            }
        }
    }

    /// Whether the receiving side is still alive.
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}
