//! WebSocket Signaling Server
//!
//! Async WebSocket server: one task per connection reading frames into the
//! router, plus one writer task per connection draining its outbound queue.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval, timeout};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{accept_async_with_config, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::network::channel::ClientChannel;
use crate::network::moderation::{AllowAll, KeywordModerator, Moderator};
use crate::network::protocol::ClientMessage;
use crate::network::router::{Disposition, SessionRouter};
use crate::network::stats::StatsSnapshot;
use crate::registry::RegistryError;

/// How long a closing connection may spend flushing queued messages.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `serve` waits for open connections to wind down after shutdown.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Signaling server errors.
#[derive(Debug, thiserror::Error)]
pub enum SignalServerError {
    /// Failed to bind or accept.
    #[error("Failed to bind: {0}")]
    Bind(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,

    /// Client could not be registered.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Resolves once shutdown has been requested, or the server is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|&stop| stop).await;
}

/// Occupies one connection slot until dropped.
struct ConnectionSlot {
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The signaling server.
pub struct SignalServer {
    /// Server configuration.
    config: Arc<ServerConfig>,
    /// Session router shared by all connections.
    router: Arc<SessionRouter>,
    /// Open connections, including those still handshaking.
    active: Arc<AtomicUsize>,
    /// Shutdown flag. Stays set once raised.
    shutdown_tx: watch::Sender<bool>,
}

impl SignalServer {
    /// Create a server, moderating chat with the configured blocklist if any.
    pub fn new(config: ServerConfig) -> Self {
        let keywords = KeywordModerator::new(&config.blocked_words, config.moderation_strikes);
        let moderator: Arc<dyn Moderator> = if keywords.is_empty() {
            Arc::new(AllowAll)
        } else {
            Arc::new(keywords)
        };
        Self::with_moderator(config, moderator)
    }

    /// Create a server with a custom moderation hook.
    pub fn with_moderator(config: ServerConfig, moderator: Arc<dyn Moderator>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config: Arc::new(config),
            router: Arc::new(SessionRouter::new(moderator)),
            active: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), SignalServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), SignalServerError> {
        info!("Signaling server listening on {}", listener.local_addr()?);

        let stats_handle = (!self.config.stats_interval.is_zero()).then(|| {
            let router = self.router.clone();
            let period = self.config.stats_interval;
            tokio::spawn(async move {
                Self::run_stats_loop(router, period).await;
            })
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => match self.acquire_slot() {
                            Ok(slot) => {
                                debug!("New connection from {}", addr);
                                self.handle_connection(&mut connections, stream, addr, slot);
                            }
                            Err(e) => {
                                warn!("{}, rejecting {}", e, addr);
                                drop(stream);
                            }
                        },
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!("Connection task failed: {}", e);
                    }
                }
                _ = shutdown_requested(&mut shutdown_rx) => {
                    info!("Shutdown signal received, draining {} connections", connections.len());
                    break;
                }
            }
        }

        drop(listener);
        let drained = timeout(SHUTDOWN_DRAIN_TIMEOUT, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                "Drain timeout reached with {} connections still active",
                connections.len()
            );
            connections.shutdown().await;
        }

        if let Some(handle) = stats_handle {
            handle.abort();
        }

        Ok(())
    }

    fn acquire_slot(&self) -> Result<ConnectionSlot, SignalServerError> {
        let max = self.config.max_connections;
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .map_err(|_| SignalServerError::ConnectionLimitReached)?;
        Ok(ConnectionSlot {
            active: self.active.clone(),
        })
    }

    /// Spawn the task owning one WebSocket connection.
    fn handle_connection(
        &self,
        connections: &mut JoinSet<()>,
        stream: TcpStream,
        addr: SocketAddr,
        slot: ConnectionSlot,
    ) {
        let router = self.router.clone();
        let config = self.config.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        connections.spawn(async move {
            if let Err(e) = Self::serve_connection(stream, addr, router, config, shutdown_rx).await {
                error!("Connection {} failed: {}", addr, e);
            }
            drop(slot);
        });
    }

    async fn serve_connection(
        stream: TcpStream,
        addr: SocketAddr,
        router: Arc<SessionRouter>,
        config: Arc<ServerConfig>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), SignalServerError> {
        let ws_config = WebSocketConfig {
            max_message_size: Some(config.max_message_size),
            max_frame_size: Some(config.max_message_size),
            ..Default::default()
        };
        let ws_stream = tokio::select! {
            ws = accept_async_with_config(stream, Some(ws_config)) => ws?,
            _ = shutdown_requested(&mut shutdown_rx) => return Ok(()),
        };
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (channel, mut msg_rx) = ClientChannel::pair(config.channel_capacity);
        let client_id = router.connect(channel).await?;
        debug!("Client {} is {}", addr, client_id);

        // Ends once the registry drops the client's channel and the queue is drained.
        let mut sender_task = tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        loop {
            tokio::select! {
                frame = ws_receiver.next() => {
                    let decoded = match frame {
                        Some(Ok(Message::Text(text))) => {
                            #[cfg(feature = "debug-tracing")]
                            tracing::trace!(client = %client_id.short(), %text, "inbound frame");
                            ClientMessage::from_json(&text)
                        }
                        Some(Ok(Message::Binary(data))) => ClientMessage::from_bytes(&data),
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Client {} closed the connection", client_id.short());
                            break;
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            debug!("WebSocket error for {}: {}", client_id.short(), e);
                            break;
                        }
                    };

                    let message = match decoded {
                        Ok(m) => m,
                        Err(e) => {
                            debug!("Dropping malformed frame from {}: {}", client_id.short(), e);
                            router.record_malformed();
                            continue;
                        }
                    };

                    if router.dispatch(&client_id, message).await == Disposition::Close {
                        break;
                    }
                }
                _ = shutdown_requested(&mut shutdown_rx) => {
                    debug!("Closing {} for shutdown", client_id.short());
                    break;
                }
            }
        }

        router.disconnect(&client_id).await;

        if timeout(WRITER_DRAIN_TIMEOUT, &mut sender_task).await.is_err() {
            sender_task.abort();
        }

        Ok(())
    }

    /// Log relay statistics periodically.
    async fn run_stats_loop(router: Arc<SessionRouter>, period: Duration) {
        let mut ticker = interval(period);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let s = router.stats().await;
            info!(
                connected = s.connected,
                waiting = s.waiting,
                sessions = s.active_sessions,
                sessions_started = s.sessions_started,
                signals = s.signals_relayed,
                chats = s.chats_relayed,
                dropped = s.messages_dropped,
                vetoed = s.moderation_vetoes,
                "relay stats"
            );
        }
    }

    /// Shutdown the server. `serve` returns once open connections have been
    /// closed and their clients unregistered.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Get connected client count.
    pub async fn connection_count(&self) -> usize {
        self.router.client_count().await
    }

    /// Get relay statistics.
    pub async fn stats(&self) -> StatsSnapshot {
        self.router.stats().await
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
