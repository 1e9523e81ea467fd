//! [`RelayServer`] – HTTP + WebSocket hub between one producer and many
//! viewers.
//!
//! Listens on `0.0.0.0:8000` (configurable via [`RelayServer::with_port`]).
//!
//! * Regular HTTP requests → 200 OK with the embedded viewer page.
//! * WebSocket upgrades → the first text frame fixes the connection's role:
//!   `{"type":"sim_connect"}` makes it the producer, anything else makes it a
//!   consumer.  That frame is consumed.
//!
//! | From | Frame | Routed to |
//! |---|---|---|
//! | producer | `type == "state"` | every consumer, verbatim |
//! | consumer | `type == "command"` | the producer, verbatim, paced per consumer |
//!
//! Everything else is ignored.
//!
//! Commands beyond a consumer's rate are coalesced, not dropped: the newest
//! one waits for the next permit and replaces any older command still
//! waiting.  The last command a consumer sends always reaches the producer,
//! even when it disconnects right after sending it.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::Value;
use strider_types::StriderError;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::registry::{self, ConnectionRegistry, Role};

/// Default TCP port for the relay.
pub const DEFAULT_PORT: u16 = 8000;

/// Default per-consumer command budget, in frames per second.
pub const DEFAULT_COMMAND_RATE: u32 = 50;

const VIEWER_HTML: &str = include_str!("viewer.html");

/// Registry shared by every connection task.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry(Arc<Mutex<ConnectionRegistry>>);

impl SharedRegistry {
    pub fn lock(&self) -> MutexGuard<'_, ConnectionRegistry> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn consumer_count(&self) -> usize {
        self.lock().consumer_count()
    }

    pub fn has_producer(&self) -> bool {
        self.lock().has_producer()
    }
}

/// Relay-wide counters.
#[derive(Debug, Default)]
pub struct RelayStats {
    states_broadcast: AtomicU64,
    commands_forwarded: AtomicU64,
    commands_coalesced: AtomicU64,
}

impl RelayStats {
    pub fn states_broadcast(&self) -> u64 {
        self.states_broadcast.load(Ordering::Relaxed)
    }

    pub fn commands_forwarded(&self) -> u64 {
        self.commands_forwarded.load(Ordering::Relaxed)
    }

    /// Commands superseded by a newer one while waiting for a permit.
    pub fn commands_coalesced(&self) -> u64 {
        self.commands_coalesced.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// RelayServer
// ---------------------------------------------------------------------------

/// # Example
///
/// ```rust,no_run
/// use strider_relay::RelayServer;
///
/// #[tokio::main]
/// async fn main() {
///     RelayServer::new().with_port(8000).run().await.expect("relay failed");
/// }
/// ```
pub struct RelayServer {
    port: u16,
    command_rate: u32,
    registry: SharedRegistry,
    stats: Arc<RelayStats>,
}

impl Default for RelayServer {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayServer {
    pub fn new() -> Self {
        Self {
            port: DEFAULT_PORT,
            command_rate: DEFAULT_COMMAND_RATE,
            registry: SharedRegistry::default(),
            stats: Arc::new(RelayStats::default()),
        }
    }

    /// Override the listening port.  `0` picks a free port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Commands per second forwarded from each consumer.  `0` is treated as 1.
    pub fn with_command_rate(mut self, per_second: u32) -> Self {
        self.command_rate = per_second;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// Bind the listener without accepting yet.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::Connection`] if the port cannot be bound.
    pub async fn bind(self) -> Result<BoundRelay, StriderError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StriderError::Connection(format!("relay bind error on {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| StriderError::Connection(format!("relay local address: {e}")))?;
        Ok(BoundRelay {
            listener,
            local_addr,
            quota: Quota::per_second(NonZeroU32::new(self.command_rate).unwrap_or(NonZeroU32::MIN)),
            registry: self.registry,
            stats: self.stats,
        })
    }

    /// Bind and serve until the task is dropped.
    ///
    /// # Errors
    ///
    /// See [`RelayServer::bind`].
    pub async fn run(self) -> Result<(), StriderError> {
        self.bind().await?.serve().await
    }
}

/// A relay whose listener is bound.
pub struct BoundRelay {
    listener: TcpListener,
    local_addr: SocketAddr,
    quota: Quota,
    registry: SharedRegistry,
    stats: Arc<RelayStats>,
}

impl BoundRelay {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections forever.
    pub async fn serve(self) -> Result<(), StriderError> {
        info!(port = self.local_addr.port(), "relay listening on http://localhost:{}", self.local_addr.port());

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let conn = Connection {
                        registry: self.registry.clone(),
                        stats: Arc::clone(&self.stats),
                        quota: self.quota,
                        peer,
                    };
                    tokio::spawn(async move {
                        if let Err(e) = conn.handle(stream).await {
                            debug!(%peer, error = %e, "relay client error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "relay accept error"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

struct Connection {
    registry: SharedRegistry,
    stats: Arc<RelayStats>,
    quota: Quota,
    peer: SocketAddr,
}

impl Connection {
    async fn handle(self, stream: TcpStream) -> Result<(), StriderError> {
        // `peek` leaves the request in place for the WebSocket handshaker.
        let mut buf = [0u8; 1024];
        let n = stream
            .peek(&mut buf)
            .await
            .map_err(|e| StriderError::Connection(format!("peek error from {}: {e}", self.peer)))?;

        let header_preview = String::from_utf8_lossy(&buf[..n]);
        let is_ws_upgrade = header_preview.lines().any(|line| {
            let line = line.to_lowercase();
            line.starts_with("upgrade:") && line.contains("websocket")
        });

        if is_ws_upgrade {
            self.handle_ws(stream).await
        } else {
            serve_html(stream).await
        }
    }

    async fn handle_ws(self, stream: TcpStream) -> Result<(), StriderError> {
        let peer = self.peer;
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| StriderError::Connection(format!("WS handshake from {peer}: {e}")))?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        // ── Identification ──────────────────────────────────────────────────
        let role = loop {
            match ws_rx.next().await {
                Some(Ok(Message::Text(text))) => break classify(text.as_str()),
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Err(e)) => return Err(StriderError::Connection(format!("{peer}: {e}"))),
                Some(Ok(_)) => {}
            }
        };

        let id = Uuid::new_v4();
        let (outbox, mut inbox) = registry::outbox();
        match role {
            Role::Producer => {
                self.registry.lock().register_producer(id, outbox);
            }
            Role::Consumer => self.registry.lock().register_consumer(id, outbox),
        }
        info!(%peer, connection = %id, ?role, "relay client identified");

        let limiter = RateLimiter::direct(self.quota);
        // Newest command still waiting for a permit.
        let mut pending: Option<String> = None;
        let result = loop {
            tokio::select! {
                // ── Downstream: registry → socket ───────────────────────────
                queued = inbox.recv() => {
                    let Some(text) = queued else {
                        // Outbox dropped: replaced producer or stalled peer.
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break Ok(());
                    };
                    if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                        break Err(StriderError::Connection(format!("{peer}: {e}")));
                    }
                }
                // ── Upstream: socket → registry ─────────────────────────────
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.route(role, text.as_str(), &limiter, &mut pending);
                        }
                        Some(Ok(Message::Close(_))) | None => break Ok(()),
                        Some(Err(e)) => break Err(StriderError::Connection(format!("{peer}: {e}"))),
                        Some(Ok(_)) => {}
                    }
                }
                // ── Paced commands: pending → producer ──────────────────────
                _ = limiter.until_ready(), if pending.is_some() => {
                    if let Some(text) = pending.take() {
                        self.forward(&text);
                    }
                }
            }
        };

        if let Some(text) = pending.take() {
            self.forward(&text);
        }
        self.registry.lock().remove(id);
        result
    }

    fn route(&self, role: Role, text: &str, limiter: &DefaultDirectRateLimiter, pending: &mut Option<String>) {
        let kind = frame_type(text);
        match (role, kind.as_deref()) {
            (Role::Producer, Some("state")) => {
                self.registry.lock().broadcast_state(text);
                self.stats.states_broadcast.fetch_add(1, Ordering::Relaxed);
            }
            (Role::Consumer, Some("command")) => {
                // Once one command waits, newer ones replace it in place.
                if pending.is_none() && limiter.check().is_ok() {
                    self.forward(text);
                } else if pending.replace(text.to_string()).is_some() {
                    self.stats.commands_coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!(peer = %self.peer, "command coalesced");
                }
            }
            _ => debug!(peer = %self.peer, ?role, kind = ?kind, "frame ignored"),
        }
    }

    fn forward(&self, text: &str) {
        if self.registry.lock().forward_command(text) {
            self.stats.commands_forwarded.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!(peer = %self.peer, "command dropped; no producer connected");
        }
    }
}

/// Role fixed by a connection's first frame.
pub(crate) fn classify(text: &str) -> Role {
    if frame_type(text).as_deref() == Some("sim_connect") {
        Role::Producer
    } else {
        Role::Consumer
    }
}

fn frame_type(text: &str) -> Option<String> {
    let json = serde_json::from_str::<Value>(text).ok()?;
    json.get("type").and_then(Value::as_str).map(str::to_string)
}

// ---------------------------------------------------------------------------
// Plain HTTP: serve the embedded viewer
// ---------------------------------------------------------------------------

async fn serve_html(mut stream: TcpStream) -> Result<(), StriderError> {
    let body = VIEWER_HTML;
    let response = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/html; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        body.len(),
        body
    );
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|e| StriderError::Connection(format!("HTTP write error: {e}")))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
