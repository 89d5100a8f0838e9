//! Session handler for individual client connections.
//!
//! Each accepted connection gets its own `SessionHandler` that:
//! - Reads the display name from the first line
//! - Announces the join, then registers the connection
//! - Relays every non-empty line through the fanout
//! - Unregisters and announces the leave when the stream ends
//!
//! # Lifecycle
//!
//! ```text
//! AwaitingName ──name line / EOF──▶ Active ──EOF / read error / cancel──▶ Terminated
//!      │                                                                    ▲
//!      └──────────────────────── read error / cancel ───────────────────────┘
//! ```
//!
//! `Terminated` is handled by a `SessionGuard` created before the first
//! read. Every exit path releases it; if the session future is dropped
//! before that happens, the guard finishes the cleanup on a background task.
//!
//! A client whose stream fails (or whose session is cancelled) before a name
//! line arrives never joined, so no leave is announced for it, not even
//! under a placeholder name.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the crate's panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and result in graceful disconnect

use std::net::SocketAddr;
use std::sync::Arc;

use relay_protocol::{strip_line_ending, DisplayName, ServerLine};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::registry::{ConnectionId, Outbound, Peer, Registry, RegistryError};

use super::fanout;

/// Handler driving one client connection from accept to cleanup.
pub struct SessionHandler<R> {
    /// Id assigned by the accept loop
    id: ConnectionId,

    /// Remote address, used for the fallback display name
    peer_addr: SocketAddr,

    /// Buffered read half of the client stream
    reader: BufReader<R>,

    /// Write half, shared with the registry once joined
    outbound: Arc<Outbound>,

    /// Shared registry of joined connections
    registry: Arc<Registry>,

    /// Fires on eviction or server shutdown
    cancel_token: CancellationToken,
}

impl<R> SessionHandler<R>
where
    R: AsyncRead + Unpin,
{
    /// Creates a new session handler.
    ///
    /// # Arguments
    ///
    /// * `id` - Unique id for this connection
    /// * `peer_addr` - Remote address of the client
    /// * `reader` - Read half of the client stream
    /// * `outbound` - Write half of the client stream
    /// * `registry` - Shared registry of joined connections
    /// * `cancel_token` - Token that ends the session when cancelled
    pub fn new(
        id: ConnectionId,
        peer_addr: SocketAddr,
        reader: R,
        outbound: Arc<Outbound>,
        registry: Arc<Registry>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            id,
            peer_addr,
            reader: BufReader::new(reader),
            outbound,
            registry,
            cancel_token,
        }
    }

    /// Runs the session until the client leaves.
    ///
    /// Cleanup always runs before this returns: the connection is
    /// unregistered, a leave is announced if a join was, and the stream is
    /// shut down.
    pub async fn run(mut self) {
        debug!(conn = %self.id, peer = %self.peer_addr, "New client connected");

        let mut guard = SessionGuard::new(
            self.id,
            Arc::clone(&self.registry),
            Arc::clone(&self.outbound),
        );

        let name = match self.await_name().await {
            Ok(name) => name,
            Err(e) => {
                warn!(
                    conn = %self.id,
                    peer = %self.peer_addr,
                    error = %e,
                    "Failed to read display name"
                );
                guard.release().await;
                return;
            }
        };

        if let Err(e) = self.join(&name, &mut guard).await {
            error!(conn = %self.id, name = %name, error = %e, "Registry invariant violated");
            guard.release().await;
            return;
        }

        info!(conn = %self.id, peer = %self.peer_addr, name = %name, "Client joined");

        match self.process_lines(&name).await {
            Ok(()) => debug!(conn = %self.id, "Client sent EOF"),
            Err(SessionError::Cancelled) => debug!(conn = %self.id, "Session cancelled"),
            Err(e) => debug!(conn = %self.id, error = %e, "Connection closed"),
        }

        guard.release().await;
        info!(conn = %self.id, name = %name, "Client disconnected");
    }

    /// Reads the first line and resolves it to a display name.
    ///
    /// A stream that closes before sending anything still joins, under its
    /// address.
    async fn await_name(&mut self) -> Result<DisplayName, SessionError> {
        let raw = self.read_line().await?;
        Ok(DisplayName::resolve(
            raw.as_deref().unwrap_or_default(),
            self.peer_addr,
        ))
    }

    /// Announces the join, then makes the connection visible to fanout.
    ///
    /// The announcement goes out before registration, so the joining client
    /// never receives its own join.
    async fn join(
        &mut self,
        name: &DisplayName,
        guard: &mut SessionGuard,
    ) -> Result<(), SessionError> {
        let report =
            fanout::broadcast(&self.registry, &ServerLine::joined(name).to_string(), None).await;
        guard.mark_announced(name.clone());
        debug!(conn = %self.id, delivered = report.delivered, "Join announced");

        let peer = Peer::new(
            name.clone(),
            self.peer_addr,
            Arc::clone(&self.outbound),
            self.cancel_token.clone(),
        );
        self.registry.add(self.id, peer).await?;
        Ok(())
    }

    /// Relays lines until EOF, a read error, or cancellation.
    async fn process_lines(&mut self, name: &DisplayName) -> Result<(), SessionError> {
        loop {
            let Some(raw) = self.read_line().await? else {
                return Ok(());
            };

            let text = strip_line_ending(&raw);
            if text.is_empty() {
                debug!(conn = %self.id, "Discarding empty line");
                continue;
            }

            let report =
                fanout::broadcast(&self.registry, &ServerLine::chat(name, text).to_string(), None)
                    .await;
            debug!(
                conn = %self.id,
                delivered = report.delivered,
                evicted = report.evicted,
                "Relayed line"
            );
        }
    }

    /// Reads one raw line. `Ok(None)` means the client closed the stream.
    async fn read_line(&mut self) -> Result<Option<String>, SessionError> {
        let mut line = String::new();

        let bytes_read = tokio::select! {
            _ = self.cancel_token.cancelled() => return Err(SessionError::Cancelled),
            result = self.reader.read_line(&mut line) => {
                result.map_err(|e| SessionError::Read(e.to_string()))?
            }
        };

        if bytes_read == 0 {
            return Ok(None);
        }

        Ok(Some(line))
    }
}

/// Scoped cleanup for one session.
///
/// `release` runs the cleanup inline. Dropping an unreleased guard (the
/// session task was aborted or panicked) runs it on a background task.
struct SessionGuard {
    id: ConnectionId,
    registry: Arc<Registry>,
    outbound: Arc<Outbound>,
    /// Set once the join announcement went out
    announced: Option<DisplayName>,
    released: bool,
}

impl SessionGuard {
    fn new(id: ConnectionId, registry: Arc<Registry>, outbound: Arc<Outbound>) -> Self {
        Self {
            id,
            registry,
            outbound,
            announced: None,
            released: false,
        }
    }

    fn mark_announced(&mut self, name: DisplayName) {
        self.announced = Some(name);
    }

    async fn release(mut self) {
        self.released = true;
        terminate(
            self.id,
            Arc::clone(&self.registry),
            Arc::clone(&self.outbound),
            self.announced.take(),
        )
        .await;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let cleanup = terminate(
            self.id,
            Arc::clone(&self.registry),
            Arc::clone(&self.outbound),
            self.announced.take(),
        );

        match Handle::try_current() {
            Ok(handle) => {
                warn!(conn = %self.id, "Session ended without cleanup, releasing in background");
                handle.spawn(cleanup);
            }
            Err(_) => {
                debug!(conn = %self.id, "No runtime available for session cleanup");
            }
        }
    }
}

/// Unregisters the connection, announces the leave and shuts the stream down.
///
/// The leave is announced whenever the join was, including after eviction
/// already removed the connection from the registry.
async fn terminate(
    id: ConnectionId,
    registry: Arc<Registry>,
    outbound: Arc<Outbound>,
    announced: Option<DisplayName>,
) {
    if registry.remove(id).await.is_none() && announced.is_some() {
        debug!(conn = %id, "Connection was already evicted");
    }

    if let Some(name) = announced {
        let report = fanout::broadcast(&registry, &ServerLine::left(&name).to_string(), None).await;
        debug!(conn = %id, delivered = report.delivered, "Leave announced");
    }

    match outbound.close().await {
        Ok(true) => debug!(conn = %id, "Connection shut down"),
        Ok(false) => {}
        Err(e) => debug!(conn = %id, error = %e, "Failed to shut down connection"),
    }
}

/// Errors that end a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Read error: {0}")]
    Read(String),

    #[error("Session cancelled")]
    Cancelled,

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}
