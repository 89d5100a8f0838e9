//! TCP server for the line relay.
//!
//! The server:
//! - Listens on a TCP address for client connections
//! - Spawns a SessionHandler task for each client
//! - Supervises session tasks in a `JoinSet`
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   RelayServer   │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ SessionHandler  │────▶│    Registry     │
//! │   (per client)  │     │                 │
//! └─────────────────┘     └─────────────────┘
//!         │
//!         │ broadcast
//!         ▼
//! ┌─────────────────┐
//! │  Other Clients  │
//! └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the crate's panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and allow continued operation

mod connection;
mod fanout;

pub use connection::{SessionError, SessionHandler};
pub use fanout::{broadcast, FanoutReport};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::registry::{ConnectionId, Outbound, Registry};

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Extra time sessions get to finish after the last write deadline
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// TCP server for the line relay.
///
/// Owns the listening socket and hands every accepted connection to its
/// own session task.
pub struct RelayServer {
    /// Bound listener
    listener: TcpListener,

    /// Shared registry of joined connections
    registry: Arc<Registry>,

    /// Server configuration
    config: RelayConfig,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for generating connection ids
    connection_counter: AtomicU64,
}

impl RelayServer {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// - `ServerError::Bind` if the address cannot be bound. This is fatal
    ///   at startup.
    pub async fn bind(
        config: RelayConfig,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|e| ServerError::Bind {
                addr: config.bind_addr(),
                error: e.to_string(),
            })?;

        Ok(Self {
            listener,
            registry: Arc::new(Registry::new()),
            config,
            cancel_token,
            connection_counter: AtomicU64::new(0),
        })
    }

    /// Returns the address the listener is bound to.
    ///
    /// Useful when the configured port is 0.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::LocalAddr(e.to_string()))
    }

    /// Returns a handle to the shared registry.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Runs the server.
    ///
    /// Accepts connections until the cancellation token is triggered, then
    /// cancels every session and waits for them to finish.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(addr = %self.config.bind_addr(), "Relay server listening");

        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Session task failed");
                    }
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            self.spawn_session(&mut sessions, stream, peer_addr);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
            }
        }

        self.shutdown(sessions).await;
        Ok(())
    }

    /// Spawns a session task for a newly accepted connection.
    fn spawn_session(
        &self,
        sessions: &mut JoinSet<()>,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) {
        let id = ConnectionId::new(self.connection_counter.fetch_add(1, Ordering::Relaxed));

        if let Err(e) = stream.set_nodelay(true) {
            debug!(conn = %id, error = %e, "Failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let outbound = Arc::new(Outbound::new(writer, self.config.write_timeout));
        let handler = SessionHandler::new(
            id,
            peer_addr,
            reader,
            outbound,
            Arc::clone(&self.registry),
            self.cancel_token.child_token(),
        );

        sessions.spawn(handler.run());
        debug!(conn = %id, peer = %peer_addr, "Accepted connection");
    }

    /// Waits for all sessions to finish after cancellation.
    ///
    /// Sessions still running after the last write deadline are aborted;
    /// their guards finish cleanup in the background.
    async fn shutdown(&self, mut sessions: JoinSet<()>) {
        let pending = sessions.len();
        if pending > 0 {
            info!(sessions = pending, "Waiting for sessions to finish");
        }

        let drain = async {
            while let Some(joined) = sessions.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Session task failed");
                }
            }
        };

        if timeout(self.config.write_timeout + SHUTDOWN_GRACE, drain)
            .await
            .is_err()
        {
            warn!(
                remaining = sessions.len(),
                "Sessions did not finish in time, aborting"
            );
            sessions.abort_all();
        }

        info!("Server cleanup complete");
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },

    #[error("Failed to read local address: {0}")]
    LocalAddr(String),
}
