//! Registry entries and the per-connection outbound writer.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Writes to a closed outbound fail with `SendError::Closed`

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use relay_protocol::{DisplayName, LINE_DELIMITER};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Type-erased write half of a client stream
type BoxedWriter = Box<dyn AsyncWrite + Send + Sync + Unpin>;

/// Identifier for an accepted connection.
///
/// Assigned by the accept loop from a monotonic counter, so ids are never
/// reused within one server run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a connection id from a raw counter value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw counter value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A joined client as seen by the registry.
///
/// Cloning is cheap: the outbound writer is shared, so a snapshot of the
/// registry can write to peers without holding the registry lock.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Name announced when the client joined
    pub name: DisplayName,

    /// Remote address of the client
    pub addr: SocketAddr,

    /// Shared writer for lines sent to this client
    pub outbound: Arc<Outbound>,

    /// Cancels the client's session when it is evicted
    pub cancel: CancellationToken,
}

impl Peer {
    /// Creates a new registry entry.
    pub fn new(
        name: DisplayName,
        addr: SocketAddr,
        outbound: Arc<Outbound>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name,
            addr,
            outbound,
            cancel,
        }
    }
}

/// Write side of a client connection.
///
/// Every write takes the inner lock, so lines from concurrent broadcasts
/// never interleave. `close` takes the writer out of its slot: the stream
/// is shut down at most once, and later sends fail with `SendError::Closed`.
pub struct Outbound {
    writer: Mutex<Option<BufWriter<BoxedWriter>>>,
    write_timeout: Duration,
}

impl Outbound {
    /// Wraps the write half of a client stream.
    pub fn new<W>(writer: W, write_timeout: Duration) -> Self
    where
        W: AsyncWrite + Send + Sync + Unpin + 'static,
    {
        let boxed: BoxedWriter = Box::new(writer);
        Self {
            writer: Mutex::new(Some(BufWriter::new(boxed))),
            write_timeout,
        }
    }

    /// Writes one line followed by the delimiter and flushes it.
    ///
    /// # Errors
    ///
    /// - `SendError::Closed` if the outbound was already closed
    /// - `SendError::Io` if the stream rejected the write
    /// - `SendError::Timeout` if the write did not finish in time
    pub async fn send_line(&self, line: &str) -> Result<(), SendError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(SendError::Closed)?;

        match timeout(self.write_timeout, async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(LINE_DELIMITER.as_bytes()).await?;
            writer.flush().await?;
            Ok::<(), io::Error>(())
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SendError::Io(e.to_string())),
            Err(_) => Err(SendError::Timeout(self.write_timeout)),
        }
    }

    /// Shuts down the write side of the stream.
    ///
    /// Returns `Ok(true)` if this call closed it, `Ok(false)` if it was
    /// already closed. The writer is released even when shutdown fails.
    ///
    /// Bytes still buffered are discarded: every successful `send_line`
    /// flushes, so leftovers only exist after a failed or timed-out write
    /// to a peer that is not reading. Shutdown itself is bounded by the
    /// write timeout.
    pub async fn close(&self) -> io::Result<bool> {
        let taken = self.writer.lock().await.take();
        let Some(mut writer) = taken else {
            return Ok(false);
        };

        match timeout(self.write_timeout, writer.get_mut().shutdown()).await {
            Ok(result) => result.map(|()| true),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("shutdown timed out after {:?}", self.write_timeout),
            )),
        }
    }
}

impl fmt::Debug for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outbound")
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

/// Errors from writing a line to a client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("Connection already closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Write timed out after {0:?}")]
    Timeout(Duration),
}
