//! Display names bound to a connection at join time.

use std::fmt;
use std::net::SocketAddr;

/// Name shown for a connected client.
///
/// Fixed for the lifetime of the connection. Names are not unique: two
/// clients may join under the same name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DisplayName(String);

impl DisplayName {
    /// Resolves the name a client announced in its first line.
    ///
    /// Surrounding whitespace is trimmed. An empty result (including a
    /// client that closed the stream before sending anything) falls back
    /// to the peer address rendered as `host:port`.
    pub fn resolve(raw: &str, peer: SocketAddr) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Self::from_addr(peer)
        } else {
            Self(trimmed.to_string())
        }
    }

    /// Builds a name from a peer address.
    ///
    /// IPv6 hosts are rendered without brackets, e.g. `::1:5000`.
    pub fn from_addr(peer: SocketAddr) -> Self {
        Self(format!("{}:{}", peer.ip(), peer.port()))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
