//! Broadcast of one line to every joined client.
//!
//! Delivery works off a registry snapshot, so the registry lock is released
//! before the first write. Recipients are written to one after another; a
//! failing recipient is evicted and the loop moves on to the next one.

use tracing::{debug, info};

use crate::registry::{ConnectionId, Peer, Registry, SendError};

/// Outcome of a single broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutReport {
    /// Recipients that received the line
    pub delivered: usize,

    /// Recipients whose write failed
    pub failed: usize,

    /// Failed recipients this call removed from the registry
    pub evicted: usize,
}

/// Sends `line` to every registered connection except `exclude`.
///
/// The delimiter is appended here; `line` must not contain one. Write
/// failures never reach the caller: the recipient is removed from the
/// registry, its session is cancelled and its stream is shut down.
pub async fn broadcast(
    registry: &Registry,
    line: &str,
    exclude: Option<ConnectionId>,
) -> FanoutReport {
    let mut report = FanoutReport::default();

    for (id, peer) in registry.snapshot().await {
        if exclude == Some(id) {
            continue;
        }

        match peer.outbound.send_line(line).await {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                report.failed += 1;
                if evict(registry, id, &peer, &e).await {
                    report.evicted += 1;
                }
            }
        }
    }

    report
}

/// Closes and unregisters a recipient whose write failed.
///
/// Returns true if this call removed it from the registry.
async fn evict(registry: &Registry, id: ConnectionId, peer: &Peer, cause: &SendError) -> bool {
    let removed = registry.remove(id).await.is_some();
    if removed {
        info!(conn = %id, name = %peer.name, error = %cause, "Evicting unreachable peer");
    } else {
        debug!(conn = %id, error = %cause, "Send failed to peer already being removed");
    }

    peer.cancel.cancel();

    if let Err(e) = peer.outbound.close().await {
        debug!(conn = %id, error = %e, "Failed to shut down evicted peer");
    }

    removed
}
