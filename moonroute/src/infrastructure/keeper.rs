//! Lease renewal for the local node.
//!
//! Every lease owned by a node must be renewed before it expires or the
//! actor becomes placeable elsewhere. [`LeaseKeeper`] renews all of the
//! node's leases every half TTL and logs the ones it lost.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::infrastructure::lease::{Lease, LeaseManager};
use crate::time::TimeProvider;
use crate::types::NodeId;

/// Outcome of one renewal pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenewalReport {
    /// Leases extended by this pass.
    pub renewed: Vec<Lease>,
    /// Leases that could not be renewed and are no longer held.
    pub lost: Vec<Lease>,
}

/// Keeps the local node's leases alive.
#[derive(Debug, Clone)]
pub struct LeaseKeeper {
    node: NodeId,
    leases: Arc<dyn LeaseManager>,
    clock: Arc<dyn TimeProvider>,
    interval: Duration,
}

impl LeaseKeeper {
    /// Renew `node`'s leases every `ttl / 2`.
    pub fn new(
        node: NodeId,
        leases: Arc<dyn LeaseManager>,
        clock: Arc<dyn TimeProvider>,
        ttl: Duration,
    ) -> Self {
        Self {
            node,
            leases,
            clock,
            interval: ttl / 2,
        }
    }

    /// Time between renewal passes.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Renew every lease currently held by this node.
    pub async fn renew_all(&self) -> RenewalReport {
        let mut report = RenewalReport::default();
        for lease in self.leases.held_by(&self.node).await {
            match self.leases.renew(&lease).await {
                Ok(renewed) => report.renewed.push(renewed),
                Err(err) => {
                    tracing::warn!(
                        node = %self.node,
                        actor = %lease.actor,
                        lease_id = %lease.lease_id,
                        error = %err,
                        "lease renewal failed, dropping lease"
                    );
                    report.lost.push(lease);
                }
            }
        }
        if !report.renewed.is_empty() {
            tracing::debug!(node = %self.node, count = report.renewed.len(), "leases renewed");
        }
        report
    }

    /// Release every lease held by this node. Used on graceful shutdown.
    pub async fn release_all(&self) -> usize {
        let mut released = 0;
        for lease in self.leases.held_by(&self.node).await {
            if self.leases.release(&lease).await {
                released += 1;
            }
        }
        released
    }

    /// Renew on a timer until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.clock.sleep(self.interval) => {
                    self.renew_all().await;
                }
            }
        }
        tracing::debug!(node = %self.node, "lease keeper stopped");
    }
}
