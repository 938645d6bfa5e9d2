//! Lease manager: exclusive, time-bounded activation ownership.
//!
//! A [`Lease`] says "node N hosts actor A until time T". At most one
//! non-expired lease exists per actor at any instant. The lease grant is the
//! only point where concurrent placement decisions are serialized: whoever
//! acquires first wins, and every loser is told who the winner is.
//!
//! # Design
//!
//! - [`LeaseTable`] keeps one slot per actor in a sharded map. Every
//!   mutation of a slot happens inside a synchronous critical section on
//!   that slot's shard, with no await point, so a caller that abandons an
//!   `acquire` leaves it either fully applied or not applied at all.
//! - Each slot remembers the last [`Epoch`] granted for its actor, so a new
//!   grant always carries a higher epoch than anything previously issued.
//! - Expiry is evaluated against the shared clock by every reader; nobody
//!   needs the owner's cooperation to treat a lease as gone.
//!
//! # Orleans Reference
//!
//! Orleans' grain directory registration plays this role; the lease adds
//! the time bound that lets a silent owner lose its activations.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::infrastructure::membership::DepartureListener;
use crate::time::TimeProvider;
use crate::types::{ActorId, Epoch, LeaseBinding, LeaseId, NodeId, Route};

/// Exclusive ownership of an actor's activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// The leased actor.
    pub actor: ActorId,
    /// Node hosting the activation.
    pub owner: NodeId,
    /// Unique grant identifier.
    pub lease_id: LeaseId,
    /// Per-actor grant counter.
    pub epoch: Epoch,
    /// Expiry on the shared clock.
    pub expires_at: Duration,
}

impl Lease {
    /// Returns true if the lease has expired at `now`.
    pub fn is_expired_at(&self, now: Duration) -> bool {
        now >= self.expires_at
    }

    /// Binding carried by routes derived from this lease.
    pub fn binding(&self) -> LeaseBinding {
        LeaseBinding {
            actor: self.actor.clone(),
            lease_id: self.lease_id,
            epoch: self.epoch,
            expires_at: self.expires_at,
        }
    }

    /// Single-hop route to the owner, bound to this lease.
    pub fn route(&self) -> Route {
        Route::bound(self.owner.clone(), self.binding())
    }

    fn same_grant(&self, other: &Lease) -> bool {
        self.lease_id == other.lease_id && self.epoch == other.epoch
    }
}

impl fmt::Display for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {} ({} {})",
            self.actor, self.owner, self.lease_id, self.epoch
        )
    }
}

/// Errors from lease operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeaseError {
    /// Another node holds a valid lease.
    #[error("lease conflict: {winner} already holds the lease")]
    Conflict {
        /// The lease that won.
        winner: Box<Lease>,
    },

    /// The lease expired, or was released, revoked, or superseded.
    #[error("lease {lease_id} for {actor} is no longer valid")]
    Expired {
        /// The actor.
        actor: ActorId,
        /// The invalid lease.
        lease_id: LeaseId,
    },
}

impl LeaseError {
    /// Error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict { .. } => ErrorKind::LeaseConflict,
            Self::Expired { .. } => ErrorKind::LeaseExpired,
        }
    }
}

/// Grants and tracks activation leases.
#[async_trait]
pub trait LeaseManager: Send + Sync + fmt::Debug {
    /// Grant `actor` to `node`, or return the existing lease if `node`
    /// already holds it.
    ///
    /// # Errors
    ///
    /// [`LeaseError::Conflict`] carrying the winner if another node holds a
    /// valid lease.
    async fn acquire(&self, actor: &ActorId, node: &NodeId) -> Result<Lease, LeaseError>;

    /// Extend a lease by one TTL.
    ///
    /// # Errors
    ///
    /// [`LeaseError::Expired`] if the lease is no longer the current valid
    /// grant for its actor.
    async fn renew(&self, lease: &Lease) -> Result<Lease, LeaseError>;

    /// Give up a lease. Returns false if it was already gone.
    async fn release(&self, lease: &Lease) -> bool;

    /// Revoke a lease whose owner is no longer live. Returns false if it
    /// was already gone.
    async fn revoke(&self, lease: &Lease) -> bool;

    /// Revoke every lease owned by `node`.
    async fn invalidate(&self, node: &NodeId) -> Vec<Lease>;

    /// The valid lease for `actor`, if any.
    async fn current(&self, actor: &ActorId) -> Option<Lease>;

    /// The lease with this id, if it is still the current grant.
    async fn find(&self, lease_id: LeaseId) -> Option<Lease>;

    /// Valid leases owned by `node`.
    async fn held_by(&self, node: &NodeId) -> Vec<Lease>;

    /// Drop expired leases. Returns how many were removed.
    async fn purge_expired(&self) -> usize;
}

#[derive(Debug, Default)]
struct LeaseSlot {
    epoch: Epoch,
    lease: Option<Lease>,
}

/// In-memory lease table.
pub struct LeaseTable {
    ttl: Duration,
    clock: Arc<dyn TimeProvider>,
    slots: DashMap<ActorId, LeaseSlot>,
    // Lock order: a `slots` shard may be held while touching `by_id`,
    // never the reverse.
    by_id: DashMap<LeaseId, ActorId>,
    next_id: AtomicU64,
}

impl fmt::Debug for LeaseTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseTable")
            .field("ttl", &self.ttl)
            .field("leases", &self.by_id.len())
            .finish()
    }
}

impl LeaseTable {
    /// Create an empty table granting leases of `ttl`.
    pub fn new(ttl: Duration, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            ttl,
            clock,
            slots: DashMap::new(),
            by_id: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Lease duration.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Remove `lease` from its slot if it is still the same grant.
    fn remove_grant(&self, lease: &Lease) -> bool {
        let Some(mut slot) = self.slots.get_mut(&lease.actor) else {
            return false;
        };
        let matches = slot
            .lease
            .as_ref()
            .is_some_and(|current| current.same_grant(lease));
        if matches {
            slot.lease = None;
            self.by_id.remove(&lease.lease_id);
        }
        matches
    }
}

#[async_trait]
impl LeaseManager for LeaseTable {
    async fn acquire(&self, actor: &ActorId, node: &NodeId) -> Result<Lease, LeaseError> {
        let now = self.clock.now();
        let mut slot = self.slots.entry(actor.clone()).or_default();

        if let Some(existing) = slot.lease.as_ref().filter(|l| !l.is_expired_at(now)) {
            if &existing.owner == node {
                return Ok(existing.clone());
            }
            tracing::debug!(actor = %actor, requester = %node, winner = %existing.owner, "lease conflict");
            return Err(LeaseError::Conflict {
                winner: Box::new(existing.clone()),
            });
        }

        slot.epoch = slot.epoch.next();
        let lease = Lease {
            actor: actor.clone(),
            owner: node.clone(),
            lease_id: LeaseId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            epoch: slot.epoch,
            expires_at: now + self.ttl,
        };
        if let Some(previous) = slot.lease.replace(lease.clone()) {
            self.by_id.remove(&previous.lease_id);
        }
        self.by_id.insert(lease.lease_id, actor.clone());

        tracing::debug!(
            actor = %actor,
            owner = %node,
            lease_id = %lease.lease_id,
            epoch = %lease.epoch,
            "lease granted"
        );
        Ok(lease)
    }

    async fn renew(&self, lease: &Lease) -> Result<Lease, LeaseError> {
        let now = self.clock.now();
        let expired = || LeaseError::Expired {
            actor: lease.actor.clone(),
            lease_id: lease.lease_id,
        };

        let mut slot = self.slots.get_mut(&lease.actor).ok_or_else(expired)?;
        match slot.lease.as_mut() {
            Some(current) if current.same_grant(lease) && !current.is_expired_at(now) => {
                current.expires_at = now + self.ttl;
                Ok(current.clone())
            }
            _ => Err(expired()),
        }
    }

    async fn release(&self, lease: &Lease) -> bool {
        let released = self.remove_grant(lease);
        if released {
            tracing::debug!(actor = %lease.actor, lease_id = %lease.lease_id, "lease released");
        }
        released
    }

    async fn revoke(&self, lease: &Lease) -> bool {
        let revoked = self.remove_grant(lease);
        if revoked {
            tracing::warn!(
                actor = %lease.actor,
                owner = %lease.owner,
                lease_id = %lease.lease_id,
                "lease revoked"
            );
        }
        revoked
    }

    async fn invalidate(&self, node: &NodeId) -> Vec<Lease> {
        let mut revoked = Vec::new();
        for mut slot in self.slots.iter_mut() {
            let owned = slot.lease.as_ref().is_some_and(|l| &l.owner == node);
            if owned {
                if let Some(lease) = slot.lease.take() {
                    revoked.push(lease);
                }
            }
        }
        for lease in &revoked {
            self.by_id.remove(&lease.lease_id);
        }
        if !revoked.is_empty() {
            tracing::warn!(node = %node, count = revoked.len(), "leases invalidated for departed node");
        }
        revoked
    }

    async fn current(&self, actor: &ActorId) -> Option<Lease> {
        let now = self.clock.now();
        let slot = self.slots.get(actor)?;
        slot.lease.as_ref().filter(|l| !l.is_expired_at(now)).cloned()
    }

    async fn find(&self, lease_id: LeaseId) -> Option<Lease> {
        let actor = self.by_id.get(&lease_id).map(|entry| entry.value().clone())?;
        let slot = self.slots.get(&actor)?;
        slot.lease
            .as_ref()
            .filter(|l| l.lease_id == lease_id)
            .cloned()
    }

    async fn held_by(&self, node: &NodeId) -> Vec<Lease> {
        let now = self.clock.now();
        self.slots
            .iter()
            .filter_map(|slot| {
                slot.lease
                    .as_ref()
                    .filter(|l| &l.owner == node && !l.is_expired_at(now))
                    .cloned()
            })
            .collect()
    }

    async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut purged = Vec::new();
        for mut slot in self.slots.iter_mut() {
            let expired = slot.lease.as_ref().is_some_and(|l| l.is_expired_at(now));
            if expired {
                if let Some(lease) = slot.lease.take() {
                    purged.push(lease.lease_id);
                }
            }
        }
        for lease_id in &purged {
            self.by_id.remove(lease_id);
        }
        purged.len()
    }
}

/// Revokes a departed node's leases.
///
/// Subscribe it to the node directory before any router so leases are gone
/// by the time cached routes are dropped.
#[derive(Debug, Clone)]
pub struct LeaseInvalidation {
    leases: Arc<dyn LeaseManager>,
}

impl LeaseInvalidation {
    /// Wrap a lease manager.
    pub fn new(leases: Arc<dyn LeaseManager>) -> Self {
        Self { leases }
    }
}

#[async_trait]
impl DepartureListener for LeaseInvalidation {
    async fn node_departed(&self, node: &NodeId) {
        self.leases.invalidate(node).await;
    }
}
