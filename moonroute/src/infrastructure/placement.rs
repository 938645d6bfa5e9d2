//! Placement: choosing a node for an actor that has no activation yet.
//!
//! A [`PlacementStrategy`] is a pure function of the actor identity and the
//! candidate set handed to it. It keeps no hidden state, so every node
//! computes the same answer for the same membership view. Placement is
//! only a proposal: the lease grant is the single serialization point, so
//! two nodes disagreeing during a membership change is harmless.
//!
//! # Strategies
//!
//! - [`HashPlacement`] (default): stable hash of the identity modulo the
//!   sorted, de-duplicated candidates.
//! - [`RendezvousPlacement`]: highest-random-weight hashing, which moves
//!   only the actors owned by a node that joins or departs.
//! - [`PreferLocalPlacement`]: the local node when it is a candidate,
//!   otherwise a fallback strategy.
//!
//! # Orleans Reference
//!
//! Corresponds to Orleans' `IPlacementDirector` implementations
//! (`HashBasedPlacementDirector`, `PreferLocalPlacementDirector`).

use std::collections::BTreeSet;
use std::fmt;
use std::hash::Hasher;
use std::sync::Arc;

use rapidhash::RapidHasher;

use crate::error::ErrorKind;
use crate::types::{ActorId, NodeId};

const IDENTITY_SEED: u64 = 0x6d6f_6f6e_726f_7574;

/// Errors from placement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    /// The candidate set was empty.
    #[error("no eligible node for actor {actor}")]
    NoEligibleNode {
        /// The actor that could not be placed.
        actor: ActorId,
    },
}

impl PlacementError {
    /// Error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoEligibleNode { .. } => ErrorKind::NoEligibleNode,
        }
    }
}

/// Chooses a node for a not-yet-activated actor.
pub trait PlacementStrategy: Send + Sync + fmt::Debug {
    /// Pick one of `candidates` for `actor`.
    ///
    /// Order and duplicates in `candidates` must not affect the result.
    ///
    /// # Errors
    ///
    /// [`PlacementError::NoEligibleNode`] when `candidates` is empty.
    fn select_node(&self, actor: &ActorId, candidates: &[NodeId]) -> Result<NodeId, PlacementError>;
}

fn sorted_candidates<'a>(
    actor: &ActorId,
    candidates: &'a [NodeId],
) -> Result<Vec<&'a NodeId>, PlacementError> {
    let sorted: Vec<&NodeId> = candidates
        .iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if sorted.is_empty() {
        return Err(PlacementError::NoEligibleNode {
            actor: actor.clone(),
        });
    }
    Ok(sorted)
}

/// Stable 64-bit hash of an actor identity.
///
/// Identical on every node and across restarts.
pub fn identity_hash(actor: &ActorId) -> u64 {
    let mut hasher = RapidHasher::new(IDENTITY_SEED);
    hasher.write(&actor.canonical_bytes());
    hasher.finish()
}

/// Hash of the identity modulo the sorted candidate list.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashPlacement;

impl PlacementStrategy for HashPlacement {
    fn select_node(&self, actor: &ActorId, candidates: &[NodeId]) -> Result<NodeId, PlacementError> {
        let sorted = sorted_candidates(actor, candidates)?;
        let index = (identity_hash(actor) % sorted.len() as u64) as usize;
        let chosen = sorted[index].clone();
        tracing::debug!(actor = %actor, node = %chosen, candidates = sorted.len(), "placed by hash");
        Ok(chosen)
    }
}

/// Highest-random-weight placement.
///
/// Every candidate gets a score from `hash(identity, node)`; the highest
/// wins, ties going to the smaller node id.
#[derive(Debug, Clone, Copy)]
pub struct RendezvousPlacement {
    seed: u64,
}

impl RendezvousPlacement {
    /// Create with a cluster-wide seed. All nodes must use the same seed.
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    fn score(&self, identity: &[u8], node: &NodeId) -> u64 {
        let mut hasher = RapidHasher::new(self.seed);
        hasher.write(identity);
        hasher.write_u8(0xff);
        hasher.write(node.as_str().as_bytes());
        hasher.finish()
    }
}

impl Default for RendezvousPlacement {
    fn default() -> Self {
        Self::new(IDENTITY_SEED)
    }
}

impl PlacementStrategy for RendezvousPlacement {
    fn select_node(&self, actor: &ActorId, candidates: &[NodeId]) -> Result<NodeId, PlacementError> {
        let sorted = sorted_candidates(actor, candidates)?;
        let identity = actor.canonical_bytes();
        let mut best = sorted[0];
        let mut best_score = self.score(&identity, best);
        for node in &sorted[1..] {
            let score = self.score(&identity, node);
            if score > best_score {
                best = node;
                best_score = score;
            }
        }
        tracing::debug!(actor = %actor, node = %best, candidates = sorted.len(), "placed by rendezvous");
        Ok(best.clone())
    }
}

/// Place on the local node when possible.
#[derive(Debug, Clone)]
pub struct PreferLocalPlacement {
    local: NodeId,
    fallback: Arc<dyn PlacementStrategy>,
}

impl PreferLocalPlacement {
    /// Prefer `local`, otherwise defer to `fallback`.
    pub fn new(local: NodeId, fallback: Arc<dyn PlacementStrategy>) -> Self {
        Self { local, fallback }
    }
}

impl PlacementStrategy for PreferLocalPlacement {
    fn select_node(&self, actor: &ActorId, candidates: &[NodeId]) -> Result<NodeId, PlacementError> {
        if candidates.contains(&self.local) {
            tracing::debug!(actor = %actor, node = %self.local, "placed locally");
            return Ok(self.local.clone());
        }
        self.fallback.select_node(actor, candidates)
    }
}
