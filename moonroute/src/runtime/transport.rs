//! Point-to-point delivery collaborator.
//!
//! The routing core never moves bytes itself. A [`Transport`] takes a
//! resolved [`Route`] and an envelope and reports whether the destination
//! accepted it. Framing, encryption, and connection management belong to
//! the implementation.

use std::fmt;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;

use crate::error::ErrorKind;
use crate::runtime::envelope::MessageEnvelope;
use crate::types::{ActorId, NodeId, Route};

/// Delivery failures reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// A hop could not be reached.
    #[error("node {node} is unreachable")]
    NodeUnreachable {
        /// The unreachable hop.
        node: NodeId,
    },

    /// The destination no longer hosts the actor.
    #[error("node {node} does not own {actor}")]
    NotOwner {
        /// The destination.
        node: NodeId,
        /// The actor.
        actor: ActorId,
    },

    /// The destination refused the message. Retrying will not help.
    #[error("delivery rejected: {reason}")]
    Rejected {
        /// Why.
        reason: String,
    },
}

impl TransportError {
    /// Whether the failure means the route is stale and should be
    /// re-resolved.
    pub fn is_stale_route(&self) -> bool {
        matches!(self, Self::NodeUnreachable { .. } | Self::NotOwner { .. })
    }

    /// Error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NodeUnreachable { .. } | Self::NotOwner { .. } => ErrorKind::StaleRoute,
            Self::Rejected { .. } => ErrorKind::Other,
        }
    }
}

/// Delivers envelopes along routes.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Deliver `envelope` along `route`.
    async fn deliver(&self, route: &Route, envelope: &MessageEnvelope) -> Result<(), TransportError>;
}

/// A message accepted by [`InMemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Destination node.
    pub node: NodeId,
    /// The message.
    pub envelope: MessageEnvelope,
}

/// Transport that records deliveries in memory, with injectable failures.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    deliveries: Mutex<Vec<Delivery>>,
    unreachable: DashSet<NodeId>,
    not_owner: DashMap<NodeId, u32>,
}

impl InMemoryTransport {
    /// Create a transport where every node is reachable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `node` unreachable or reachable again.
    pub fn set_unreachable(&self, node: &NodeId, unreachable: bool) {
        if unreachable {
            self.unreachable.insert(node.clone());
        } else {
            self.unreachable.remove(node);
        }
    }

    /// Have the next `times` deliveries to `node` fail with
    /// [`TransportError::NotOwner`].
    pub fn reject_as_not_owner(&self, node: &NodeId, times: u32) {
        self.not_owner.insert(node.clone(), times);
    }

    /// Every accepted delivery, in acceptance order.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    /// Envelopes accepted by `node`, in acceptance order.
    pub fn delivered_to(&self, node: &NodeId) -> Vec<MessageEnvelope> {
        self.deliveries
            .lock()
            .iter()
            .filter(|d| &d.node == node)
            .map(|d| d.envelope.clone())
            .collect()
    }

    /// Forget recorded deliveries.
    pub fn clear(&self) {
        self.deliveries.lock().clear();
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn deliver(&self, route: &Route, envelope: &MessageEnvelope) -> Result<(), TransportError> {
        if let Some(hop) = route.hops().iter().find(|hop| self.unreachable.contains(*hop)) {
            return Err(TransportError::NodeUnreachable { node: hop.clone() });
        }

        let destination = route.destination();
        if let Some(mut remaining) = self.not_owner.get_mut(destination) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransportError::NotOwner {
                    node: destination.clone(),
                    actor: envelope.target(),
                });
            }
        }

        self.deliveries.lock().push(Delivery {
            node: destination.clone(),
            envelope: envelope.clone(),
        });
        Ok(())
    }
}
