//! Lease protocol handler.
//!
//! Nodes talk to the lease authority with [`LeaseRequest`] messages and get
//! a [`LeaseResponse`] back. Requests are idempotent: a retried request
//! (after a lost response, say) gets the same outcome and never causes a
//! second grant.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::infrastructure::lease::{Lease, LeaseError, LeaseManager};
use crate::types::{ActorId, Epoch, LeaseId, NodeId};

/// Request from a node to the lease authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaseRequest {
    /// Acquire the lease for `actor` on behalf of `requesting_node`.
    Acquire {
        /// The actor.
        actor: ActorId,
        /// Node that would host the activation.
        requesting_node: NodeId,
    },
    /// Extend a held lease.
    Renew {
        /// Lease to renew.
        lease_id: LeaseId,
        /// Epoch the requester holds.
        epoch: Epoch,
    },
    /// Give up a held lease.
    Release {
        /// Lease to release.
        lease_id: LeaseId,
    },
}

/// Authority's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaseResponse {
    /// The requester holds this lease.
    Granted(Lease),
    /// Another node holds this lease.
    Conflict(Lease),
    /// The lease was extended.
    Renewed(Lease),
    /// The lease is no longer valid; the requester must stop serving it.
    Expired {
        /// The lease that could not be renewed.
        lease_id: LeaseId,
    },
    /// The lease is gone, whether or not this request removed it.
    Released {
        /// The released lease.
        lease_id: LeaseId,
    },
}

/// Serves lease requests over a [`LeaseManager`].
#[derive(Debug, Clone)]
pub struct LeaseAuthority {
    leases: Arc<dyn LeaseManager>,
}

impl LeaseAuthority {
    /// Serve requests against `leases`.
    pub fn new(leases: Arc<dyn LeaseManager>) -> Self {
        Self { leases }
    }

    /// Handle one request.
    pub async fn handle(&self, request: LeaseRequest) -> LeaseResponse {
        match request {
            LeaseRequest::Acquire {
                actor,
                requesting_node,
            } => match self.leases.acquire(&actor, &requesting_node).await {
                Ok(lease) => LeaseResponse::Granted(lease),
                Err(LeaseError::Conflict { winner }) => LeaseResponse::Conflict(*winner),
                Err(LeaseError::Expired { lease_id, .. }) => LeaseResponse::Expired { lease_id },
            },
            LeaseRequest::Renew { lease_id, epoch } => {
                let Some(lease) = self.leases.find(lease_id).await else {
                    return LeaseResponse::Expired { lease_id };
                };
                if lease.epoch != epoch {
                    return LeaseResponse::Expired { lease_id };
                }
                match self.leases.renew(&lease).await {
                    Ok(renewed) => LeaseResponse::Renewed(renewed),
                    Err(err) => {
                        tracing::warn!(lease_id = %lease_id, error = %err, "renewal refused");
                        LeaseResponse::Expired { lease_id }
                    }
                }
            }
            LeaseRequest::Release { lease_id } => {
                if let Some(lease) = self.leases.find(lease_id).await {
                    self.leases.release(&lease).await;
                }
                LeaseResponse::Released { lease_id }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::infrastructure::lease::LeaseTable;
    use crate::time::ManualTimeProvider;

    fn node(id: &str) -> NodeId {
        NodeId::new(id).expect("valid node id")
    }

    fn authority() -> (LeaseAuthority, ManualTimeProvider) {
        let clock = ManualTimeProvider::new();
        let table = LeaseTable::new(Duration::from_secs(30), Arc::new(clock.clone()));
        (LeaseAuthority::new(Arc::new(table)), clock)
    }

    fn acquire(actor: &ActorId, by: &str) -> LeaseRequest {
        LeaseRequest::Acquire {
            actor: actor.clone(),
            requesting_node: node(by),
        }
    }

    #[tokio::test]
    async fn test_retried_acquire_never_double_grants() {
        let (authority, _clock) = authority();
        let actor = ActorId::new("Chat", "room1");

        let first = authority.handle(acquire(&actor, "n1")).await;
        let retry = authority.handle(acquire(&actor, "n1")).await;
        assert_eq!(first, retry);

        let LeaseResponse::Granted(lease) = first else {
            panic!("expected grant, got {first:?}");
        };
        assert_eq!(
            authority.handle(acquire(&actor, "n2")).await,
            LeaseResponse::Conflict(lease)
        );
    }

    #[tokio::test]
    async fn test_renew_by_id_and_epoch() {
        let (authority, clock) = authority();
        let actor = ActorId::new("Chat", "room1");
        let LeaseResponse::Granted(lease) = authority.handle(acquire(&actor, "n1")).await else {
            panic!("expected grant");
        };

        clock.advance(Duration::from_secs(10));
        let renew = LeaseRequest::Renew {
            lease_id: lease.lease_id,
            epoch: lease.epoch,
        };
        let LeaseResponse::Renewed(first) = authority.handle(renew.clone()).await else {
            panic!("expected renewal");
        };
        let LeaseResponse::Renewed(again) = authority.handle(renew).await else {
            panic!("retried renewal must succeed");
        };
        assert_eq!(first, again);
        assert_eq!(first.expires_at, Duration::from_secs(40));

        let wrong_epoch = LeaseRequest::Renew {
            lease_id: lease.lease_id,
            epoch: lease.epoch.next(),
        };
        assert_eq!(
            authority.handle(wrong_epoch).await,
            LeaseResponse::Expired {
                lease_id: lease.lease_id
            }
        );
    }

    #[tokio::test]
    async fn test_renew_after_expiry_is_refused() {
        let (authority, clock) = authority();
        let actor = ActorId::new("Chat", "room1");
        let LeaseResponse::Granted(lease) = authority.handle(acquire(&actor, "n1")).await else {
            panic!("expected grant");
        };
        clock.advance(Duration::from_secs(31));
        assert_eq!(
            authority
                .handle(LeaseRequest::Renew {
                    lease_id: lease.lease_id,
                    epoch: lease.epoch,
                })
                .await,
            LeaseResponse::Expired {
                lease_id: lease.lease_id
            }
        );
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (authority, _clock) = authority();
        let actor = ActorId::new("Chat", "room1");
        let LeaseResponse::Granted(lease) = authority.handle(acquire(&actor, "n1")).await else {
            panic!("expected grant");
        };

        let release = LeaseRequest::Release {
            lease_id: lease.lease_id,
        };
        let expected = LeaseResponse::Released {
            lease_id: lease.lease_id,
        };
        assert_eq!(authority.handle(release.clone()).await, expected);
        assert_eq!(authority.handle(release).await, expected);

        assert!(matches!(
            authority.handle(acquire(&actor, "n2")).await,
            LeaseResponse::Granted(_)
        ));
    }

    #[test]
    fn test_protocol_messages_serialize() {
        let request = LeaseRequest::Renew {
            lease_id: LeaseId(7),
            epoch: Epoch(2),
        };
        let json = serde_json::to_string(&request).expect("serialize");
        let decoded: LeaseRequest = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(decoded, request);
    }
}
