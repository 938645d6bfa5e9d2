//! Actor router: resolves an actor identity to a route.
//!
//! # Flow
//!
//! 1. A lease-bound hint whose hops are all `Active` and whose lease has not
//!    expired is returned unchanged, without touching the lease manager.
//! 2. A hint bound to an expired lease is refreshed if the owner renewed
//!    that same lease; otherwise it is reported as [`RouterError::StaleRoute`].
//! 3. A hint pointing at a node that is no longer `Active` is stale too.
//! 4. Otherwise the route cache is consulted with the same validity check.
//! 5. Otherwise the slow path runs: reuse the current lease if its owner is
//!    live (revoke it if not), else place and acquire. A lease conflict adopts
//!    the winner, so concurrent resolvers converge on one route.
//!
//! Every lease manager call is bounded by the coordination timeout.
//!
//! # Orleans Reference
//!
//! This corresponds to Orleans' `GrainLocator` plus its location cache:
//! cached addresses are trusted until proven stale, then looked up again.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ErrorKind;
use crate::infrastructure::{
    DepartureListener, Lease, LeaseError, LeaseManager, NodeDirectory, NodeStatus,
    PlacementError, PlacementStrategy,
};
use crate::runtime::cache::RouteCache;
use crate::types::{ActorId, LeaseBinding, LeaseId, NodeId, Route};

/// Errors from route resolution.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// No node is active.
    #[error("no active node can host {actor}")]
    Unroutable {
        /// The actor.
        actor: ActorId,
    },

    /// The hint refers to an expired lease or a node that is gone.
    #[error("route to {actor} is stale (lease {lease_id})")]
    StaleRoute {
        /// The actor.
        actor: ActorId,
        /// Lease the hint was bound to.
        lease_id: LeaseId,
    },

    /// Placement failed.
    #[error("placement error: {0}")]
    Placement(#[from] PlacementError),

    /// The lease manager refused a request.
    #[error("lease error: {0}")]
    Lease(#[from] LeaseError),

    /// The lease manager did not answer in time.
    #[error("lease coordination for {actor} timed out after {timeout:?}")]
    CoordinationTimeout {
        /// The actor.
        actor: ActorId,
        /// The bound that passed.
        timeout: Duration,
    },

    /// Leases kept changing hands for every attempt.
    #[error("could not settle a lease for {actor} after {attempts} attempts")]
    Contended {
        /// The actor.
        actor: ActorId,
        /// Attempts made.
        attempts: u32,
    },
}

impl RouterError {
    /// Error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unroutable { .. } => ErrorKind::Unroutable,
            Self::StaleRoute { .. } => ErrorKind::StaleRoute,
            Self::Placement(err) => err.kind(),
            Self::Lease(err) => err.kind(),
            Self::CoordinationTimeout { .. } => ErrorKind::Timeout,
            Self::Contended { .. } => ErrorKind::LeaseConflict,
        }
    }
}

/// Router tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    /// Bound on each lease manager call.
    pub coordination_timeout: Duration,
    /// Slow-path attempts before giving up with [`RouterError::Contended`].
    pub max_resolve_attempts: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            coordination_timeout: Duration::from_millis(2000),
            max_resolve_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Validity {
    Valid,
    LeaseExpired,
    NodeGone,
}

/// Resolves actor identities to routes.
pub struct ActorRouter {
    directory: Arc<NodeDirectory>,
    leases: Arc<dyn LeaseManager>,
    placement: Arc<dyn PlacementStrategy>,
    cache: RouteCache,
    config: RouterConfig,
}

impl fmt::Debug for ActorRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRouter")
            .field("placement", &self.placement)
            .field("cached_routes", &self.cache.len())
            .field("config", &self.config)
            .finish()
    }
}

impl ActorRouter {
    /// Create a router.
    pub fn new(
        directory: Arc<NodeDirectory>,
        leases: Arc<dyn LeaseManager>,
        placement: Arc<dyn PlacementStrategy>,
        config: RouterConfig,
    ) -> Self {
        Self {
            directory,
            leases,
            placement,
            cache: RouteCache::new(),
            config,
        }
    }

    /// The node directory this router consults.
    pub fn directory(&self) -> &Arc<NodeDirectory> {
        &self.directory
    }

    /// The route cache.
    pub fn cache(&self) -> &RouteCache {
        &self.cache
    }

    /// Resolve `actor` to a route, trying `hint` first.
    ///
    /// # Errors
    ///
    /// - [`RouterError::Unroutable`] if no node is active.
    /// - [`RouterError::StaleRoute`] if `hint` is bound to a lease or node
    ///   that is no longer valid. Resolve again without the hint.
    /// - [`RouterError::CoordinationTimeout`] if the lease manager is slow.
    #[tracing::instrument(skip_all, fields(actor = %actor))]
    pub async fn resolve(&self, actor: &ActorId, hint: Option<&Route>) -> Result<Route, RouterError> {
        if let Some(hint) = hint {
            if let Some(binding) = hint.binding() {
                return self.check_hint(actor, hint, binding).await;
            }
        }

        if let Some(cached) = self.cache.get(actor) {
            if self.validity(&cached) == Validity::Valid {
                return Ok(cached);
            }
            self.cache.invalidate_route(actor, &cached);
        }

        self.resolve_slow(actor).await
    }

    /// Drop cached routes whose lease has expired. Returns how many.
    pub fn purge_expired(&self) -> usize {
        let purged = self.cache.purge_expired(self.directory.clock().now());
        if purged > 0 {
            tracing::debug!(routes = purged, "expired routes purged");
        }
        purged
    }

    /// Forget `route` for `actor` after a delivery failure.
    pub fn invalidate(&self, actor: &ActorId, route: &Route) {
        self.cache.invalidate_route(actor, route);
    }

    fn validity(&self, route: &Route) -> Validity {
        let Some(binding) = route.binding() else {
            return Validity::NodeGone;
        };
        if route.hops().is_empty() {
            return Validity::NodeGone;
        }
        if self.directory.clock().now() >= binding.expires_at {
            return Validity::LeaseExpired;
        }
        let all_active = route
            .hops()
            .iter()
            .all(|hop| self.directory.status(hop) == Ok(NodeStatus::Active));
        if all_active {
            Validity::Valid
        } else {
            Validity::NodeGone
        }
    }

    async fn check_hint(
        &self,
        actor: &ActorId,
        hint: &Route,
        binding: &LeaseBinding,
    ) -> Result<Route, RouterError> {
        if &binding.actor != actor {
            tracing::warn!(route = %hint, bound_to = %binding.actor, "hint bound to another actor");
            return Err(RouterError::StaleRoute {
                actor: actor.clone(),
                lease_id: binding.lease_id,
            });
        }

        match self.validity(hint) {
            Validity::Valid => return Ok(hint.clone()),
            Validity::LeaseExpired => {
                if let Some(route) = self.refresh(actor, binding).await? {
                    return Ok(route);
                }
            }
            Validity::NodeGone => {}
        }

        self.cache.invalidate_route(actor, hint);
        tracing::warn!(route = %hint, lease_id = %binding.lease_id, "stale route");
        Err(RouterError::StaleRoute {
            actor: actor.clone(),
            lease_id: binding.lease_id,
        })
    }

    /// Re-bind a hint whose lease was renewed after the hint was issued.
    async fn refresh(
        &self,
        actor: &ActorId,
        binding: &LeaseBinding,
    ) -> Result<Option<Route>, RouterError> {
        let current = self.coordinate(actor, self.leases.current(actor)).await?;
        let renewed = current.filter(|lease| {
            lease.lease_id == binding.lease_id
                && lease.epoch == binding.epoch
                && self.directory.status(&lease.owner) == Ok(NodeStatus::Active)
        });
        Ok(renewed.map(|lease| self.install(actor, &lease)))
    }

    async fn resolve_slow(&self, actor: &ActorId) -> Result<Route, RouterError> {
        let attempts = self.config.max_resolve_attempts.max(1);
        for attempt in 1..=attempts {
            let candidates: Vec<NodeId> = self.directory.list_active().into_iter().collect();
            if candidates.is_empty() {
                return Err(RouterError::Unroutable {
                    actor: actor.clone(),
                });
            }

            if let Some(lease) = self.coordinate(actor, self.leases.current(actor)).await? {
                if self.directory.is_live(&lease.owner) {
                    return Ok(self.install(actor, &lease));
                }
                self.coordinate(actor, self.leases.revoke(&lease)).await?;
            }

            let target = self.placement.select_node(actor, &candidates)?;
            match self
                .coordinate(actor, self.leases.acquire(actor, &target))
                .await?
            {
                Ok(lease) => return Ok(self.install(actor, &lease)),
                Err(LeaseError::Conflict { winner }) => {
                    if self.directory.is_live(&winner.owner) {
                        tracing::debug!(owner = %winner.owner, attempt, "adopting concurrent lease winner");
                        return Ok(self.install(actor, &winner));
                    }
                    self.coordinate(actor, self.leases.revoke(&winner)).await?;
                }
                Err(err) => return Err(err.into()),
            }
            tracing::debug!(attempt, "lease changed hands, retrying resolution");
        }

        Err(RouterError::Contended {
            actor: actor.clone(),
            attempts,
        })
    }

    fn install(&self, actor: &ActorId, lease: &Lease) -> Route {
        let route = lease.route();
        self.cache.insert(actor.clone(), route.clone());
        tracing::debug!(route = %route, "route resolved");
        route
    }

    async fn coordinate<T>(
        &self,
        actor: &ActorId,
        call: impl Future<Output = T>,
    ) -> Result<T, RouterError> {
        tokio::time::timeout(self.config.coordination_timeout, call)
            .await
            .map_err(|_| {
                tracing::warn!(timeout = ?self.config.coordination_timeout, "lease coordination timed out");
                RouterError::CoordinationTimeout {
                    actor: actor.clone(),
                    timeout: self.config.coordination_timeout,
                }
            })
    }
}

#[async_trait]
impl DepartureListener for ActorRouter {
    async fn node_departed(&self, node: &NodeId) {
        let dropped = self.cache.invalidate_node(node);
        if !dropped.is_empty() {
            tracing::debug!(node = %node, routes = dropped.len(), "cached routes dropped");
        }
    }
}
