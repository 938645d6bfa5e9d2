//! Route cache keyed by actor identity.

use std::time::Duration;

use dashmap::DashMap;
use rapidhash::RapidBuildHasher;

use crate::types::{ActorId, NodeId, Route};

/// Last route the router handed out for each actor.
///
/// Entries are hints only: the router re-validates them before use.
#[derive(Debug)]
pub struct RouteCache {
    entries: DashMap<ActorId, Route, RapidBuildHasher>,
}

impl RouteCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: DashMap::with_hasher(RapidBuildHasher::default()),
        }
    }

    /// Store or replace the route for `actor`.
    pub fn insert(&self, actor: ActorId, route: Route) {
        self.entries.insert(actor, route);
    }

    /// The cached route for `actor`.
    pub fn get(&self, actor: &ActorId) -> Option<Route> {
        self.entries.get(actor).map(|entry| entry.value().clone())
    }

    /// Drop the entry for `actor`.
    pub fn invalidate(&self, actor: &ActorId) -> bool {
        self.entries.remove(actor).is_some()
    }

    /// Drop the entry for `actor` only if it is still `route`.
    ///
    /// Keeps a newer route installed by a concurrent resolver.
    pub fn invalidate_route(&self, actor: &ActorId, route: &Route) -> bool {
        self.entries
            .remove_if(actor, |_, cached| cached == route)
            .is_some()
    }

    /// Drop every route through `node`. Returns the affected actors.
    pub fn invalidate_node(&self, node: &NodeId) -> Vec<ActorId> {
        let mut affected = Vec::new();
        self.entries.retain(|actor, route| {
            let stale = route.traverses(node);
            if stale {
                affected.push(actor.clone());
            }
            !stale
        });
        affected
    }

    /// Drop every route whose lease binding expired at or before `now`.
    /// Unbound routes are kept.
    pub fn purge_expired(&self, now: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, route| {
            route
                .binding()
                .map_or(true, |binding| now < binding.expires_at)
        });
        before.saturating_sub(self.entries.len())
    }

    /// Number of cached routes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RouteCache {
    fn default() -> Self {
        Self::new()
    }
}
