//! Shared fixtures for the routing tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use moonroute::{
    ActorRouter, HashPlacement, LeaseInvalidation, LeaseManager, LeaseTable, ManualTimeProvider,
    MembershipConfig, NodeDirectory, NodeId, RouterConfig, TimeProvider,
};

pub const TTL: Duration = Duration::from_secs(30);

pub fn node(id: &str) -> NodeId {
    NodeId::new(id).expect("valid node id")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A manually clocked cluster with one router per node.
pub struct Cluster {
    pub clock: ManualTimeProvider,
    pub directory: Arc<NodeDirectory>,
    pub leases: Arc<dyn LeaseManager>,
    pub routers: Vec<(NodeId, Arc<ActorRouter>)>,
}

impl Cluster {
    pub async fn new(ids: &[&str]) -> Self {
        init_tracing();
        let clock = ManualTimeProvider::new();
        let time: Arc<dyn TimeProvider> = Arc::new(clock.clone());
        let directory = Arc::new(NodeDirectory::new(MembershipConfig::default(), time.clone()));
        let leases: Arc<dyn LeaseManager> = Arc::new(LeaseTable::new(TTL, time));
        directory.subscribe(Arc::new(LeaseInvalidation::new(leases.clone())));

        let mut routers = Vec::new();
        for id in ids {
            let router = Arc::new(ActorRouter::new(
                directory.clone(),
                leases.clone(),
                Arc::new(HashPlacement),
                RouterConfig::default(),
            ));
            directory.subscribe(router.clone());
            directory.join(node(id)).await;
            routers.push((node(id), router));
        }

        let cluster = Self {
            clock,
            directory,
            leases,
            routers,
        };
        cluster.heartbeat(ids);
        cluster
    }

    pub fn router(&self, id: &str) -> Arc<ActorRouter> {
        self.routers
            .iter()
            .find(|(node_id, _)| node_id.as_str() == id)
            .map(|(_, router)| router.clone())
            .expect("router for node")
    }

    pub fn heartbeat(&self, ids: &[&str]) {
        for id in ids {
            self.directory
                .heartbeat(&node(id), self.clock.now())
                .expect("heartbeat");
        }
    }

    /// Move the clock in one-second steps, heartbeating `alive` each step.
    pub fn advance(&self, by: Duration, alive: &[&str]) {
        let step = Duration::from_secs(1);
        let mut elapsed = Duration::ZERO;
        while elapsed < by {
            let tick = step.min(by - elapsed);
            self.clock.advance(tick);
            elapsed += tick;
            self.heartbeat(alive);
        }
    }

    /// Time after which a silent node is `Left`.
    pub fn departure_delay(&self) -> Duration {
        self.directory.config().departed_after()
    }
}
