//! RoutingNode: the routing core of a single node.
//!
//! [`RoutingNode`] ties together membership, leases, the router, and the
//! dispatcher into a single entry point, and runs the node's background
//! tasks: heartbeats, lease renewal, and (optionally) the failure detector.
//!
//! # Builder API
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use moonroute::*;
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let cluster = ClusterConfig::builder().name("chat").build()?;
//! let transport = Arc::new(InMemoryTransport::new());
//!
//! let mut node = RoutingNode::new(cluster, NodeConfig::for_node(NodeId::new("node-a")?))
//!     .with_transport(transport)
//!     .start()
//!     .await?;
//!
//! let room = ActorId::new("Chat", "room1");
//! let outcome = node.call(&room, "post", b"hello".to_vec()).await?;
//! println!("delivered via {}", outcome.route());
//!
//! node.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Lifecycle
//!
//! 1. **Initializing**: router built and subscribed, node joined
//! 2. **Active**: heartbeating, renewing leases, dispatching
//! 3. **Stopping**: tasks cancelled, queues closed, leases released
//! 4. **Stopped**: node has left the directory

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ErrorKind;
use crate::infrastructure::{
    LeaseKeeper, LeaseManager, ListenerId, MembershipError, NodeDirectory, NodeStatus,
};
use crate::runtime::{
    ActorRouter, CorrelationId, DispatchError, MessageDispatcher, MessageEnvelope,
    PendingDelivery, RouterError, SendOutcome, Transport,
};
use crate::time::TimeProvider;
use crate::types::{ActorId, NodeId, Route};

use super::cluster::ClusterConfig;
use super::config::NodeConfig;

/// Lifecycle state of a [`RoutingNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeLifecycle {
    /// Joining the cluster.
    Initializing,
    /// Routing and dispatching.
    Active,
    /// Shutting down: draining background tasks.
    Stopping,
    /// Left the cluster.
    Stopped,
}

/// Routing core for a single node.
///
/// Use [`RoutingNode::new`] to start building.
pub struct RoutingNode {
    node_id: NodeId,
    cluster: ClusterConfig,
    router: Arc<ActorRouter>,
    dispatcher: MessageDispatcher,
    keeper: LeaseKeeper,
    router_listener: ListenerId,
    status: NodeLifecycle,
    next_correlation: AtomicU64,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for RoutingNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingNode")
            .field("node_id", &self.node_id)
            .field("status", &self.status)
            .field("cluster", &self.cluster.name())
            .finish()
    }
}

impl RoutingNode {
    /// Create a builder for a node in the given cluster.
    ///
    /// # Arguments
    ///
    /// * `cluster` - Shared cluster state (directory, leases, clock)
    /// * `config` - Per-node settings (identity, placement override)
    #[allow(clippy::new_ret_no_self)]
    pub fn new(cluster: ClusterConfig, config: NodeConfig) -> RoutingNodeBuilder {
        RoutingNodeBuilder {
            cluster,
            config,
            transport: None,
        }
    }

    /// This node's identity.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> NodeLifecycle {
        self.status
    }

    /// The cluster this node belongs to.
    pub fn cluster(&self) -> &ClusterConfig {
        &self.cluster
    }

    /// The node's router.
    pub fn router(&self) -> &Arc<ActorRouter> {
        &self.router
    }

    /// The node's dispatcher.
    pub fn dispatcher(&self) -> &MessageDispatcher {
        &self.dispatcher
    }

    /// Resolve `actor` to a route. See [`ActorRouter::resolve`].
    ///
    /// # Errors
    ///
    /// As [`ActorRouter::resolve`].
    pub async fn resolve(&self, actor: &ActorId, hint: Option<&Route>) -> Result<Route, RouterError> {
        self.router.resolve(actor, hint).await
    }

    /// Send `envelope` to `actor` and wait for the outcome.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Closed`] after shutdown, otherwise as
    /// [`MessageDispatcher::send`].
    pub async fn send(
        &self,
        actor: &ActorId,
        envelope: MessageEnvelope,
    ) -> Result<SendOutcome, DispatchError> {
        self.dispatcher.send(actor, envelope).await
    }

    /// Enqueue `envelope` for `actor` without waiting.
    ///
    /// # Errors
    ///
    /// As [`MessageDispatcher::submit`].
    pub fn submit(
        &self,
        actor: &ActorId,
        envelope: MessageEnvelope,
    ) -> Result<PendingDelivery, DispatchError> {
        self.dispatcher.submit(actor, envelope)
    }

    /// Build an envelope with a fresh correlation id and send it.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send).
    pub async fn call(
        &self,
        actor: &ActorId,
        method_name: impl Into<String>,
        payload: Vec<u8>,
    ) -> Result<SendOutcome, DispatchError> {
        let envelope = MessageEnvelope::new(actor, method_name, payload, self.next_correlation_id());
        self.send(actor, envelope).await
    }

    /// A correlation id unique within this node.
    pub fn next_correlation_id(&self) -> CorrelationId {
        CorrelationId(self.next_correlation.fetch_add(1, Ordering::Relaxed))
    }

    /// Nodes currently `Active`, sorted.
    pub fn list_active(&self) -> BTreeSet<NodeId> {
        self.cluster.directory().list_active()
    }

    /// Effective membership status of any node.
    ///
    /// # Errors
    ///
    /// [`MembershipError::UnknownNode`] if the node was never seen.
    pub fn member_status(&self, node: &NodeId) -> Result<NodeStatus, MembershipError> {
        self.cluster.directory().status(node)
    }

    /// Gracefully shut down the node.
    ///
    /// Stops the background tasks, closes every dispatch queue, releases
    /// the node's leases, and leaves the directory. Other nodes see the
    /// departure immediately and drop their routes to this node.
    ///
    /// Calling it again after the node stopped is a no-op.
    ///
    /// # Errors
    ///
    /// [`NodeError::Membership`] if the directory no longer knows the node.
    pub async fn shutdown(&mut self) -> Result<(), NodeError> {
        if self.status == NodeLifecycle::Stopped {
            return Ok(());
        }
        self.status = NodeLifecycle::Stopping;

        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                tracing::warn!(node = %self.node_id, error = %err, "background task failed");
            }
        }

        self.dispatcher.shutdown();
        let released = self.keeper.release_all().await;
        self.cluster.directory().unsubscribe(self.router_listener);
        let left = self.cluster.directory().leave(&self.node_id).await;

        self.status = NodeLifecycle::Stopped;
        tracing::info!(node = %self.node_id, released, "node stopped");
        left.map_err(NodeError::from)
    }
}

impl Drop for RoutingNode {
    fn drop(&mut self) {
        self.cancel.cancel();
        if self.status != NodeLifecycle::Stopped {
            self.cluster.directory().unsubscribe(self.router_listener);
        }
    }
}

/// Builder for [`RoutingNode`].
///
/// Collects the transport, then joins the cluster during
/// [`start()`](Self::start).
pub struct RoutingNodeBuilder {
    cluster: ClusterConfig,
    config: NodeConfig,
    transport: Option<Arc<dyn Transport>>,
}

impl RoutingNodeBuilder {
    /// Set the transport used to deliver messages (required).
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Join the cluster and start the node.
    ///
    /// The node is `Active` in the directory and ready to route when this
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the node id or transport is missing, or if a
    /// live node with the same id is already a member.
    pub async fn start(self) -> Result<RoutingNode, NodeError> {
        let transport = self.transport.ok_or(NodeError::MissingTransport)?;
        let node_id = self
            .config
            .node_id()
            .cloned()
            .ok_or(NodeError::MissingNodeId)?;

        let cluster = self.cluster;
        let directory = cluster.directory().clone();
        let clock = cluster.clock().clone();
        let settings = cluster.settings().clone();

        if directory.is_live(&node_id) {
            return Err(NodeError::DuplicateNode { node: node_id });
        }

        let placement = self
            .config
            .placement()
            .cloned()
            .unwrap_or_else(|| cluster.placement().clone());
        let router = Arc::new(ActorRouter::new(
            directory.clone(),
            cluster.leases().clone(),
            placement,
            settings.router_config(),
        ));
        let router_listener = directory.subscribe(router.clone());

        directory.join(node_id.clone()).await;
        if let Err(err) = directory.heartbeat(&node_id, clock.now()) {
            directory.unsubscribe(router_listener);
            return Err(err.into());
        }

        let keeper = LeaseKeeper::new(
            node_id.clone(),
            cluster.leases().clone(),
            clock.clone(),
            settings.lease_ttl(),
        );
        let dispatcher =
            MessageDispatcher::new(router.clone(), transport, settings.dispatch_config());

        let cancel = CancellationToken::new();
        let mut tasks = vec![
            tokio::spawn(heartbeat_loop(
                directory.clone(),
                clock,
                node_id.clone(),
                settings.heartbeat_interval(),
                cancel.child_token(),
            )),
            tokio::spawn(keeper.clone().run(cancel.child_token())),
        ];
        let lease_sweeper = self
            .config
            .runs_failure_detector()
            .then(|| cluster.leases().clone());
        tasks.push(tokio::spawn(purge_loop(
            router.clone(),
            lease_sweeper,
            cluster.clock().clone(),
            settings.lease_ttl(),
            cancel.child_token(),
        )));
        if self.config.runs_failure_detector() {
            tasks.push(tokio::spawn(
                directory
                    .clone()
                    .run_failure_detector(settings.sweep_interval(), cancel.child_token()),
            ));
        }

        tracing::info!(
            node = %node_id,
            cluster = cluster.name().unwrap_or("-"),
            "node started"
        );

        Ok(RoutingNode {
            node_id,
            cluster,
            router,
            dispatcher,
            keeper,
            router_listener,
            status: NodeLifecycle::Active,
            next_correlation: AtomicU64::new(1),
            cancel,
            tasks,
        })
    }
}

async fn heartbeat_loop(
    directory: Arc<NodeDirectory>,
    clock: Arc<dyn TimeProvider>,
    node: NodeId,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = clock.sleep(interval) => {
                if let Err(err) = directory.heartbeat(&node, clock.now()) {
                    tracing::warn!(node = %node, error = %err, "heartbeat rejected, rejoining");
                    directory.join(node.clone()).await;
                    if let Err(err) = directory.heartbeat(&node, clock.now()) {
                        tracing::error!(node = %node, error = %err, "rejoin failed");
                    }
                }
            }
        }
    }
    tracing::debug!(node = %node, "heartbeat loop stopped");
}

/// Drops expired routes from this node's cache every `interval`. The node
/// running the failure detector also purges the shared lease table.
async fn purge_loop(
    router: Arc<ActorRouter>,
    leases: Option<Arc<dyn LeaseManager>>,
    clock: Arc<dyn TimeProvider>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = clock.sleep(interval) => {
                router.purge_expired();
                if let Some(leases) = &leases {
                    let purged = leases.purge_expired().await;
                    if purged > 0 {
                        tracing::debug!(leases = purged, "expired leases purged");
                    }
                }
            }
        }
    }
}

/// Errors from [`RoutingNode`] operations.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The transport was not set on the builder.
    #[error("node requires a transport (call with_transport())")]
    MissingTransport,

    /// The node id was not set in [`NodeConfig`].
    #[error("node requires an id (set it in NodeConfig)")]
    MissingNodeId,

    /// A live node with this id is already a member.
    #[error("node {node} is already a live member")]
    DuplicateNode {
        /// The node.
        node: NodeId,
    },

    /// Directory operation failed.
    #[error("membership error: {0}")]
    Membership(#[from] MembershipError),
}

impl NodeError {
    /// Error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Membership(err) => err.kind(),
            Self::MissingTransport | Self::MissingNodeId | Self::DuplicateNode { .. } => {
                ErrorKind::Other
            }
        }
    }
}
