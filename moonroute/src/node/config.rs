//! Per-node configuration for [`RoutingNode`](super::RoutingNode).
//!
//! Separates node-level settings (identity, placement override) from
//! cluster-level settings ([`ClusterConfig`](super::ClusterConfig)).

use std::sync::Arc;

use crate::infrastructure::PlacementStrategy;
use crate::types::NodeId;

/// Per-node configuration.
///
/// # Example
///
/// ```rust
/// use moonroute::{NodeConfig, NodeId};
///
/// let node = NodeId::new("node-a").expect("non-empty");
/// let config = NodeConfig::for_node(node.clone());
/// assert_eq!(config.node_id(), Some(&node));
/// assert!(config.runs_failure_detector());
/// ```
#[derive(Debug, Clone)]
pub struct NodeConfig {
    node_id: Option<NodeId>,
    placement: Option<Arc<dyn PlacementStrategy>>,
    failure_detector: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            placement: None,
            failure_detector: true,
        }
    }
}

impl NodeConfig {
    /// A config with only the node identity set.
    pub fn for_node(node_id: NodeId) -> Self {
        Self {
            node_id: Some(node_id),
            ..Self::default()
        }
    }

    /// Start building a node configuration.
    pub fn builder() -> NodeConfigBuilder {
        NodeConfigBuilder {
            config: Self::default(),
        }
    }

    /// The node identity, if set.
    pub fn node_id(&self) -> Option<&NodeId> {
        self.node_id.as_ref()
    }

    /// Placement override. Falls back to the cluster default when unset.
    pub fn placement(&self) -> Option<&Arc<dyn PlacementStrategy>> {
        self.placement.as_ref()
    }

    /// Whether this node sweeps the shared directory for failed nodes.
    pub fn runs_failure_detector(&self) -> bool {
        self.failure_detector
    }
}

/// Builder for [`NodeConfig`].
#[derive(Debug, Clone)]
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    /// Set the node identity.
    pub fn node_id(mut self, node_id: NodeId) -> Self {
        self.config.node_id = Some(node_id);
        self
    }

    /// Override the cluster's placement strategy for routes resolved here.
    pub fn placement(mut self, placement: Arc<dyn PlacementStrategy>) -> Self {
        self.config.placement = Some(placement);
        self
    }

    /// Enable or disable the failure detector loop. Enabled by default.
    ///
    /// One sweeper per directory is enough; in-process clusters with many
    /// nodes can turn it off on all but one.
    pub fn failure_detector(mut self, enabled: bool) -> Self {
        self.config.failure_detector = enabled;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> NodeConfig {
        self.config
    }
}
