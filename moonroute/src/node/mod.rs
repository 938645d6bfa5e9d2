//! Node assembly: cluster-wide state, per-node settings, and lifecycle.

mod cluster;
mod config;
mod lifecycle;

pub use cluster::{ClusterConfig, ClusterConfigBuilder, ClusterConfigError};
pub use config::{NodeConfig, NodeConfigBuilder};
pub use lifecycle::{NodeError, NodeLifecycle, RoutingNode, RoutingNodeBuilder};
