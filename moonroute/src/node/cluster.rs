//! Cluster configuration: state shared by every node of a cluster.
//!
//! [`ClusterConfig`] bundles the clock, node directory, lease manager, and
//! default placement strategy. Nodes running in one process share the same
//! `ClusterConfig`, giving them a single membership and lease view.
//!
//! # Example
//!
//! ```rust
//! use moonroute::ClusterConfig;
//!
//! let cluster = ClusterConfig::builder()
//!     .name("chat")
//!     .build()
//!     .expect("default settings are valid");
//! assert_eq!(cluster.name(), Some("chat"));
//! ```

use std::fmt;
use std::sync::Arc;

use crate::config::{ConfigError, RoutingSettings};
use crate::infrastructure::{
    HashPlacement, LeaseInvalidation, LeaseManager, LeaseTable, NodeDirectory, PlacementStrategy,
};
use crate::time::{TimeProvider, TokioTimeProvider};

/// Shared cluster state.
#[derive(Clone)]
pub struct ClusterConfig {
    name: Option<String>,
    settings: RoutingSettings,
    clock: Arc<dyn TimeProvider>,
    directory: Arc<NodeDirectory>,
    leases: Arc<dyn LeaseManager>,
    placement: Arc<dyn PlacementStrategy>,
}

impl fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("directory", &self.directory)
            .field("leases", &self.leases)
            .field("placement", &self.placement)
            .finish()
    }
}

impl ClusterConfig {
    /// Start building a cluster configuration.
    pub fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::default()
    }

    /// Optional cluster name (for logging).
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Timing and capacity settings.
    pub fn settings(&self) -> &RoutingSettings {
        &self.settings
    }

    /// The shared clock.
    pub fn clock(&self) -> &Arc<dyn TimeProvider> {
        &self.clock
    }

    /// The shared node directory.
    pub fn directory(&self) -> &Arc<NodeDirectory> {
        &self.directory
    }

    /// The shared lease manager.
    pub fn leases(&self) -> &Arc<dyn LeaseManager> {
        &self.leases
    }

    /// Default placement strategy.
    pub fn placement(&self) -> &Arc<dyn PlacementStrategy> {
        &self.placement
    }
}

/// Builder for [`ClusterConfig`].
#[derive(Default)]
pub struct ClusterConfigBuilder {
    name: Option<String>,
    settings: Option<RoutingSettings>,
    clock: Option<Arc<dyn TimeProvider>>,
    leases: Option<Arc<dyn LeaseManager>>,
    placement: Option<Arc<dyn PlacementStrategy>>,
}

impl ClusterConfigBuilder {
    /// Set the cluster name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set timing and capacity settings. Defaults to [`RoutingSettings::default`].
    pub fn settings(mut self, settings: RoutingSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Set the clock. Defaults to [`TokioTimeProvider`].
    pub fn clock(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the lease manager. Defaults to a [`LeaseTable`] on the cluster clock.
    pub fn lease_manager(mut self, leases: Arc<dyn LeaseManager>) -> Self {
        self.leases = Some(leases);
        self
    }

    /// Set the default placement strategy. Defaults to [`HashPlacement`].
    pub fn placement(mut self, placement: Arc<dyn PlacementStrategy>) -> Self {
        self.placement = Some(placement);
        self
    }

    /// Build the cluster configuration.
    ///
    /// Creates the node directory and wires lease invalidation to node
    /// departures.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings fail validation.
    pub fn build(self) -> Result<ClusterConfig, ClusterConfigError> {
        let settings = self.settings.unwrap_or_default();
        settings.validate()?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(TokioTimeProvider::new()));
        let directory = Arc::new(NodeDirectory::new(
            settings.membership_config(),
            clock.clone(),
        ));
        let leases = self
            .leases
            .unwrap_or_else(|| Arc::new(LeaseTable::new(settings.lease_ttl(), clock.clone())));
        let placement = self.placement.unwrap_or_else(|| Arc::new(HashPlacement));

        directory.subscribe(Arc::new(LeaseInvalidation::new(leases.clone())));

        Ok(ClusterConfig {
            name: self.name,
            settings,
            clock,
            directory,
            leases,
            placement,
        })
    }
}

/// Errors from building a [`ClusterConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ClusterConfigError {
    /// The settings are invalid.
    #[error("invalid cluster settings: {0}")]
    Settings(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::infrastructure::RendezvousPlacement;
    use crate::time::ManualTimeProvider;
    use crate::types::{ActorId, NodeId};

    #[test]
    fn test_builder_defaults() {
        let cluster = ClusterConfig::builder().build().expect("build");
        assert_eq!(cluster.name(), None);
        assert_eq!(cluster.settings(), &RoutingSettings::default());
        assert_eq!(
            cluster.directory().config(),
            &RoutingSettings::default().membership_config()
        );
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let mut settings = RoutingSettings::default();
        settings.lease.ttl_ms = 0;
        let err = ClusterConfig::builder()
            .settings(settings)
            .build()
            .expect_err("zero ttl");
        assert!(matches!(err, ClusterConfigError::Settings(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_custom_placement() {
        let cluster = ClusterConfig::builder()
            .placement(Arc::new(RendezvousPlacement::new(7)))
            .build()
            .expect("build");
        let actor = ActorId::new("Chat", "room1");
        let nodes = vec![NodeId::new("n1").expect("id"), NodeId::new("n2").expect("id")];
        assert_eq!(
            cluster.placement().select_node(&actor, &nodes),
            RendezvousPlacement::new(7).select_node(&actor, &nodes)
        );
    }

    #[tokio::test]
    async fn test_departure_invalidates_leases() {
        let clock = ManualTimeProvider::new();
        let cluster = ClusterConfig::builder()
            .clock(Arc::new(clock.clone()))
            .build()
            .expect("build");
        let node = NodeId::new("n1").expect("id");
        let actor = ActorId::new("Chat", "room1");

        cluster.directory().join(node.clone()).await;
        cluster.leases().acquire(&actor, &node).await.expect("acquire");
        clock.advance(Duration::from_secs(60));
        cluster.directory().sweep().await;

        assert_eq!(cluster.leases().current(&actor).await, None);
        assert!(cluster.leases().held_by(&node).await.is_empty());
    }
}
