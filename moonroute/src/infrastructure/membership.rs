//! Node directory: tracks cluster members and their liveness.
//!
//! Heartbeats are the only failure signal. A node that stops heartbeating
//! becomes `Suspect` after K missed intervals and `Left` once the
//! suspicion timeout passes without a heartbeat.
//!
//! # Design
//!
//! - Records live in a sharded map, so writers for one node are serialized
//!   and distinct nodes proceed in parallel.
//! - Reads compute the *effective* status from the clock. A node whose
//!   heartbeats have gone stale is never reported `Active`, even if no
//!   [`sweep`](NodeDirectory::sweep) has run yet.
//! - `sweep` persists time-driven transitions. Nodes reaching `Left` are
//!   removed, tombstoned, and announced to every [`DepartureListener`] so
//!   leases and cached routes pointing at them are invalidated.
//!
//! # Orleans Reference
//!
//! Corresponds to Orleans' `MembershipTableManager` together with the
//! `ClusterHealthMonitor` suspect and declare-dead cycle, collapsed into
//! one in-process table.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ErrorKind;
use crate::time::TimeProvider;
use crate::types::NodeId;

/// Monotonically increasing membership version.
///
/// Every persisted change (join, status transition, departure) bumps it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct MembershipVersion(pub u64);

impl MembershipVersion {
    /// Return the next version.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for MembershipVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Liveness status of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Announced, no heartbeat yet.
    Joining,
    /// Heartbeating within the timeout window.
    Active,
    /// Missed K consecutive heartbeats.
    Suspect,
    /// Departed, gracefully or by failure detection.
    Left,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Joining => write!(f, "Joining"),
            Self::Active => write!(f, "Active"),
            Self::Suspect => write!(f, "Suspect"),
            Self::Left => write!(f, "Left"),
        }
    }
}

/// Membership record for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// The member.
    pub node_id: NodeId,
    /// Last persisted status.
    pub status: NodeStatus,
    /// Timestamp of the newest accepted heartbeat.
    pub last_heartbeat: Duration,
    /// When the node joined.
    pub joined_at: Duration,
}

impl NodeRecord {
    fn joining(node_id: NodeId, now: Duration) -> Self {
        Self {
            node_id,
            status: NodeStatus::Joining,
            last_heartbeat: now,
            joined_at: now,
        }
    }
}

/// Point-in-time view of the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipSnapshot {
    /// Version the snapshot was taken at.
    pub version: MembershipVersion,
    /// Members sorted by node id, with effective statuses.
    pub members: Vec<NodeRecord>,
}

impl MembershipSnapshot {
    /// Active members, sorted.
    pub fn active_members(&self) -> Vec<NodeId> {
        self.members
            .iter()
            .filter(|r| r.status == NodeStatus::Active)
            .map(|r| r.node_id.clone())
            .collect()
    }

    /// Look up a member.
    pub fn get(&self, node: &NodeId) -> Option<&NodeRecord> {
        self.members.iter().find(|r| &r.node_id == node)
    }
}

/// Failure detector timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MembershipConfig {
    /// Expected interval between heartbeats.
    pub heartbeat_interval: Duration,
    /// Consecutive missed heartbeats before a node is suspected (K).
    pub missed_heartbeats: u32,
    /// How long a suspect node has to heartbeat before it is declared gone.
    pub suspicion_timeout: Duration,
}

impl MembershipConfig {
    /// Silence after which a node is suspected.
    pub fn suspect_after(&self) -> Duration {
        self.heartbeat_interval * self.missed_heartbeats
    }

    /// Silence after which a node is declared departed.
    pub fn departed_after(&self) -> Duration {
        self.suspect_after() + self.suspicion_timeout
    }
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(1000),
            missed_heartbeats: 3,
            suspicion_timeout: Duration::from_millis(5000),
        }
    }
}

/// Errors from node directory operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MembershipError {
    /// The node was never seen by this directory.
    #[error("unknown node: {node}")]
    UnknownNode {
        /// The node.
        node: NodeId,
    },

    /// The node has left, or timed out and awaits its sweep.
    #[error("node {node} has departed")]
    Departed {
        /// The node.
        node: NodeId,
    },
}

impl MembershipError {
    /// Error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownNode { .. } => ErrorKind::Other,
            Self::Departed { .. } => ErrorKind::NodeDeparted,
        }
    }
}

/// Handle returned by [`NodeDirectory::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Notified when a node reaches `Left`.
#[async_trait]
pub trait DepartureListener: Send + Sync {
    /// Invalidate everything tied to `node`.
    async fn node_departed(&self, node: &NodeId);
}

/// The cluster membership table.
pub struct NodeDirectory {
    config: MembershipConfig,
    clock: Arc<dyn TimeProvider>,
    records: DashMap<NodeId, NodeRecord>,
    departed: DashMap<NodeId, Duration>,
    version: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn DepartureListener>)>>,
    next_listener: AtomicU64,
}

impl fmt::Debug for NodeDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDirectory")
            .field("config", &self.config)
            .field("members", &self.records.len())
            .field("version", &self.version())
            .finish()
    }
}

impl NodeDirectory {
    /// Create an empty directory.
    pub fn new(config: MembershipConfig, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            config,
            clock,
            records: DashMap::new(),
            departed: DashMap::new(),
            version: AtomicU64::new(0),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    /// Failure detector timing.
    pub fn config(&self) -> &MembershipConfig {
        &self.config
    }

    /// The directory's clock.
    pub fn clock(&self) -> &Arc<dyn TimeProvider> {
        &self.clock
    }

    /// Current membership version.
    pub fn version(&self) -> MembershipVersion {
        MembershipVersion(self.version.load(Ordering::Acquire))
    }

    fn bump(&self) -> MembershipVersion {
        MembershipVersion(self.version.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Register a departure listener. Listeners run in registration order.
    pub fn subscribe(&self, listener: Arc<dyn DepartureListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Remove a departure listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    fn effective_status(&self, record: &NodeRecord, now: Duration) -> NodeStatus {
        if record.status == NodeStatus::Left {
            return NodeStatus::Left;
        }
        let silent = now.saturating_sub(record.last_heartbeat);
        if silent > self.config.departed_after() {
            NodeStatus::Left
        } else if silent > self.config.suspect_after() && record.status != NodeStatus::Joining {
            NodeStatus::Suspect
        } else {
            record.status
        }
    }

    /// Add a node as `Joining`. Joining twice is a no-op.
    ///
    /// A node whose previous incarnation timed out but was not swept yet
    /// is departed first, so listeners still see that departure.
    pub async fn join(&self, node: NodeId) -> MembershipVersion {
        let now = self.clock.now();
        let timed_out = self
            .records
            .remove_if(&node, |_, r| self.effective_status(r, now) == NodeStatus::Left)
            .is_some();
        if timed_out {
            self.bump();
            tracing::info!(node = %node, "previous incarnation departed before rejoin");
            self.notify_departed(&node).await;
        }

        let inserted = match self.records.entry(node.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(NodeRecord::joining(node.clone(), now));
                true
            }
        };

        if inserted {
            self.departed.remove(&node);
            let version = self.bump();
            tracing::info!(node = %node, version = %version, "node joined");
            version
        } else {
            tracing::debug!(node = %node, "join of existing member ignored");
            self.version()
        }
    }

    /// Record a heartbeat and return the node's resulting status.
    ///
    /// Heartbeats older than the newest accepted one are ignored.
    ///
    /// # Errors
    ///
    /// [`MembershipError::Departed`] if the node has left (including a
    /// timeout not yet swept), [`MembershipError::UnknownNode`] if it never
    /// joined.
    pub fn heartbeat(&self, node: &NodeId, at: Duration) -> Result<NodeStatus, MembershipError> {
        let now = self.clock.now();
        let Some(mut record) = self.records.get_mut(node) else {
            if self.departed.contains_key(node) {
                return Err(MembershipError::Departed { node: node.clone() });
            }
            return Err(MembershipError::UnknownNode { node: node.clone() });
        };

        let current = self.effective_status(&record, now);
        if current == NodeStatus::Left {
            return Err(MembershipError::Departed { node: node.clone() });
        }
        if at < record.last_heartbeat {
            tracing::debug!(node = %node, at = ?at, last = ?record.last_heartbeat, "stale heartbeat ignored");
            return Ok(current);
        }

        record.last_heartbeat = at;
        let previous = record.status;
        record.status = NodeStatus::Active;
        if previous != NodeStatus::Active {
            let version = self.bump();
            tracing::info!(node = %node, from = %previous, to = %NodeStatus::Active, version = %version, "node status changed");
        }
        Ok(self.effective_status(&record, now))
    }

    /// Nodes currently `Active`, sorted.
    pub fn list_active(&self) -> BTreeSet<NodeId> {
        let now = self.clock.now();
        self.records
            .iter()
            .filter(|entry| self.effective_status(entry.value(), now) == NodeStatus::Active)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Effective status of a node. Departed nodes report `Left`.
    ///
    /// # Errors
    ///
    /// [`MembershipError::UnknownNode`] if the node was never seen.
    pub fn status(&self, node: &NodeId) -> Result<NodeStatus, MembershipError> {
        if let Some(record) = self.records.get(node) {
            return Ok(self.effective_status(&record, self.clock.now()));
        }
        if self.departed.contains_key(node) {
            return Ok(NodeStatus::Left);
        }
        Err(MembershipError::UnknownNode { node: node.clone() })
    }

    /// Returns true if the node is known and not `Left`.
    pub fn is_live(&self, node: &NodeId) -> bool {
        matches!(
            self.status(node),
            Ok(NodeStatus::Joining | NodeStatus::Active | NodeStatus::Suspect)
        )
    }

    /// Versioned view with effective statuses. Departed nodes are omitted.
    pub fn snapshot(&self) -> MembershipSnapshot {
        let now = self.clock.now();
        let version = self.version();
        let mut members: Vec<NodeRecord> = self
            .records
            .iter()
            .map(|entry| {
                let mut record = entry.value().clone();
                record.status = self.effective_status(&record, now);
                record
            })
            .collect();
        members.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        MembershipSnapshot { version, members }
    }

    /// Gracefully remove a node. Leaving twice is a no-op.
    ///
    /// # Errors
    ///
    /// [`MembershipError::UnknownNode`] if the node was never seen.
    pub async fn leave(&self, node: &NodeId) -> Result<(), MembershipError> {
        if self.records.remove(node).is_none() {
            if self.departed.contains_key(node) {
                return Ok(());
            }
            return Err(MembershipError::UnknownNode { node: node.clone() });
        }
        self.departed.insert(node.clone(), self.clock.now());
        let version = self.bump();
        tracing::info!(node = %node, version = %version, "node left");
        self.notify_departed(node).await;
        Ok(())
    }

    /// Persist time-driven transitions and return the nodes that departed.
    pub async fn sweep(&self) -> Vec<NodeId> {
        let now = self.clock.now();
        let mut suspected = Vec::new();
        let mut timed_out = Vec::new();
        for entry in self.records.iter() {
            match self.effective_status(entry.value(), now) {
                NodeStatus::Left => timed_out.push(entry.key().clone()),
                NodeStatus::Suspect if entry.value().status != NodeStatus::Suspect => {
                    suspected.push(entry.key().clone())
                }
                _ => {}
            }
        }

        for node in suspected {
            if let Some(mut record) = self.records.get_mut(&node) {
                if self.effective_status(&record, now) == NodeStatus::Suspect {
                    let previous = record.status;
                    record.status = NodeStatus::Suspect;
                    let version = self.bump();
                    tracing::info!(node = %node, from = %previous, to = %NodeStatus::Suspect, version = %version, "node status changed");
                }
            }
        }

        let mut departed = Vec::new();
        for node in timed_out {
            let removed = self
                .records
                .remove_if(&node, |_, r| self.effective_status(r, now) == NodeStatus::Left);
            if let Some((_, record)) = removed {
                self.departed.insert(node.clone(), now);
                let version = self.bump();
                tracing::info!(
                    node = %node,
                    last_heartbeat = ?record.last_heartbeat,
                    version = %version,
                    "node declared departed"
                );
                departed.push(node);
            }
        }

        for node in &departed {
            self.notify_departed(node).await;
        }
        departed
    }

    async fn notify_departed(&self, node: &NodeId) {
        let listeners: Vec<Arc<dyn DepartureListener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener.node_departed(node).await;
        }
    }

    /// Run [`sweep`](Self::sweep) every `interval` until cancelled.
    pub async fn run_failure_detector(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.clock.sleep(interval) => {
                    self.sweep().await;
                }
            }
        }
        tracing::debug!("failure detector stopped");
    }
}
