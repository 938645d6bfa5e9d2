//! Error classification shared by every component.
//!
//! Each component has its own error enum; [`ErrorKind`] is the common
//! taxonomy callers branch on.

use std::fmt;

/// Classification of routing failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Placement had no candidate node.
    NoEligibleNode,
    /// Another node holds the lease.
    LeaseConflict,
    /// The lease is no longer valid.
    LeaseExpired,
    /// A route hint refers to a lease or node that is gone.
    StaleRoute,
    /// No active node exists at all.
    Unroutable,
    /// The addressed node left the cluster.
    NodeDeparted,
    /// A coordination or delivery deadline passed.
    Timeout,
    /// Anything else: configuration, shutdown, collaborator failures.
    Other,
}

impl ErrorKind {
    /// Whether re-resolving and retrying can make progress.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::LeaseConflict | Self::LeaseExpired | Self::StaleRoute | Self::NodeDeparted
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoEligibleNode => "no-eligible-node",
            Self::LeaseConflict => "lease-conflict",
            Self::LeaseExpired => "lease-expired",
            Self::StaleRoute => "stale-route",
            Self::Unroutable => "unroutable",
            Self::NodeDeparted => "node-departed",
            Self::Timeout => "timeout",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}
