//! Routing infrastructure: membership, placement, and leases.

pub(crate) mod authority;
pub(crate) mod keeper;
pub(crate) mod lease;
pub(crate) mod membership;
pub(crate) mod placement;

pub use authority::{LeaseAuthority, LeaseRequest, LeaseResponse};
pub use keeper::{LeaseKeeper, RenewalReport};
pub use lease::{Lease, LeaseError, LeaseInvalidation, LeaseManager, LeaseTable};
pub use membership::{
    DepartureListener, ListenerId, MembershipConfig, MembershipError, MembershipSnapshot,
    MembershipVersion, NodeDirectory, NodeRecord, NodeStatus,
};
pub use placement::{
    identity_hash, HashPlacement, PlacementError, PlacementStrategy, PreferLocalPlacement,
    RendezvousPlacement,
};
