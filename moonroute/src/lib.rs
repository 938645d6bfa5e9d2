//! # Moonroute
//!
//! Addressing, placement, and routing for virtual actors.
//!
//! An actor is named by an [`ActorId`] and never by its location. Moonroute
//! decides which node hosts each actor, guarantees that at most one node
//! holds an actor at a time, and carries messages to that node in order.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  RoutingNode                                                │
//! │  heartbeat loop · lease keeper · failure detector           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  MessageDispatcher        per-actor FIFO queue, retries     │
//! │        │                                                    │
//! │        ▼                                                    │
//! │  ActorRouter ──► RouteCache   hint → cache → lease → place  │
//! ├──────────────┬──────────────────────┬───────────────────────┤
//! │ NodeDirectory│  LeaseManager        │  PlacementStrategy    │
//! │ join/leave   │  acquire/renew/      │  hash · rendezvous ·  │
//! │ heartbeats   │  release/invalidate  │  prefer-local         │
//! └──────────────┴──────────────────────┴───────────────────────┘
//! ```
//!
//! Node departures flow upward: the [`NodeDirectory`] notifies the lease
//! manager first, then every router, so no route to a departed node
//! survives the departure.
//!
//! ## Quick Start
//!
//! ```rust
//! use moonroute::{Actor, ActorId};
//!
//! enum Counter {}
//!
//! impl Actor for Counter {
//!     const TYPE_NAME: &'static str = "Counter";
//!     type Key = i64;
//! }
//!
//! let id = ActorId::of::<Counter>(42);
//! assert_eq!(id.to_string(), "Counter/42");
//! ```
//!
//! See [`RoutingNode`] for running a node.
//!
//! ## Orleans Reference
//!
//! The lease table stands in for Orleans' grain directory, leases for
//! activation registrations, and the dispatcher for the caller side of
//! `MessageCenter`.

#![deny(missing_docs)]

mod config;
mod error;
mod infrastructure;
mod node;
mod runtime;
mod time;
mod types;

pub use config::{
    ConfigError, DispatchSettings, LeaseSettings, MembershipSettings, ResolutionSettings,
    RoutingSettings,
};
pub use error::ErrorKind;
pub use infrastructure::{
    identity_hash, DepartureListener, HashPlacement, Lease, LeaseAuthority, LeaseError,
    LeaseInvalidation, LeaseKeeper, LeaseManager, LeaseRequest, LeaseResponse, LeaseTable,
    ListenerId, MembershipConfig, MembershipError, MembershipSnapshot, MembershipVersion,
    NodeDirectory, NodeRecord, NodeStatus, PlacementError, PlacementStrategy,
    PreferLocalPlacement, RenewalReport, RendezvousPlacement,
};
pub use node::{
    ClusterConfig, ClusterConfigBuilder, ClusterConfigError, NodeConfig, NodeConfigBuilder,
    NodeError, NodeLifecycle, RoutingNode, RoutingNodeBuilder,
};
pub use runtime::{
    ActorRouter, CorrelationId, Delivery, DispatchConfig, DispatchError, InMemoryTransport,
    MessageDispatcher, MessageEnvelope, PendingDelivery, RouteCache, RouterConfig, RouterError,
    SendOutcome, Transport, TransportError,
};
pub use time::{ManualTimeProvider, TimeProvider, TokioTimeProvider};
pub use types::{
    Actor, ActorId, ActorKey, Addressable, AddressableKey, CompoundKey, Epoch, IdentityError,
    LeaseBinding, LeaseId, NoKey, NodeId, Route,
};
