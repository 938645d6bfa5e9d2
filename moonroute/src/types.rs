//! Core identity and routing types.
//!
//! These types name virtual actors independently of where they run and
//! describe how to reach the node currently hosting them.
//!
//! # Design
//!
//! - [`NodeId`] is an opaque cluster member identifier.
//! - [`Addressable`] is a plain `(type-name, key)` identity. It can name
//!   anything, but it cannot be routed.
//! - [`ActorId`] is the identity of an actor *contract*: routable and
//!   activatable, backed by exactly one activation at a time. Only
//!   `ActorId`s are accepted by the router and dispatcher.
//! - [`Actor`] describes a contract type at compile time. It has no
//!   constructor, so implement it on an uninhabited enum.
//! - [`Route`] is a non-empty list of node hops, optionally bound to the
//!   lease it was derived from.
//!
//! # Orleans Reference
//!
//! `ActorId` plays the role of Orleans' `GrainId`, `NodeId` of
//! `SiloAddress`, and a lease-bound `Route` of a cached `GrainAddress`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors from constructing identity or routing values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// A node identifier must not be empty.
    #[error("node id cannot be empty")]
    EmptyNodeId,

    /// A route needs at least one hop.
    #[error("route must contain at least one hop")]
    EmptyRoute,
}

/// Opaque, globally unique identifier for a cluster member.
///
/// Usually a `host:port` string, but nothing here interprets it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Create a node identifier.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::EmptyNodeId`] for an empty string.
    pub fn new(id: impl Into<String>) -> Result<Self, IdentityError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdentityError::EmptyNodeId);
        }
        Ok(Self(id))
    }

    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for NodeId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for NodeId {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NodeId> for String {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key half of an addressable identity.
///
/// Orleans-style key shapes: none, string, integer, or an integer with a
/// string extension.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AddressableKey {
    /// Singleton addressables with no key.
    None,
    /// String key (`"room1"`, `"player-42"`).
    String(String),
    /// Integer key.
    Integer(i64),
    /// Integer key with a string extension.
    Compound {
        /// Integer part.
        primary: i64,
        /// String extension.
        extension: String,
    },
}

impl AddressableKey {
    /// Returns true for key-less identities.
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Stable byte encoding used for hashing.
    ///
    /// A tag byte precedes the key so `String("1")` and `Integer(1)` never
    /// collide.
    pub(crate) fn write_canonical(&self, out: &mut Vec<u8>) {
        match self {
            Self::None => out.push(0),
            Self::String(s) => {
                out.push(1);
                out.extend_from_slice(s.as_bytes());
            }
            Self::Integer(n) => {
                out.push(2);
                out.extend_from_slice(&n.to_be_bytes());
            }
            Self::Compound { primary, extension } => {
                out.push(3);
                out.extend_from_slice(&primary.to_be_bytes());
                out.extend_from_slice(extension.as_bytes());
            }
        }
    }
}

impl fmt::Display for AddressableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::String(s) => f.write_str(s),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Compound { primary, extension } => write!(f, "{primary}+{extension}"),
        }
    }
}

impl From<&str> for AddressableKey {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AddressableKey {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for AddressableKey {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

/// Plain `(type-name, key)` identity.
///
/// Stable for the lifetime of the logical entity. Data-bearing values use
/// this directly; routable contracts wrap it in [`ActorId`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Addressable {
    type_name: String,
    key: AddressableKey,
}

impl Addressable {
    /// Create an addressable identity.
    pub fn new(type_name: impl Into<String>, key: impl Into<AddressableKey>) -> Self {
        Self {
            type_name: type_name.into(),
            key: key.into(),
        }
    }

    /// Create a key-less addressable identity.
    pub fn keyless(type_name: impl Into<String>) -> Self {
        Self::new(type_name, AddressableKey::None)
    }

    /// The type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The key.
    pub fn key(&self) -> &AddressableKey {
        &self.key
    }

    pub(crate) fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.type_name.len() + 16);
        out.extend_from_slice(self.type_name.as_bytes());
        out.push(0xff);
        self.key.write_canonical(&mut out);
        out
    }
}

impl fmt::Display for Addressable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.key.is_none() {
            f.write_str(&self.type_name)
        } else {
            write!(f, "{}/{}", self.type_name, self.key)
        }
    }
}

/// Identity of a routable actor contract.
///
/// # Examples
///
/// ```rust
/// use moonroute::ActorId;
///
/// let room = ActorId::new("Chat", "room1");
/// assert_eq!(room.to_string(), "Chat/room1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(Addressable);

impl ActorId {
    /// Create an actor identity from a type name and key.
    pub fn new(type_name: impl Into<String>, key: impl Into<AddressableKey>) -> Self {
        Self(Addressable::new(type_name, key))
    }

    /// Create the identity of a key-less actor.
    pub fn keyless(type_name: impl Into<String>) -> Self {
        Self(Addressable::keyless(type_name))
    }

    /// Create the identity of a typed actor contract.
    pub fn of<A: Actor>(key: A::Key) -> Self {
        Self::new(A::TYPE_NAME, key.into_key())
    }

    /// The underlying plain identity.
    pub fn addressable(&self) -> &Addressable {
        &self.0
    }

    /// The contract type name.
    pub fn type_name(&self) -> &str {
        self.0.type_name()
    }

    /// The key.
    pub fn key(&self) -> &AddressableKey {
        self.0.key()
    }

    pub(crate) fn canonical_bytes(&self) -> Vec<u8> {
        self.0.canonical_bytes()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

mod sealed {
    pub trait Sealed {}

    impl Sealed for super::NoKey {}
    impl Sealed for String {}
    impl Sealed for i64 {}
    impl Sealed for super::CompoundKey {}
}

/// Key shape of an actor contract. Sealed: only the shapes below exist.
pub trait ActorKey: sealed::Sealed + Send + Sync + 'static {
    /// Convert into the dynamic key representation.
    fn into_key(self) -> AddressableKey;
}

/// Key shape for singleton contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NoKey;

/// Integer key with a string extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompoundKey {
    /// Integer part.
    pub primary: i64,
    /// String extension.
    pub extension: String,
}

impl ActorKey for NoKey {
    fn into_key(self) -> AddressableKey {
        AddressableKey::None
    }
}

impl ActorKey for String {
    fn into_key(self) -> AddressableKey {
        AddressableKey::String(self)
    }
}

impl ActorKey for i64 {
    fn into_key(self) -> AddressableKey {
        AddressableKey::Integer(self)
    }
}

impl ActorKey for CompoundKey {
    fn into_key(self) -> AddressableKey {
        AddressableKey::Compound {
            primary: self.primary,
            extension: self.extension,
        }
    }
}

/// An actor contract: routable, activatable, never instantiated directly.
///
/// # Example
///
/// ```rust
/// use moonroute::{Actor, ActorId};
///
/// enum ChatRoom {}
///
/// impl Actor for ChatRoom {
///     const TYPE_NAME: &'static str = "Chat";
///     type Key = String;
/// }
///
/// let id = ActorId::of::<ChatRoom>("room1".to_string());
/// assert_eq!(id, ActorId::new("Chat", "room1"));
/// ```
pub trait Actor: 'static {
    /// Stable type name shared by every node.
    const TYPE_NAME: &'static str;

    /// Key shape of this contract.
    type Key: ActorKey;
}

/// Unique identifier of a lease grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub u64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lease-{:016x}", self.0)
    }
}

/// Per-actor grant counter. Increases on every new lease for the same actor.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Epoch(pub u64);

impl Epoch {
    /// Return the next epoch.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// The lease a route was derived from.
///
/// Lets the router check a route without asking the lease manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseBinding {
    /// Actor the lease was granted for.
    pub actor: ActorId,
    /// Lease the route was built from.
    pub lease_id: LeaseId,
    /// Epoch of that lease.
    pub epoch: Epoch,
    /// Lease expiry as seen when the route was issued.
    pub expires_at: Duration,
}

/// Resolved path to an actor activation.
///
/// Immutable: a stale route is discarded and replaced, never patched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RouteRepr")]
pub struct Route {
    hops: Vec<NodeId>,
    binding: Option<LeaseBinding>,
}

/// Wire shape of [`Route`], checked before it becomes one.
#[derive(Deserialize)]
struct RouteRepr {
    hops: Vec<NodeId>,
    #[serde(default)]
    binding: Option<LeaseBinding>,
}

impl TryFrom<RouteRepr> for Route {
    type Error = IdentityError;

    fn try_from(repr: RouteRepr) -> Result<Self, Self::Error> {
        let mut route = Self::with_hops(repr.hops)?;
        route.binding = repr.binding;
        Ok(route)
    }
}

impl Route {
    /// Single-hop route with no lease binding.
    pub fn direct(node: NodeId) -> Self {
        Self {
            hops: vec![node],
            binding: None,
        }
    }

    /// Multi-hop route with no lease binding.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::EmptyRoute`] if `hops` is empty.
    pub fn with_hops(hops: Vec<NodeId>) -> Result<Self, IdentityError> {
        if hops.is_empty() {
            return Err(IdentityError::EmptyRoute);
        }
        Ok(Self {
            hops,
            binding: None,
        })
    }

    pub(crate) fn bound(node: NodeId, binding: LeaseBinding) -> Self {
        Self {
            hops: vec![node],
            binding: Some(binding),
        }
    }

    /// All hops in order.
    pub fn hops(&self) -> &[NodeId] {
        &self.hops
    }

    /// The node hosting the activation (last hop).
    pub fn destination(&self) -> &NodeId {
        // hops is never empty
        &self.hops[self.hops.len() - 1]
    }

    /// The first node a message is sent to.
    pub fn first_hop(&self) -> &NodeId {
        &self.hops[0]
    }

    /// Number of hops.
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    /// Always false: routes are never empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// True for single-hop routes.
    pub fn is_direct(&self) -> bool {
        self.hops.len() == 1
    }

    /// Lease binding, for routes issued by the router.
    pub fn binding(&self) -> Option<&LeaseBinding> {
        self.binding.as_ref()
    }

    /// Returns true if any hop is `node`.
    pub fn traverses(&self, node: &NodeId) -> bool {
        self.hops.iter().any(|hop| hop == node)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, hop) in self.hops.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{hop}")?;
        }
        if let Some(binding) = &self.binding {
            write!(f, " [{} {}]", binding.lease_id, binding.epoch)?;
        }
        Ok(())
    }
}
