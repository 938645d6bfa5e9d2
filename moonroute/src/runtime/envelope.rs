//! Message envelope carried to an actor's activation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{ActorId, AddressableKey};

/// Correlates a request with its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(pub u64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "corr-{}", self.0)
    }
}

/// One message addressed to an actor.
///
/// The payload is opaque; encoding it is the caller's business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Target contract type.
    pub actor_type: String,
    /// Target key, absent for key-less actors.
    pub actor_key: Option<AddressableKey>,
    /// Method being invoked.
    pub method_name: String,
    /// Encoded arguments.
    pub payload: Vec<u8>,
    /// Request/response correlation.
    pub correlation_id: CorrelationId,
}

impl MessageEnvelope {
    /// Build an envelope addressed to `target`.
    pub fn new(
        target: &ActorId,
        method_name: impl Into<String>,
        payload: Vec<u8>,
        correlation_id: CorrelationId,
    ) -> Self {
        let key = target.key();
        Self {
            actor_type: target.type_name().to_string(),
            actor_key: (!key.is_none()).then(|| key.clone()),
            method_name: method_name.into(),
            payload,
            correlation_id,
        }
    }

    /// The actor this envelope is addressed to.
    pub fn target(&self) -> ActorId {
        match &self.actor_key {
            Some(key) => ActorId::new(self.actor_type.clone(), key.clone()),
            None => ActorId::keyless(self.actor_type.clone()),
        }
    }
}
