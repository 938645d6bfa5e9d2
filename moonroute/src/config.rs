//! File-based routing settings.
//!
//! [`RoutingSettings`] holds every timing and capacity knob in one
//! serializable struct so a deployment can keep them in TOML. Missing
//! sections and fields fall back to defaults.
//!
//! ```toml
//! [membership]
//! heartbeat_interval_ms = 500
//! missed_heartbeats = 3
//!
//! [lease]
//! ttl_ms = 10000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::infrastructure::MembershipConfig;
use crate::runtime::{DispatchConfig, RouterConfig};

/// Errors from loading or validating settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    /// The settings are not valid TOML for this schema.
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid setting {field}: {reason}")]
    Invalid {
        /// Dotted field path.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Every routing setting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSettings {
    /// Failure detection.
    pub membership: MembershipSettings,
    /// Lease timing.
    pub lease: LeaseSettings,
    /// Route resolution.
    pub routing: ResolutionSettings,
    /// Message dispatch.
    pub dispatch: DispatchSettings,
}

/// Failure detection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipSettings {
    /// Expected interval between heartbeats.
    pub heartbeat_interval_ms: u64,
    /// Missed heartbeats before a node is suspected.
    pub missed_heartbeats: u32,
    /// Time a suspect node has to recover.
    pub suspicion_timeout_ms: u64,
    /// Interval between failure detector sweeps.
    pub sweep_interval_ms: u64,
}

impl Default for MembershipSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 1000,
            missed_heartbeats: 3,
            suspicion_timeout_ms: 5000,
            sweep_interval_ms: 500,
        }
    }
}

/// Lease settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseSettings {
    /// Lease duration. Owners renew every half TTL.
    pub ttl_ms: u64,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self { ttl_ms: 30_000 }
    }
}

/// Route resolution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionSettings {
    /// Bound on each lease manager call.
    pub coordination_timeout_ms: u64,
    /// Slow-path attempts per resolve.
    pub max_resolve_attempts: u32,
}

impl Default for ResolutionSettings {
    fn default() -> Self {
        Self {
            coordination_timeout_ms: 2000,
            max_resolve_attempts: 3,
        }
    }
}

/// Dispatch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Bound on one delivery round-trip.
    pub delivery_timeout_ms: u64,
    /// Retries after the first delivery attempt.
    pub max_retries: u32,
    /// Queued messages per actor.
    pub queue_capacity: usize,
    /// Idle time after which an actor's queue and worker are dropped.
    pub idle_timeout_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            delivery_timeout_ms: 5000,
            max_retries: 3,
            queue_capacity: 1024,
            idle_timeout_ms: 60_000,
        }
    }
}

impl RoutingSettings {
    /// Parse and validate settings from TOML text.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML, [`ConfigError::Invalid`]
    /// for out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read, parse, and validate a TOML settings file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let settings = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.as_ref().display(), "routing settings loaded");
        Ok(settings)
    }

    /// Reject values the runtime cannot work with.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(bool, &'static str, &'static str); 8] = [
            (
                self.membership.heartbeat_interval_ms == 0,
                "membership.heartbeat_interval_ms",
                "must be positive",
            ),
            (
                self.membership.missed_heartbeats == 0,
                "membership.missed_heartbeats",
                "must be at least 1",
            ),
            (
                self.membership.sweep_interval_ms == 0,
                "membership.sweep_interval_ms",
                "must be positive",
            ),
            (self.lease.ttl_ms == 0, "lease.ttl_ms", "must be positive"),
            (
                self.routing.max_resolve_attempts == 0,
                "routing.max_resolve_attempts",
                "must be at least 1",
            ),
            (
                self.dispatch.max_retries == 0,
                "dispatch.max_retries",
                "must be at least 1",
            ),
            (
                self.dispatch.queue_capacity == 0,
                "dispatch.queue_capacity",
                "must be at least 1",
            ),
            (
                self.dispatch.idle_timeout_ms == 0,
                "dispatch.idle_timeout_ms",
                "must be positive",
            ),
        ];
        match checks.into_iter().find(|(failed, _, _)| *failed) {
            Some((_, field, reason)) => Err(ConfigError::Invalid { field, reason }),
            None => Ok(()),
        }
    }

    /// Failure detector timing.
    pub fn membership_config(&self) -> MembershipConfig {
        MembershipConfig {
            heartbeat_interval: Duration::from_millis(self.membership.heartbeat_interval_ms),
            missed_heartbeats: self.membership.missed_heartbeats,
            suspicion_timeout: Duration::from_millis(self.membership.suspicion_timeout_ms),
        }
    }

    /// Interval between failure detector sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.membership.sweep_interval_ms)
    }

    /// Heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.membership.heartbeat_interval_ms)
    }

    /// Lease duration.
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease.ttl_ms)
    }

    /// Router tuning.
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            coordination_timeout: Duration::from_millis(self.routing.coordination_timeout_ms),
            max_resolve_attempts: self.routing.max_resolve_attempts,
        }
    }

    /// Dispatcher tuning.
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            delivery_timeout: Duration::from_millis(self.dispatch.delivery_timeout_ms),
            max_retries: self.dispatch.max_retries,
            queue_capacity: self.dispatch.queue_capacity,
            idle_timeout: Duration::from_millis(self.dispatch.idle_timeout_ms),
        }
    }
}
