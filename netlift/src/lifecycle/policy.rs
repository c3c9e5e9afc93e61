//! Caller-supplied tunables for the lifecycle components.
//!
//! Every duration serializes as whole seconds so policies can live in the
//! caller's own configuration files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, Result};

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|o| o.map(Duration::from_secs))
    }
}

fn invalid(message: impl Into<String>) -> crate::Error {
    DeviceError::InvalidConfig {
        message: message.into(),
    }
    .into()
}

/// Retry budget for the transfer verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferPolicy {
    /// Attempts including the first (default: 3).
    pub max_attempts: u32,

    /// Base delay between attempts after a transient failure; attempt `n`
    /// waits `n * backoff` (default: 5s).
    #[serde(with = "secs")]
    pub backoff: Duration,

    /// Ask the device for free space before pushing (default: true).
    pub check_free_space: bool,

    /// Timeout for re-opening a session lost mid-transfer (default: 30s).
    #[serde(with = "secs")]
    pub reconnect_timeout: Duration,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
            check_free_space: true,
            reconnect_timeout: Duration::from_secs(30),
        }
    }
}

/// Timing for the reboot coordinator.
///
/// There are no defaults for `timeout` and `poll_interval`: a fixed
/// appliance and a fully loaded chassis need very different windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebootPolicy {
    /// Upper bound on the wait, measured from the reload being issued.
    #[serde(with = "secs")]
    pub timeout: Duration,

    /// Spacing between reconnection attempts.
    #[serde(with = "secs")]
    pub poll_interval: Duration,

    /// Quiet period before the first reconnection attempt, so the old
    /// session is not mistaken for the new one. Defaults to `poll_interval`.
    #[serde(default, with = "opt_secs", skip_serializing_if = "Option::is_none")]
    pub grace_period: Option<Duration>,

    /// Timeout of a single reconnection attempt. Defaults to `poll_interval`.
    #[serde(default, with = "opt_secs", skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<Duration>,
}

impl RebootPolicy {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
            grace_period: None,
            connect_timeout: None,
        }
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = Some(grace);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn grace(&self) -> Duration {
        self.grace_period.unwrap_or(self.poll_interval)
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.connect_timeout.unwrap_or(self.poll_interval)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(invalid("reboot timeout must be greater than zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(invalid("reboot poll interval must be greater than zero"));
        }
        if self.connect_timeout.is_some_and(|t| t.is_zero()) {
            return Err(invalid("reboot connect timeout must be greater than zero"));
        }
        Ok(())
    }
}

/// Timing for the HA peer consistency wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerPolicy {
    #[serde(with = "secs")]
    pub timeout: Duration,

    #[serde(with = "secs")]
    pub poll_interval: Duration,
}

impl PeerPolicy {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(invalid("peer poll interval must be greater than zero"));
        }
        Ok(())
    }
}

fn yes() -> bool {
    true
}

/// Everything the orchestrator needs besides the device and the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradePolicy {
    #[serde(default)]
    pub transfer: TransferPolicy,

    pub reboot: RebootPolicy,

    /// Wait for the HA peer after the upgrade. `None` skips the wait.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<PeerPolicy>,

    /// Refuse to touch a unit that is not the active member of its pair.
    #[serde(default = "yes")]
    pub confirm_active: bool,

    /// Report success without doing anything when the target already runs.
    #[serde(default = "yes")]
    pub skip_if_running: bool,

    /// Read the boot target back after setting it.
    #[serde(default = "yes")]
    pub verify_boot_target: bool,

    /// HA pair key for [`PairLocks`](super::PairLocks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair: Option<String>,
}

impl UpgradePolicy {
    pub fn new(reboot: RebootPolicy) -> Self {
        Self {
            transfer: TransferPolicy::default(),
            reboot,
            peer: None,
            confirm_active: true,
            skip_if_running: true,
            verify_boot_target: true,
            pair: None,
        }
    }

    pub fn with_transfer(mut self, transfer: TransferPolicy) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn with_peer(mut self, peer: PeerPolicy) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn with_pair(mut self, pair: impl Into<String>) -> Self {
        self.pair = Some(pair.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.reboot.validate()?;
        if let Some(peer) = &self.peer {
            peer.validate()?;
        }
        Ok(())
    }
}
