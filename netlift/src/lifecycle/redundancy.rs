//! Redundancy guard: only touch the active unit, and check the pair after.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};
use serde::Serialize;
use tokio::time::Instant;

use super::policy::PeerPolicy;
use crate::device::{Device, RedundancyRole, RedundancyState};
use crate::error::{DeviceError, Result};

/// Confirm the unit is safe to disrupt.
///
/// Units that are not part of a pair, including platforms without HA,
/// pass with role `none`. A paired unit must report itself active.
pub async fn ensure_active<D: Device + ?Sized>(device: &mut D) -> Result<RedundancyState> {
    let state = match device.redundancy_state().await {
        Ok(state) => state,
        Err(e) if e.is_unsupported() => {
            debug!("{}: no redundancy support, treating as standalone", device.host());
            return Ok(RedundancyState::standalone());
        }
        Err(e) => return Err(e),
    };

    if state.is_paired() && state.role != RedundancyRole::Active {
        warn!(
            "{}: refusing disruptive action on {} unit",
            device.host(),
            state.role
        );
        return Err(DeviceError::NotActive {
            host: device.host().to_string(),
            role: state.role.to_string(),
            peer_role: state
                .peer_role
                .map(|r| r.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        }
        .into());
    }
    Ok(state)
}

/// Result of waiting for an HA pair to settle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "state", rename_all = "snake_case")]
pub enum PeerConsistency {
    Synced(RedundancyState),
    /// The peer never became reachable or consistent within the timeout.
    Desync(RedundancyState),
}

impl PeerConsistency {
    pub fn state(&self) -> &RedundancyState {
        match self {
            PeerConsistency::Synced(s) | PeerConsistency::Desync(s) => s,
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, PeerConsistency::Synced(_))
    }
}

/// Poll the redundancy state until the pair reports consistent or
/// `policy.timeout` elapses.
///
/// A standalone unit is synced immediately. Connection trouble while
/// polling is retried until the deadline; the last state observed is
/// returned either way.
pub async fn await_peer_consistency<D: Device + ?Sized>(
    device: &mut D,
    policy: &PeerPolicy,
) -> Result<PeerConsistency> {
    policy.validate()?;
    let host = device.host().to_string();
    let deadline = Instant::now() + policy.timeout;
    let mut last: Option<RedundancyState> = None;

    loop {
        let poll_start = Instant::now();

        let reachable = device.is_open()
            || match device
                .open(policy.poll_interval.min(deadline.saturating_duration_since(poll_start)))
                .await
            {
                Ok(()) => true,
                Err(e) if e.is_transient() => {
                    debug!("{}: reconnect for peer check failed: {}", host, e);
                    false
                }
                Err(e) => return Err(e),
            };

        if reachable {
            let polled = match tokio::time::timeout_at(deadline, device.redundancy_state()).await {
                Ok(polled) => polled,
                Err(_) => {
                    debug!("{}: redundancy poll still running at the deadline", host);
                    let _ = device.close().await;
                    break;
                }
            };
            match polled {
                Ok(state) if state.is_synced() => {
                    info!("{}: redundancy pair synced ({:?})", host, state.detail);
                    return Ok(PeerConsistency::Synced(state));
                }
                Ok(state) => {
                    debug!(
                        "{}: peer not ready (reachable={}, consistent={})",
                        host, state.peer_reachable, state.peer_consistent
                    );
                    last = Some(state);
                }
                Err(e) if e.is_unsupported() => {
                    return Ok(PeerConsistency::Synced(RedundancyState::standalone()));
                }
                Err(e) if e.is_transient() => {
                    debug!("{}: redundancy poll failed: {}", host, e);
                }
                Err(e) => return Err(e),
            }
        }

        let next = poll_start + policy.poll_interval;
        if next >= deadline {
            break;
        }
        tokio::time::sleep_until(next).await;
    }

    let state = last.unwrap_or(RedundancyState {
        role: RedundancyRole::Unknown,
        peer_role: None,
        peer_reachable: false,
        peer_consistent: false,
        detail: Some("no redundancy state observed".to_string()),
    });
    warn!(
        "{}: redundancy pair not consistent after {:?}",
        host, policy.timeout
    );
    Ok(PeerConsistency::Desync(state))
}

/// Caller-owned registry of HA pairs with a run in progress.
///
/// Clones share the same registry. Pass one to every
/// [`Upgrader`](super::Upgrader) that may target the same pairs.
#[derive(Debug, Clone, Default)]
pub struct PairLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl PairLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `pair`, or fail with `Conflict` if another run holds it.
    pub fn try_acquire(&self, pair: &str) -> Result<PairLease> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(pair.to_string()) {
            return Err(DeviceError::Conflict {
                pair: pair.to_string(),
            }
            .into());
        }
        Ok(PairLease {
            pair: pair.to_string(),
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, pair: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(pair)
    }
}

/// Claim on an HA pair; released on drop.
#[derive(Debug)]
pub struct PairLease {
    pair: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl PairLease {
    pub fn pair(&self) -> &str {
        &self.pair
    }
}

impl Drop for PairLease {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.pair);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_support::MockDevice;

    fn paired(role: RedundancyRole, peer_reachable: bool) -> RedundancyState {
        RedundancyState {
            role,
            peer_role: Some(match role {
                RedundancyRole::Active => RedundancyRole::Standby,
                _ => RedundancyRole::Active,
            }),
            peer_reachable,
            peer_consistent: peer_reachable,
            detail: None,
        }
    }

    #[tokio::test]
    async fn test_ensure_active() {
        let mut device = MockDevice::new("wlc1", "8.5.161.0");
        device.redundancy.push_back(paired(RedundancyRole::Active, true));
        let state = ensure_active(&mut device).await.unwrap();
        assert_eq!(state.role, RedundancyRole::Active);

        let mut device = MockDevice::new("wlc2", "8.5.161.0");
        device.redundancy.push_back(paired(RedundancyRole::Standby, true));
        let err = ensure_active(&mut device).await.unwrap_err();
        match err {
            crate::Error::Device(DeviceError::NotActive {
                host,
                role,
                peer_role,
            }) => {
                assert_eq!(host, "wlc2");
                assert_eq!(role, "standby");
                assert_eq!(peer_role, "active");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_ensure_active_rejects_unknown_role() {
        let mut device = MockDevice::new("wlc1", "8.5.161.0");
        device.redundancy.push_back(RedundancyState {
            role: RedundancyRole::Unknown,
            peer_role: None,
            peer_reachable: false,
            peer_consistent: false,
            detail: Some("Initialization".to_string()),
        });
        assert!(ensure_active(&mut device).await.is_err());
    }

    #[test]
    fn test_ensure_active_standalone() {
        let mut device = MockDevice::new("sw1", "old.bin");
        let state = tokio_test::block_on(ensure_active(&mut device)).unwrap();
        assert_eq!(state.role, RedundancyRole::None);

        device.redundancy.push_back(RedundancyState::standalone());
        assert!(tokio_test::block_on(ensure_active(&mut device)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_becomes_consistent() {
        let mut device = MockDevice::new("wlc1", "8.5.161.0");
        device.redundancy.extend([
            paired(RedundancyRole::Active, false),
            paired(RedundancyRole::Active, false),
            paired(RedundancyRole::Active, true),
        ]);

        let start = Instant::now();
        let result = await_peer_consistency(
            &mut device,
            &PeerPolicy::new(Duration::from_secs(300), Duration::from_secs(10)),
        )
        .await
        .unwrap();
        assert!(result.is_synced());
        assert_eq!(start.elapsed(), Duration::from_secs(20));
        assert_eq!(device.count("redundancy_state"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_peer_is_desync() {
        let mut device = MockDevice::new("wlc1", "8.5.161.0");
        device.redundancy.push_back(paired(RedundancyRole::Active, false));

        let start = Instant::now();
        let result = await_peer_consistency(
            &mut device,
            &PeerPolicy::new(Duration::from_secs(60), Duration::from_secs(10)),
        )
        .await
        .unwrap();
        assert!(!result.is_synced());
        assert!(!result.state().peer_reachable);
        assert!(start.elapsed() <= Duration::from_secs(60));
        assert_eq!(device.count("redundancy_state"), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_redundancy_query_stops_at_deadline() {
        let mut device = MockDevice::new("wlc1", "8.5.161.0");
        device.redundancy.push_back(paired(RedundancyRole::Active, true));
        device.redundancy_delay = Duration::from_secs(3600);

        let start = Instant::now();
        let result = await_peer_consistency(
            &mut device,
            &PeerPolicy::new(Duration::from_secs(60), Duration::from_secs(10)),
        )
        .await
        .unwrap();
        assert!(!result.is_synced());
        assert_eq!(start.elapsed(), Duration::from_secs(60));
        assert_eq!(device.count("redundancy_state"), 1);
        assert!(!device.is_open());
    }

    #[tokio::test]
    async fn test_pair_lease() {
        let locks = PairLocks::new();
        let lease = locks.try_acquire("wlc-ha-1").unwrap();
        assert_eq!(lease.pair(), "wlc-ha-1");
        assert!(locks.is_held("wlc-ha-1"));

        let err = locks.clone().try_acquire("wlc-ha-1").unwrap_err();
        assert!(matches!(err, crate::Error::Device(DeviceError::Conflict { .. })));
        assert!(locks.try_acquire("wlc-ha-2").is_ok());

        drop(lease);
        assert!(!locks.is_held("wlc-ha-1"));
        assert!(locks.try_acquire("wlc-ha-1").is_ok());
    }
}
