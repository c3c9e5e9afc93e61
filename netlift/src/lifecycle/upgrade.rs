//! Upgrade orchestrator.
//!
//! ```text
//! PreflightCheck -> TransferVerified -> PreStaged -> BootTargetSet
//!   -> Rebooted -> Reconnected -> VersionValidated
//!   -> [PeerConsistency] -> PostStageRestored -> Done
//! ```
//!
//! Phases run strictly in order against one device. Every exit path
//! resolves to an [`UpgradeOutcome`] naming the phase it stopped in.

use log::{debug, info, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::outcome::{OutcomeKind, UpgradeOutcome, UpgradePhase};
use super::policy::UpgradePolicy;
use super::reboot::{RebootPhase, RebootTrigger, reboot_into};
use super::redundancy::{PairLocks, PeerConsistency, await_peer_consistency, ensure_active};
use super::transfer::{TransferRequest, verify_transfer};
use crate::device::{BootTarget, Device, StagedChanges};
use crate::error::Error;

/// Progress of one run.
struct Run {
    outcome: UpgradeOutcome,
    phase_started: Instant,
    staged: StagedChanges,
}

impl Run {
    fn new(host: &str, target: &BootTarget) -> Self {
        Self {
            outcome: UpgradeOutcome::new(host, target),
            phase_started: Instant::now(),
            staged: StagedChanges::default(),
        }
    }

    fn close_phase(&mut self) {
        self.outcome
            .durations
            .insert(self.outcome.phase, self.phase_started.elapsed());
    }

    fn enter(&mut self, phase: UpgradePhase) {
        self.close_phase();
        debug!("{}: {} -> {}", self.outcome.host, self.outcome.phase, phase);
        self.outcome.phase = phase;
        self.phase_started = Instant::now();
    }

    fn resolve(mut self, kind: OutcomeKind, detail: Option<String>) -> UpgradeOutcome {
        self.close_phase();
        self.outcome.kind = kind;
        self.outcome.detail = detail;
        if kind.is_success() {
            info!("{}", self.outcome);
        } else {
            warn!("{}", self.outcome);
        }
        self.outcome
    }

    fn fail(self, kind: OutcomeKind, error: Error) -> UpgradeOutcome {
        self.resolve(kind, Some(error.to_string()))
    }

    /// Best-effort undo of pre-staging. Failures are recorded, never raised.
    async fn restore<D: Device + ?Sized>(&mut self, device: &mut D, policy: &UpgradePolicy) {
        if self.staged.is_empty() {
            return;
        }
        let host = device.host().to_string();
        if !device.is_open() {
            if let Err(e) = device.open(policy.transfer.reconnect_timeout).await {
                warn!("{}: cannot reconnect to restore staged services: {}", host, e);
                self.outcome.post_stage_error = Some(e.to_string());
                return;
            }
        }
        match device.post_stage(&self.staged).await {
            Ok(()) => {
                info!("{}: restored {:?}", host, self.staged.paused);
                self.staged = StagedChanges::default();
            }
            Err(e) => {
                warn!("{}: restoring staged services failed: {}", host, e);
                self.outcome.post_stage_error = Some(e.to_string());
            }
        }
    }

    async fn cancelled<D: Device + ?Sized>(
        mut self,
        device: &mut D,
        policy: &UpgradePolicy,
        before: UpgradePhase,
    ) -> UpgradeOutcome {
        self.restore(device, policy).await;
        self.enter(before);
        self.resolve(
            OutcomeKind::Cancelled,
            Some(format!("cancelled before {}", before)),
        )
    }
}

/// Runs upgrades under one policy.
///
/// An `Upgrader` holds no per-device state and can drive any number of
/// devices concurrently, one run per device.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use netlift::{
///     BootTarget, Device, DeviceBuilder, Platform, RebootPolicy, RemoteFile, TransferRequest,
///     UpgradePolicy, Upgrader,
/// };
///
/// # async fn example() -> Result<(), netlift::Error> {
/// let mut device = DeviceBuilder::new("10.0.0.1")
///     .username("admin")
///     .password("secret")
///     .platform(Platform::CiscoIos)
///     .build()?;
///
/// let policy = UpgradePolicy::new(RebootPolicy::new(
///     Duration::from_secs(900),
///     Duration::from_secs(20),
/// ));
/// let request = TransferRequest::new(
///     "images/c2960x-universalk9-mz.152-7.E9.bin",
///     RemoteFile::new("flash:", "c2960x-universalk9-mz.152-7.E9.bin"),
/// );
/// let target = BootTarget::new("c2960x-universalk9-mz.152-7.E9.bin", "flash:");
///
/// let outcome = Upgrader::new(policy).run(&mut device, &request, &target).await;
/// println!("{}", outcome);
/// device.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Upgrader {
    policy: UpgradePolicy,
    cancel: CancellationToken,
    locks: Option<PairLocks>,
}

impl Upgrader {
    pub fn new(policy: UpgradePolicy) -> Self {
        Self {
            policy,
            cancel: CancellationToken::new(),
            locks: None,
        }
    }

    /// Observe `token` at every phase boundary.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Serialize runs against the same HA pair through `locks`.
    pub fn with_pair_locks(mut self, locks: PairLocks) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn policy(&self) -> &UpgradePolicy {
        &self.policy
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Transfer, verify and boot `target`.
    pub async fn run<D: Device + ?Sized>(
        &self,
        device: &mut D,
        request: &TransferRequest,
        target: &BootTarget,
    ) -> UpgradeOutcome {
        self.execute(device, Some(request), target).await
    }

    /// Boot `target` from an image already placed on the device.
    ///
    /// For platforms that fetch images themselves or cannot hash files,
    /// such as wireless controllers.
    pub async fn run_preloaded<D: Device + ?Sized>(
        &self,
        device: &mut D,
        target: &BootTarget,
    ) -> UpgradeOutcome {
        self.execute(device, None, target).await
    }

    async fn execute<D: Device + ?Sized>(
        &self,
        device: &mut D,
        request: Option<&TransferRequest>,
        target: &BootTarget,
    ) -> UpgradeOutcome {
        let policy = &self.policy;
        let host = device.host().to_string();
        let mut run = Run::new(&host, target);
        info!("{}: upgrading to {}", host, target);

        if let Err(e) = policy.validate() {
            return run.fail(OutcomeKind::AbortedPrecondition, e);
        }
        if self.cancel.is_cancelled() {
            return run.cancelled(device, policy, UpgradePhase::PreflightCheck).await;
        }

        // Preflight
        if !device.is_open() {
            if let Err(e) = device.open(policy.transfer.reconnect_timeout).await {
                return run.fail(OutcomeKind::AbortedPrecondition, e);
            }
        }

        let _lease = match (&self.locks, &policy.pair) {
            (Some(locks), Some(pair)) => match locks.try_acquire(pair) {
                Ok(lease) => Some(lease),
                Err(e) => return run.fail(OutcomeKind::AbortedPrecondition, e),
            },
            _ => None,
        };

        if policy.confirm_active {
            match ensure_active(device).await {
                Ok(state) => run.outcome.redundancy = Some(state),
                Err(e) => return run.fail(OutcomeKind::AbortedPrecondition, e),
            }
        }

        let facts = match device.refresh_facts().await {
            Ok(facts) => facts,
            Err(e) => return run.fail(OutcomeKind::AbortedPrecondition, e),
        };
        let already_running = device.image_matches(&facts, target);
        run.outcome.facts = Some(facts);
        if policy.skip_if_running && already_running {
            info!("{}: {} is already running", host, target);
            run.outcome.already_running = true;
            run.enter(UpgradePhase::Done);
            return run.resolve(OutcomeKind::Completed, None);
        }

        // Transfer
        if self.cancel.is_cancelled() {
            return run.cancelled(device, policy, UpgradePhase::TransferVerified).await;
        }
        run.enter(UpgradePhase::TransferVerified);
        match request {
            Some(request) => match verify_transfer(device, request, &policy.transfer).await {
                Ok(result) if result.is_success() => run.outcome.transfer = Some(result),
                Ok(result) => {
                    let detail = format!(
                        "transfer ended {} after {} attempts",
                        result.status, result.attempts
                    );
                    run.outcome.transfer = Some(result);
                    return run.resolve(OutcomeKind::TransferFailed, Some(detail));
                }
                Err(e) => return run.fail(OutcomeKind::TransferFailed, e),
            },
            None => debug!("{}: using image already on the device", host),
        }

        // Pre-stage
        if self.cancel.is_cancelled() {
            return run.cancelled(device, policy, UpgradePhase::PreStaged).await;
        }
        run.enter(UpgradePhase::PreStaged);
        match device.pre_stage(target).await {
            Ok(staged) => {
                run.outcome.staged = Some(staged.clone());
                run.staged = staged;
            }
            Err(e) if e.is_unsupported() => debug!("{}: nothing to pre-stage", host),
            Err(e) => return run.fail(OutcomeKind::AbortedPrecondition, e),
        }

        // Boot target
        if self.cancel.is_cancelled() {
            return run.cancelled(device, policy, UpgradePhase::BootTargetSet).await;
        }
        run.enter(UpgradePhase::BootTargetSet);
        match device.set_boot_target(target).await {
            Ok(()) if policy.verify_boot_target => match device.boot_target().await {
                Ok(current) if device.boot_target_matches(&current, target) => {}
                Ok(current) => {
                    run.restore(device, policy).await;
                    return run.resolve(
                        OutcomeKind::AbortedPrecondition,
                        Some(format!("boot target reads back as {}, expected {}", current, target)),
                    );
                }
                Err(e) if e.is_unsupported() => {}
                Err(e) => {
                    run.restore(device, policy).await;
                    return run.fail(OutcomeKind::AbortedPrecondition, e);
                }
            },
            Ok(()) => {}
            Err(e) if e.is_unsupported() => {
                info!("{}: no boot variable, upgrading in install mode", host);
                run.outcome.install_mode = true;
            }
            Err(e) => {
                run.restore(device, policy).await;
                return run.fail(OutcomeKind::AbortedPrecondition, e);
            }
        }

        // Reboot
        if self.cancel.is_cancelled() {
            return run.cancelled(device, policy, UpgradePhase::Rebooted).await;
        }
        run.enter(UpgradePhase::Rebooted);
        let trigger = if run.outcome.install_mode {
            RebootTrigger::Install(target)
        } else {
            RebootTrigger::Reload
        };
        let report = match reboot_into(device, trigger, target, &policy.reboot).await {
            Ok(report) => report,
            Err(e) => {
                run.restore(device, policy).await;
                return run.fail(OutcomeKind::AbortedPrecondition, e);
            }
        };
        let phase = report.phase;
        let reboot_error = report.last_error.clone();
        let fresh_facts = report.facts.is_some();
        if let Some(facts) = &report.facts {
            run.outcome.facts = Some(facts.clone());
        }
        run.outcome.reboot = Some(report);

        if phase == RebootPhase::TimedOut {
            let detail = match reboot_error {
                Some(e) => format!("not reachable within {:?}: {}", policy.reboot.timeout, e),
                None => format!("not reachable within {:?}", policy.reboot.timeout),
            };
            return run.resolve(OutcomeKind::TimedOutRebooting, Some(detail));
        }
        run.enter(UpgradePhase::Reconnected);

        run.enter(UpgradePhase::VersionValidated);
        if phase != RebootPhase::Validated {
            let detail = match reboot_error {
                Some(e) if !fresh_facts => e,
                _ => {
                    let running = run
                        .outcome
                        .facts
                        .as_ref()
                        .and_then(|f| f.running_image.clone().or_else(|| f.os_version.clone()))
                        .unwrap_or_else(|| "unknown".to_string());
                    format!("running {}, expected {}", running, target)
                }
            };
            run.restore(device, policy).await;
            return run.resolve(OutcomeKind::CompletedWrongVersion, Some(detail));
        }

        // HA peer
        if let Some(peer) = &policy.peer {
            if self.cancel.is_cancelled() {
                return run.cancelled(device, policy, UpgradePhase::PeerConsistency).await;
            }
            run.enter(UpgradePhase::PeerConsistency);
            let detail = match await_peer_consistency(device, peer).await {
                Ok(PeerConsistency::Synced(state)) => {
                    run.outcome.redundancy = Some(state);
                    None
                }
                Ok(PeerConsistency::Desync(state)) => {
                    let detail = format!(
                        "peer not consistent after {:?} (reachable={})",
                        peer.timeout, state.peer_reachable
                    );
                    run.outcome.redundancy = Some(state);
                    Some(detail)
                }
                Err(e) => Some(e.to_string()),
            };
            if detail.is_some() {
                run.restore(device, policy).await;
                return run.resolve(OutcomeKind::PeerDesync, detail);
            }
        }

        // Post-stage
        if !run.staged.is_empty() {
            run.enter(UpgradePhase::PostStageRestored);
            run.restore(device, policy).await;
        }

        run.enter(UpgradePhase::Done);
        run.resolve(OutcomeKind::Completed, None)
    }
}

/// Upgrade one device with a fresh [`Upgrader`].
pub async fn upgrade<D: Device + ?Sized>(
    device: &mut D,
    request: &TransferRequest,
    target: &BootTarget,
    policy: &UpgradePolicy,
) -> UpgradeOutcome {
    Upgrader::new(policy.clone()).run(device, request, target).await
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::device::{RedundancyRole, RedundancyState, RemoteFile};
    use crate::lifecycle::policy::{PeerPolicy, RebootPolicy};
    use crate::lifecycle::transfer::TransferStatus;
    use crate::test_support::{BootResult, MockDevice, PushOutcome, local_image};

    fn target() -> BootTarget {
        BootTarget::new("new.bin", "flash:")
    }

    fn request(path: &Path) -> TransferRequest {
        TransferRequest::new(path, RemoteFile::new("flash:", "new.bin"))
    }

    fn policy() -> UpgradePolicy {
        UpgradePolicy::new(RebootPolicy::new(
            Duration::from_secs(600),
            Duration::from_secs(30),
        ))
    }

    fn ha(role: RedundancyRole, peer_reachable: bool) -> RedundancyState {
        RedundancyState {
            role,
            peer_role: Some(RedundancyRole::Standby),
            peer_reachable,
            peer_consistent: peer_reachable,
            detail: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_upgrade_completes() {
        let (_dir, path) = local_image(b"new-image");
        let mut device = MockDevice::new("sw1", "old.bin");

        let outcome = upgrade(&mut device, &request(&path), &target(), &policy()).await;
        assert_eq!(outcome.kind, OutcomeKind::Completed);
        assert_eq!(outcome.phase, UpgradePhase::Done);
        assert!(!outcome.install_mode);
        assert_eq!(
            outcome.facts.and_then(|f| f.running_image).as_deref(),
            Some("new.bin")
        );
        assert!(outcome.reboot.unwrap().is_validated());
        let phases: Vec<UpgradePhase> = outcome.durations.keys().copied().collect();
        assert_eq!(
            phases,
            vec![
                UpgradePhase::PreflightCheck,
                UpgradePhase::TransferVerified,
                UpgradePhase::PreStaged,
                UpgradePhase::BootTargetSet,
                UpgradePhase::Rebooted,
                UpgradePhase::Reconnected,
                UpgradePhase::VersionValidated,
                UpgradePhase::Done,
            ]
        );

        let order: Vec<&str> = device
            .ops
            .iter()
            .map(String::as_str)
            .filter(|op| matches!(*op, "transfer" | "set_boot_target" | "trigger_reboot"))
            .collect();
        assert_eq!(order, vec!["transfer", "set_boot_target", "trigger_reboot"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_first_push_still_completes() {
        let (_dir, path) = local_image(b"new-image");
        let mut device = MockDevice::new("sw1", "old.bin");
        device.pushes.push_back(PushOutcome::Corrupt);

        let outcome = upgrade(&mut device, &request(&path), &target(), &policy()).await;
        assert_eq!(outcome.kind, OutcomeKind::Completed);
        let transfer = outcome.transfer.unwrap();
        assert_eq!(transfer.status, TransferStatus::Succeeded);
        assert_eq!(transfer.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_reconnects() {
        let (_dir, path) = local_image(b"new-image");
        let mut device = MockDevice::new("sw1", "old.bin");
        device.boot_result = BootResult::Never;
        let policy = policy();

        let outcome = upgrade(&mut device, &request(&path), &target(), &policy).await;
        assert_eq!(outcome.kind, OutcomeKind::TimedOutRebooting);
        assert_eq!(outcome.phase, UpgradePhase::Rebooted);
        assert!(outcome.durations[&UpgradePhase::Rebooted] <= Duration::from_secs(600 + 30));
        // Last facts seen are the pre-reboot ones.
        assert_eq!(
            outcome.facts.and_then(|f| f.running_image).as_deref(),
            Some("old.bin")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_version() {
        let (_dir, path) = local_image(b"new-image");
        let mut device = MockDevice::new("sw1", "old.bin");
        device.boot_result = BootResult::OldImage;

        let outcome = upgrade(&mut device, &request(&path), &target(), &policy()).await;
        assert_eq!(outcome.kind, OutcomeKind::CompletedWrongVersion);
        assert_eq!(outcome.phase, UpgradePhase::VersionValidated);
        assert!(outcome.detail.unwrap().contains("running old.bin"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_facts_after_reload_keep_the_reboot() {
        let (_dir, path) = local_image(b"new-image");
        let mut device = MockDevice::new("sw1", "old.bin");
        device.boot_result = BootResult::Unparseable;

        let outcome = upgrade(&mut device, &request(&path), &target(), &policy()).await;
        assert_eq!(outcome.kind, OutcomeKind::CompletedWrongVersion);
        assert_eq!(outcome.phase, UpgradePhase::VersionValidated);
        assert!(outcome.detail.unwrap().contains("show version"));
        let reboot = outcome.reboot.unwrap();
        assert_eq!(reboot.phase, RebootPhase::WrongImage);
        assert!(reboot.transitions.contains(&RebootPhase::Reachable));
        assert_eq!(device.count("trigger_reboot"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_login_after_reload() {
        let (_dir, path) = local_image(b"new-image");
        let mut device = MockDevice::new("sw1", "old.bin");
        device.boot_result = BootResult::Refused;

        let outcome = upgrade(&mut device, &request(&path), &target(), &policy()).await;
        assert_eq!(outcome.kind, OutcomeKind::TimedOutRebooting);
        assert_eq!(outcome.phase, UpgradePhase::Rebooted);
        assert!(outcome.detail.unwrap().contains("Authentication failed"));
        assert!(outcome.reboot.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_standby_never_syncs() {
        let (_dir, path) = local_image(b"new-image");
        let mut device = MockDevice::new("wlc1", "old.bin");
        device.redundancy.extend([
            ha(RedundancyRole::Active, true),
            ha(RedundancyRole::Active, false),
        ]);
        let policy = policy().with_peer(PeerPolicy::new(
            Duration::from_secs(120),
            Duration::from_secs(10),
        ));

        let outcome = upgrade(&mut device, &request(&path), &target(), &policy).await;
        assert_eq!(outcome.kind, OutcomeKind::PeerDesync);
        assert_ne!(outcome.kind, OutcomeKind::Completed);
        assert_eq!(outcome.phase, UpgradePhase::PeerConsistency);
        assert!(!outcome.redundancy.unwrap().peer_reachable);
        assert!(outcome.kind.runs_target());
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_syncs() {
        let (_dir, path) = local_image(b"new-image");
        let mut device = MockDevice::new("wlc1", "old.bin");
        device.redundancy.push_back(ha(RedundancyRole::Active, true));
        let policy = policy().with_peer(PeerPolicy::new(
            Duration::from_secs(120),
            Duration::from_secs(10),
        ));

        let outcome = upgrade(&mut device, &request(&path), &target(), &policy).await;
        assert_eq!(outcome.kind, OutcomeKind::Completed);
        assert!(outcome.durations.contains_key(&UpgradePhase::PeerConsistency));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destination_full() {
        let (_dir, path) = local_image(&[0u8; 2048]);
        let mut device = MockDevice::new("sw1", "old.bin");
        device.free_space = Some(100);

        let outcome = upgrade(&mut device, &request(&path), &target(), &policy()).await;
        assert_eq!(outcome.kind, OutcomeKind::TransferFailed);
        assert_eq!(outcome.phase, UpgradePhase::TransferVerified);
        let transfer = outcome.transfer.unwrap();
        assert_eq!(transfer.status, TransferStatus::DestinationFull);
        assert_eq!(transfer.attempts, 1);
        assert_eq!(device.count("transfer"), 0);
        assert_eq!(device.count("trigger_reboot"), 0);
    }

    #[tokio::test]
    async fn test_standby_unit_is_refused() {
        let (_dir, path) = local_image(b"new-image");
        let mut device = MockDevice::new("wlc2", "old.bin");
        device.redundancy.push_back(ha(RedundancyRole::Standby, true));

        let outcome = upgrade(&mut device, &request(&path), &target(), &policy()).await;
        assert_eq!(outcome.kind, OutcomeKind::AbortedPrecondition);
        assert_eq!(outcome.phase, UpgradePhase::PreflightCheck);
        assert!(outcome.detail.unwrap().contains("not the active device"));
        assert_eq!(device.count("transfer"), 0);
    }

    #[tokio::test]
    async fn test_already_running() {
        let (_dir, path) = local_image(b"new-image");
        let mut device = MockDevice::new("sw1", "new.bin");

        let outcome = upgrade(&mut device, &request(&path), &target(), &policy()).await;
        assert_eq!(outcome.kind, OutcomeKind::Completed);
        assert!(outcome.already_running);
        assert_eq!(device.count("transfer"), 0);
        assert_eq!(device.count("trigger_reboot"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_mode() {
        let (_dir, path) = local_image(b"new-image");
        let mut device = MockDevice::new("n9k", "old.bin");
        device.boot_supported = false;
        device.install_supported = true;

        let outcome = upgrade(&mut device, &request(&path), &target(), &policy()).await;
        assert_eq!(outcome.kind, OutcomeKind::Completed);
        assert!(outcome.install_mode);
        assert_eq!(device.count("install"), 1);
        assert_eq!(device.count("trigger_reboot"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_target_read_back_mismatch() {
        let (_dir, path) = local_image(b"new-image");
        let mut device = MockDevice::new("wlc1", "old.bin");
        device.boot_readback = Some(BootTarget::new("old.bin", "flash:"));
        device.staging = Some(StagedChanges {
            paused: vec!["1".into()],
            notes: vec![],
        });

        let outcome = upgrade(&mut device, &request(&path), &target(), &policy()).await;
        assert_eq!(outcome.kind, OutcomeKind::AbortedPrecondition);
        assert_eq!(outcome.phase, UpgradePhase::BootTargetSet);
        assert!(outcome.detail.unwrap().contains("reads back as flash:old.bin"));
        assert_eq!(device.count("post_stage"), 1);
        assert_eq!(device.count("trigger_reboot"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_stage_failure_is_reported_only() {
        let (_dir, path) = local_image(b"new-image");
        let mut device = MockDevice::new("wlc1", "old.bin");
        device.staging = Some(StagedChanges {
            paused: vec!["1".into(), "3".into()],
            notes: vec![],
        });
        device.post_stage_fails = true;

        let outcome = upgrade(&mut device, &request(&path), &target(), &policy()).await;
        assert_eq!(outcome.kind, OutcomeKind::Completed);
        assert!(outcome.post_stage_error.is_some());
        assert!(outcome.durations.contains_key(&UpgradePhase::PostStageRestored));
        assert_eq!(outcome.staged.unwrap().paused, vec!["1", "3"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (_dir, path) = local_image(b"new-image");
        let mut device = MockDevice::new("sw1", "old.bin");
        let token = CancellationToken::new();
        token.cancel();

        let outcome = Upgrader::new(policy())
            .with_cancellation(token)
            .run(&mut device, &request(&path), &target())
            .await;
        assert_eq!(outcome.kind, OutcomeKind::Cancelled);
        assert_eq!(outcome.phase, UpgradePhase::PreflightCheck);
        assert!(device.ops.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_waits_out_reboot() {
        let (_dir, path) = local_image(b"new-image");
        let mut device = MockDevice::new("sw1", "old.bin");
        let upgrader = Upgrader::new(policy().with_peer(PeerPolicy::new(
            Duration::from_secs(60),
            Duration::from_secs(10),
        )));
        let token = upgrader.cancellation_token();

        let (req, tgt) = (request(&path), target());
        let (outcome, ()) = tokio::join!(
            upgrader.run(&mut device, &req, &tgt),
            async move {
                // Lands while the device is rebooting.
                tokio::time::sleep(Duration::from_secs(40)).await;
                token.cancel();
            }
        );
        assert_eq!(outcome.kind, OutcomeKind::Cancelled);
        assert_eq!(outcome.phase, UpgradePhase::PeerConsistency);
        assert!(outcome.reboot.unwrap().is_validated());
        assert_eq!(device.running_image, "new.bin");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pair_conflict() {
        let (_dir, path) = local_image(b"new-image");
        let locks = PairLocks::new();
        let policy = policy().with_pair("wlc-ha-1");
        let upgrader = Upgrader::new(policy).with_pair_locks(locks.clone());

        let held = locks.try_acquire("wlc-ha-1").unwrap();
        let mut device = MockDevice::new("wlc1", "old.bin");
        let outcome = upgrader.run(&mut device, &request(&path), &target()).await;
        assert_eq!(outcome.kind, OutcomeKind::AbortedPrecondition);
        assert!(outcome.detail.unwrap().contains("already held"));

        drop(held);
        let outcome = upgrader.run(&mut device, &request(&path), &target()).await;
        assert_eq!(outcome.kind, OutcomeKind::Completed);
        assert!(!locks.is_held("wlc-ha-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_preloaded_image() {
        let mut device = MockDevice::new("wlc1", "8.5.161.0");
        device.algorithm = None;

        let outcome = Upgrader::new(policy())
            .run_preloaded(&mut device, &BootTarget::new("8.10.185.0", "primary"))
            .await;
        assert_eq!(outcome.kind, OutcomeKind::Completed);
        assert!(outcome.transfer.is_none());
        assert_eq!(device.count("transfer"), 0);
        assert_eq!(device.running_image, "8.10.185.0");
    }
}
