//! Terminal report of an upgrade run.

use std::fmt;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;

use super::reboot::RebootReport;
use super::transfer::TransferResult;
use crate::device::{BootTarget, Facts, RedundancyState, StagedChanges};

/// Orchestrator phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradePhase {
    PreflightCheck,
    TransferVerified,
    PreStaged,
    BootTargetSet,
    Rebooted,
    Reconnected,
    VersionValidated,
    PeerConsistency,
    PostStageRestored,
    Done,
}

impl fmt::Display for UpgradePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpgradePhase::PreflightCheck => "preflight_check",
            UpgradePhase::TransferVerified => "transfer_verified",
            UpgradePhase::PreStaged => "pre_staged",
            UpgradePhase::BootTargetSet => "boot_target_set",
            UpgradePhase::Rebooted => "rebooted",
            UpgradePhase::Reconnected => "reconnected",
            UpgradePhase::VersionValidated => "version_validated",
            UpgradePhase::PeerConsistency => "peer_consistency",
            UpgradePhase::PostStageRestored => "post_stage_restored",
            UpgradePhase::Done => "done",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Completed,
    /// Rebooted and reachable, but running something other than the target.
    CompletedWrongVersion,
    TimedOutRebooting,
    TransferFailed,
    /// The unit runs the target but its HA peer never became consistent.
    PeerDesync,
    AbortedPrecondition,
    Cancelled,
}

impl OutcomeKind {
    pub fn is_success(self) -> bool {
        self == OutcomeKind::Completed
    }

    /// Whether the device ended up running the requested image.
    pub fn runs_target(self) -> bool {
        matches!(self, OutcomeKind::Completed | OutcomeKind::PeerDesync)
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeKind::Completed => "completed",
            OutcomeKind::CompletedWrongVersion => "completed_wrong_version",
            OutcomeKind::TimedOutRebooting => "timed_out_rebooting",
            OutcomeKind::TransferFailed => "transfer_failed",
            OutcomeKind::PeerDesync => "peer_desync",
            OutcomeKind::AbortedPrecondition => "aborted_precondition",
            OutcomeKind::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Everything known about one upgrade run when it resolved.
#[derive(Debug, Clone, Serialize)]
pub struct UpgradeOutcome {
    pub host: String,
    pub kind: OutcomeKind,

    /// Phase the run resolved in.
    pub phase: UpgradePhase,
    pub target: BootTarget,

    /// Last facts observed from the device.
    pub facts: Option<Facts>,

    /// Time spent in each phase that was entered.
    pub durations: IndexMap<UpgradePhase, Duration>,

    /// The target was already running; nothing was done.
    pub already_running: bool,

    /// The reboot was an install-mode upgrade.
    pub install_mode: bool,

    pub transfer: Option<TransferResult>,
    pub reboot: Option<RebootReport>,
    pub redundancy: Option<RedundancyState>,
    pub staged: Option<StagedChanges>,

    /// Restoring pre-staged services failed; the image outcome stands.
    pub post_stage_error: Option<String>,
    pub detail: Option<String>,
}

impl UpgradeOutcome {
    pub(crate) fn new(host: &str, target: &BootTarget) -> Self {
        Self {
            host: host.to_string(),
            kind: OutcomeKind::AbortedPrecondition,
            phase: UpgradePhase::PreflightCheck,
            target: target.clone(),
            facts: None,
            durations: IndexMap::new(),
            already_running: false,
            install_mode: false,
            transfer: None,
            reboot: None,
            redundancy: None,
            staged: None,
            post_stage_error: None,
            detail: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind.is_success()
    }

    /// Total time across all phases.
    pub fn elapsed(&self) -> Duration {
        self.durations.values().sum()
    }
}

impl fmt::Display for UpgradeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} at {}", self.host, self.kind, self.phase)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serializes_phase_timings() {
        let mut outcome = UpgradeOutcome::new("sw1", &BootTarget::new("new.bin", "flash:"));
        outcome.kind = OutcomeKind::TimedOutRebooting;
        outcome.phase = UpgradePhase::Rebooted;
        outcome
            .durations
            .insert(UpgradePhase::PreflightCheck, Duration::from_secs(2));
        outcome
            .durations
            .insert(UpgradePhase::Rebooted, Duration::from_secs(600));

        assert_eq!(outcome.elapsed(), Duration::from_secs(602));
        assert_eq!(outcome.to_string(), "sw1: timed_out_rebooting at rebooted");

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["kind"], "timed_out_rebooting");
        assert_eq!(json["phase"], "rebooted");
        assert_eq!(json["durations"]["rebooted"]["secs"], 600);
    }

    #[test]
    fn test_peer_desync_still_runs_target() {
        assert!(OutcomeKind::PeerDesync.runs_target());
        assert!(!OutcomeKind::PeerDesync.is_success());
        assert!(!OutcomeKind::CompletedWrongVersion.runs_target());
    }
}
