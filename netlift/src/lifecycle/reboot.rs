//! Reboot coordinator: trigger a reload and follow the device back.
//!
//! ```text
//! Idle -> Triggered -> Unreachable -> Reconnecting -> Reachable -> Validated
//!                                                              \-> WrongImage
//! (any state after Triggered) ---------------------------------> TimedOut
//! ```
//!
//! The timeout budget starts when the reload has been issued and covers
//! everything up to the device being reachable again. Validation after
//! that is bounded by one poll interval.

use std::fmt;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::time::Instant;

use super::policy::RebootPolicy;
use crate::device::{BootTarget, Device, Facts};
use crate::error::{DeviceError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebootPhase {
    Idle,
    Triggered,
    Unreachable,
    Reconnecting,
    Reachable,
    Validated,
    TimedOut,
    WrongImage,
}

impl RebootPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RebootPhase::Validated | RebootPhase::TimedOut | RebootPhase::WrongImage
        )
    }
}

impl fmt::Display for RebootPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RebootPhase::Idle => "idle",
            RebootPhase::Triggered => "triggered",
            RebootPhase::Unreachable => "unreachable",
            RebootPhase::Reconnecting => "reconnecting",
            RebootPhase::Reachable => "reachable",
            RebootPhase::Validated => "validated",
            RebootPhase::TimedOut => "timed_out",
            RebootPhase::WrongImage => "wrong_image",
        };
        write!(f, "{}", s)
    }
}

/// How the reload is started.
#[derive(Debug, Clone, Copy)]
pub enum RebootTrigger<'a> {
    /// Plain reload into whatever the boot target points at.
    Reload,
    /// Install-mode upgrade; the device reboots into `target` on its own.
    Install(&'a BootTarget),
}

/// What happened between the trigger and the terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct RebootReport {
    pub phase: RebootPhase,
    pub expected: BootTarget,

    /// Facts read once the device was reachable, or the last cached ones.
    pub facts: Option<Facts>,

    /// Reconnection attempts made.
    pub attempts: u32,

    /// Time from the trigger to the terminal state.
    pub elapsed: Duration,

    /// Every phase entered, in order.
    pub transitions: Vec<RebootPhase>,
    pub last_error: Option<String>,
}

impl RebootReport {
    fn new(expected: &BootTarget) -> Self {
        Self {
            phase: RebootPhase::Idle,
            expected: expected.clone(),
            facts: None,
            attempts: 0,
            elapsed: Duration::ZERO,
            transitions: vec![RebootPhase::Idle],
            last_error: None,
        }
    }

    fn enter(&mut self, host: &str, phase: RebootPhase) {
        if self.phase != phase {
            debug!("{}: reboot {} -> {}", host, self.phase, phase);
            self.phase = phase;
            self.transitions.push(phase);
        }
    }

    pub fn is_validated(&self) -> bool {
        self.phase == RebootPhase::Validated
    }
}

/// Reload the device and wait for it to come back running `expected`.
///
/// The device is never probed during the grace period that follows the
/// trigger. After that `open` is attempted once per poll interval until it
/// succeeds or the timeout runs out. A reachable device whose facts do not
/// show `expected` ends in [`RebootPhase::WrongImage`].
///
/// Returns `Err` only when the policy is invalid or the trigger itself
/// fails. Once the reload is out, every failure ends in a report: a
/// refused login stops the wait as [`RebootPhase::TimedOut`] and facts
/// that cannot be read end it as [`RebootPhase::WrongImage`], both with
/// the cause in `last_error`.
pub async fn reboot_into<D: Device + ?Sized>(
    device: &mut D,
    trigger: RebootTrigger<'_>,
    expected: &BootTarget,
    policy: &RebootPolicy,
) -> Result<RebootReport> {
    policy.validate()?;
    let host = device.host().to_string();
    let mut report = RebootReport::new(expected);

    match trigger {
        RebootTrigger::Reload => {
            info!("{}: reloading, expecting {}", host, expected);
            device.trigger_reboot().await?;
        }
        RebootTrigger::Install(target) => {
            info!("{}: installing {}", host, target);
            device.install(target).await?;
        }
    }

    let started = Instant::now();
    let deadline = started + policy.timeout;
    report.enter(&host, RebootPhase::Triggered);

    // Whatever is left of the session belongs to the old boot.
    if let Err(e) = device.close().await {
        debug!("{}: closing pre-reboot session: {}", host, e);
    }
    report.enter(&host, RebootPhase::Unreachable);

    tokio::time::sleep_until((started + policy.grace()).min(deadline)).await;

    loop {
        let attempt_start = Instant::now();
        if attempt_start >= deadline {
            break;
        }

        report.enter(&host, RebootPhase::Reconnecting);
        report.attempts += 1;
        let connect_timeout = policy.attempt_timeout().min(deadline - attempt_start);

        match device.open(connect_timeout).await {
            Ok(()) => {
                report.enter(&host, RebootPhase::Reachable);
                info!(
                    "{}: reachable after {:?} ({} attempts)",
                    host,
                    started.elapsed(),
                    report.attempts
                );
                match tokio::time::timeout(policy.poll_interval, device.refresh_facts()).await {
                    Ok(Ok(facts)) => {
                        let phase = if device.image_matches(&facts, expected) {
                            RebootPhase::Validated
                        } else {
                            warn!(
                                "{}: came back running {:?}, expected {}",
                                host, facts.running_image, expected
                            );
                            RebootPhase::WrongImage
                        };
                        report.facts = Some(facts);
                        report.enter(&host, phase);
                        report.elapsed = started.elapsed();
                        return Ok(report);
                    }
                    Ok(Err(e)) if e.is_transient() => {
                        debug!("{}: facts after reconnect failed: {}", host, e);
                        report.last_error = Some(e.to_string());
                    }
                    Ok(Err(e)) => {
                        warn!("{}: running image not confirmed: {}", host, e);
                        report.last_error = Some(format!("running image not confirmed: {}", e));
                        report.enter(&host, RebootPhase::WrongImage);
                        report.elapsed = started.elapsed();
                        return Ok(report);
                    }
                    Err(_) => {
                        debug!("{}: facts after reconnect timed out", host);
                        report.last_error = Some(format!(
                            "facts not returned within {:?}",
                            policy.poll_interval
                        ));
                    }
                }
                // Up but not answering yet; drop the session and keep polling.
                let _ = device.close().await;
            }
            Err(e) if e.is_transient() => {
                debug!("{}: reconnect attempt {} failed: {}", host, report.attempts, e);
                report.last_error = Some(e.to_string());
            }
            Err(e) => {
                warn!("{}: reachable again but refused the session: {}", host, e);
                report.last_error = Some(e.to_string());
                break;
            }
        }

        let next = (attempt_start + policy.poll_interval).min(deadline);
        tokio::time::sleep_until(next).await;
    }

    if started.elapsed() >= policy.timeout {
        warn!(
            "{}: not back within {:?} ({} attempts)",
            host, policy.timeout, report.attempts
        );
    }
    report.facts = device.cached_facts().cloned();
    report.enter(&host, RebootPhase::TimedOut);
    report.elapsed = started.elapsed();
    Ok(report)
}

/// Reload the device and wait for it to come back on its configured boot
/// target.
///
/// The image expected after the reload is read from the device before the
/// trigger. Platforms without a boot variable are expected to come back on
/// the image they run now.
pub async fn reboot_and_wait<D: Device + ?Sized>(
    device: &mut D,
    policy: &RebootPolicy,
) -> Result<RebootReport> {
    let expected = match device.boot_target().await {
        Ok(target) => target,
        Err(e) if e.is_unsupported() => {
            let running = match device.cached_facts() {
                Some(facts) => facts.running_image.clone(),
                None => device.refresh_facts().await?.running_image,
            };
            let image = running.ok_or_else(|| DeviceError::InvalidConfig {
                message: format!(
                    "{}: neither boot target nor running image is known",
                    device.host()
                ),
            })?;
            BootTarget::new(image, "")
        }
        Err(e) => return Err(e),
    };
    reboot_into(device, RebootTrigger::Reload, &expected, policy).await
}
