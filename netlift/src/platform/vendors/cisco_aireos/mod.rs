//! Cisco AireOS wireless LAN controllers.
//!
//! A controller keeps two image slots (primary and backup) and boots the
//! one marked `(default)` in `show boot`. Boot targets are therefore
//! expressed as a release version plus a slot name. Before a reload the
//! new image is predownloaded to the access points and client WLANs are
//! disabled; they are re-enabled once the controller is back.

mod platform;
mod wlan;

pub use platform::platform;
pub use wlan::filename_to_version;

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::time::Instant;

use self::wlan::{
    ApImageStats, BootSlots, parse_ap_image_stats, parse_boot, parse_wlans, target_version,
};
use super::{capture, parse_error, role_from};
use crate::device::{
    BootTarget, Facts, RedundancyRole, RedundancyState, RemoteFile, Session, StagedChanges,
};
use crate::error::{DeviceError, Error, Result};
use crate::platform::{VendorBehavior, base_name};
use crate::transport::InteractiveEvent;

pub const PLATFORM_NAME: &str = "cisco_aireos";

const PREDOWNLOAD_POLL: Duration = Duration::from_secs(10);

/// AireOS behavior.
pub struct CiscoAireosBehavior;

fn current_slot(slots: &BootSlots) -> &'static str {
    slots.default.unwrap_or("primary")
}

fn failed(command: impl Into<String>, message: impl Into<String>) -> Error {
    DeviceError::CommandFailed {
        command: command.into(),
        message: message.into(),
    }
    .into()
}

impl CiscoAireosBehavior {
    async fn boot_slots(&self, session: &mut Session<'_>) -> Result<BootSlots> {
        let output = session.send("show boot").await?;
        parse_boot(&output)
    }

    /// Slot holding `target`, or `FileNotFound` when neither slot has it.
    async fn slot_for(
        &self,
        session: &mut Session<'_>,
        target: &BootTarget,
    ) -> Result<(&'static str, String, BootSlots)> {
        let version = target_version(base_name(&target.image));
        let slots = self.boot_slots(session).await?;
        match slots.slot_of(&version) {
            Some(slot) => Ok((slot, version, slots)),
            None => Err(DeviceError::FileNotFound {
                file: target.image.clone(),
                file_system: "show boot".to_string(),
            }
            .into()),
        }
    }

    async fn save(&self, session: &mut Session<'_>) -> Result<()> {
        let confirm = InteractiveEvent::new("save config", r"(?i)\(y/n\)")?;
        let done = InteractiveEvent::until_prompt("y", &session.definition().prompt);
        session.send_interactive(&[confirm, done]).await?;
        Ok(())
    }

    /// Enable or disable `ids`, then confirm the change took.
    async fn set_wlans(&self, session: &mut Session<'_>, ids: &[u32], enable: bool) -> Result<()> {
        let action = if enable { "enable" } else { "disable" };
        let commands: Vec<String> = ids
            .iter()
            .map(|id| format!("config wlan {} {}", action, id))
            .collect();
        let commands: Vec<&str> = commands.iter().map(String::as_str).collect();
        session.send_config(&commands).await?;

        let output = session.send("show wlan summary").await?;
        let wlans = parse_wlans(&output)?;
        let stuck: Vec<String> = ids
            .iter()
            .filter(|id| wlans.iter().any(|w| w.id == **id && w.enabled != enable))
            .map(u32::to_string)
            .collect();
        if !stuck.is_empty() {
            return Err(failed(
                format!("config wlan {}", action),
                format!("WLANs {} did not {}", stuck.join(", "), action),
            ));
        }
        Ok(())
    }

    /// Push the image in `slot` to every AP and wait for them to report it.
    async fn predownload(&self, session: &mut Session<'_>, slot: &str) -> Result<ApImageStats> {
        let command = format!("config ap image predownload {} all", slot);
        session.send(&command).await?;

        let deadline = Instant::now() + session.definition().file_operation_timeout;
        loop {
            let output = session.send("show ap image all").await?;
            let stats = parse_ap_image_stats(&output)?;
            if stats.failed > 0 {
                return Err(failed(
                    command,
                    format!("{} APs failed to predownload", stats.failed),
                ));
            }
            if stats.is_complete() {
                return Ok(stats);
            }
            if Instant::now() + PREDOWNLOAD_POLL > deadline {
                return Err(failed(
                    command,
                    format!(
                        "predownload incomplete: {} of {} APs",
                        stats.downloaded, stats.total
                    ),
                ));
            }
            debug!(
                "{}: {} of {} APs have the image",
                session.host(),
                stats.downloaded,
                stats.total
            );
            tokio::time::sleep(PREDOWNLOAD_POLL).await;
        }
    }
}

#[async_trait]
impl VendorBehavior for CiscoAireosBehavior {
    async fn file_exists(&self, session: &mut Session<'_>, file: &RemoteFile) -> Result<bool> {
        let version = target_version(file.file_name());
        let slots = self.boot_slots(session).await?;
        Ok(slots.slot_of(&version).is_some())
    }

    async fn boot_target(&self, session: &mut Session<'_>) -> Result<BootTarget> {
        let slots = self.boot_slots(session).await?;
        let slot = current_slot(&slots);
        let version = slots
            .version_in(slot)
            .ok_or_else(|| parse_error("show boot", format!("no {} boot image", slot)))?;
        Ok(BootTarget::new(version, slot))
    }

    async fn set_boot_target(&self, session: &mut Session<'_>, target: &BootTarget) -> Result<()> {
        let (slot, version, slots) = self.slot_for(session, target).await?;
        let command = format!("config boot {}", slot);
        if current_slot(&slots) != slot {
            session.send_config(&[command.as_str()]).await?;
        }
        self.save(session).await?;

        let slots = self.boot_slots(session).await?;
        if current_slot(&slots) != slot {
            return Err(failed(command, "boot image did not change"));
        }
        info!("{}: booting {} from the {} slot", session.host(), version, slot);
        Ok(())
    }

    async fn trigger_reboot(&self, session: &mut Session<'_>) -> Result<()> {
        let confirm = r"(?i)\(y/n\)";
        let mut output = session
            .send_and_drop(InteractiveEvent::new("reset system", confirm)?)
            .await?;

        // Up to two questions: save unsaved changes, then confirm the reset.
        for _ in 0..2 {
            match output.as_deref() {
                Some(text) if text.to_ascii_lowercase().contains("(y/n)") => {
                    output = session
                        .send_and_drop(
                            InteractiveEvent::new("y", confirm)?
                                .with_timeout(Duration::from_secs(10)),
                        )
                        .await?;
                }
                _ => break,
            }
        }
        Ok(())
    }

    async fn redundancy_state(&self, session: &mut Session<'_>) -> Result<RedundancyState> {
        let command = "show redundancy summary";
        let output = match session.send(command).await {
            Ok(output) => output,
            Err(Error::Device(DeviceError::CommandFailed { .. })) => {
                return Err(session.unsupported("redundancy_state"));
            }
            Err(e) => return Err(e),
        };

        let mode = capture(r"(?m)Redundancy Mode\s*=\s*(?P<m>.+?)\s*$", &output, "m")?;
        if mode.is_none_or(|m| m.to_ascii_uppercase().contains("DISABLED")) {
            let mut state = RedundancyState::standalone();
            state.detail = mode.map(|m| format!("redundancy mode {}", m));
            return Ok(state);
        }

        let local = capture(r"(?m)Local State\s*=\s*(?P<s>.+?)\s*$", &output, "s")?
            .ok_or_else(|| parse_error(command, "no local state"))?;
        let peer = capture(r"(?m)Peer State\s*=\s*(?P<s>.+?)\s*$", &output, "s")?;

        let role = role_from(local);
        let peer_role = peer.map(role_from);
        let peer_reachable = peer.is_some_and(|p| {
            let p = p.to_ascii_uppercase();
            !(p.contains("N/A") || p.contains("DISABLED") || p.contains("UNKNOWN"))
        });
        let peer_consistent = match role {
            RedundancyRole::Active => peer.is_some_and(|p| p.eq_ignore_ascii_case("STANDBY HOT")),
            RedundancyRole::Standby => peer_role == Some(RedundancyRole::Active),
            _ => false,
        };

        Ok(RedundancyState {
            role,
            peer_role,
            peer_reachable,
            peer_consistent,
            detail: Some(format!(
                "local state {}, peer state {}",
                local,
                peer.unwrap_or("unknown")
            )),
        })
    }

    async fn pre_stage(
        &self,
        session: &mut Session<'_>,
        target: &BootTarget,
    ) -> Result<StagedChanges> {
        let (slot, version, _) = self.slot_for(session, target).await?;
        let mut staged = StagedChanges::default();

        let stats = self.predownload(session, slot).await?;
        staged.notes.push(format!(
            "predownloaded {} to {} of {} APs ({} not supported)",
            version, stats.downloaded, stats.total, stats.unsupported
        ));

        let output = session.send("show wlan summary").await?;
        let enabled: Vec<u32> = parse_wlans(&output)?
            .into_iter()
            .filter(|w| w.enabled)
            .map(|w| w.id)
            .collect();
        if enabled.is_empty() {
            return Ok(staged);
        }

        if let Err(e) = self.set_wlans(session, &enabled, false).await {
            warn!("{}: disabling WLANs failed, re-enabling: {}", session.host(), e);
            if let Err(restore) = self.set_wlans(session, &enabled, true).await {
                warn!("{}: re-enabling WLANs failed: {}", session.host(), restore);
            }
            return Err(e);
        }

        staged.paused = enabled.iter().map(u32::to_string).collect();
        staged
            .notes
            .push(format!("disabled WLANs {}", staged.paused.join(", ")));
        info!("{}: {}", session.host(), staged.notes.join("; "));
        Ok(staged)
    }

    async fn post_stage(&self, session: &mut Session<'_>, staged: &StagedChanges) -> Result<()> {
        if staged.is_empty() {
            return Ok(());
        }
        let ids = staged
            .paused
            .iter()
            .map(|id| {
                id.parse::<u32>()
                    .map_err(|_| parse_error("post_stage", format!("'{}' is not a WLAN id", id)))
            })
            .collect::<Result<Vec<u32>>>()?;
        self.set_wlans(session, &ids, true).await?;
        info!("{}: re-enabled WLANs {}", session.host(), staged.paused.join(", "));
        Ok(())
    }

    fn image_matches(&self, facts: &Facts, target: &BootTarget) -> bool {
        facts.os_version.as_deref() == Some(target_version(base_name(&target.image)).as_str())
    }

    fn boot_target_matches(&self, current: &BootTarget, requested: &BootTarget) -> bool {
        target_version(base_name(&current.image)) == target_version(base_name(&requested.image))
    }
}
