//! Cisco NX-OS platform.
//!
//! Upgrades run in install mode: `install all nxos <image>` validates the
//! image, switches the boot variable and reloads the switch itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::info;

use super::{
    bytes_free, capture, ensure_listed, missing_as_not_found, not_found, parse_error, role_from,
    split_location,
};
use crate::device::{
    BootTarget, Checksum, ChecksumAlgorithm, RedundancyRole, RedundancyState, RegexFactsParser,
    RemoteFile, Session,
};
use crate::error::{DeviceError, Error, Result};
use crate::platform::{PlatformDefinition, VendorBehavior, looks_missing};
use crate::transport::InteractiveEvent;

pub const PLATFORM_NAME: &str = "cisco_nxos";

const PROMPT: &str = r"(?m)^[\w.\-@()/:]{1,63}(?:\(config[\w.\-@/:+]{0,32}\))?#\s?$";

/// Create the Cisco NX-OS platform definition.
pub fn platform() -> Result<PlatformDefinition> {
    let parser = RegexFactsParser::new()
        .with_hostname(r"(?m)^\s*Device name:\s*(?P<value>\S+)")?
        .with_os_version(r"(?m)^\s*NXOS: version (?P<value>\S+)")?
        .with_running_image(r"(?m)^\s*NXOS image file is:\s*(?:[\w-]+:)?/{0,3}(?P<value>\S+)")?
        .with_model(r"(?m)^\s*cisco (?P<value>Nexus\s?\S+)")?
        .with_serial_number(r"(?m)^\s*Processor Board ID (?P<value>\S+)")?
        .with_interfaces(r"(?m)^(?P<value>(?:Eth|mgmt|Po|Vlan|Lo)\S*\d)\s")?
        .with_extra("uptime", r"(?m)^Kernel uptime is (?P<value>.+)$")?;

    Ok(
        PlatformDefinition::new(PLATFORM_NAME, PROMPT, Arc::new(CiscoNxosBehavior))?
            .with_failure_pattern("% Invalid command")
            .with_failure_pattern("% Incomplete command")
            .with_failure_pattern("% Invalid parameter")
            .with_failure_pattern("% Permission denied")
            .with_failure_pattern("Install has failed")
            .with_failure_pattern("Pre-upgrade check failed")
            .with_failure_pattern("No such file or directory")
            .with_on_open_command("terminal length 0")
            .with_on_open_command("terminal width 511")
            .with_on_open_command("terminal dont-ask")
            .with_facts_command("show version")
            .with_facts_command("show interface brief")
            .with_config_mode("configure terminal", "end")
            .with_default_file_system("bootflash:")
            .with_checksum_algorithm(ChecksumAlgorithm::Sha256)
            .with_facts_parser(Arc::new(parser)),
    )
}

/// NX-OS behavior.
pub struct CiscoNxosBehavior;

#[async_trait]
impl VendorBehavior for CiscoNxosBehavior {
    async fn default_file_system(&self, session: &mut Session<'_>) -> Result<String> {
        let output = session.send("dir").await?;
        match capture(r"Usage for (?P<fs>[\w-]+:)", &output, "fs")? {
            Some(fs) => Ok(fs.to_string()),
            None => Ok("bootflash:".to_string()),
        }
    }

    async fn checksum(&self, session: &mut Session<'_>, file: &RemoteFile) -> Result<Checksum> {
        let command = format!("show file {} sha256sum", file.location());
        let output = session
            .send_slow(&command)
            .await
            .map_err(|e| missing_as_not_found(e, file))?;
        if looks_missing(&output) {
            return Err(not_found(file));
        }
        Checksum::find_in(ChecksumAlgorithm::Sha256, &output)
            .ok_or_else(|| parse_error(&command, "no sha256 digest in output"))
    }

    async fn free_space(&self, session: &mut Session<'_>, file_system: &str) -> Result<u64> {
        let command = format!("dir {}", file_system);
        let output = session.send(&command).await?;
        bytes_free(&command, &output)
    }

    async fn boot_target(&self, session: &mut Session<'_>) -> Result<BootTarget> {
        let command = "show boot";
        let output = session.send(command).await?;
        let path = capture(r"NXOS variable\s*=\s*(?P<path>\S+)", &output, "path")?
            .ok_or_else(|| parse_error(command, "no NXOS boot variable"))?;
        Ok(split_location(path))
    }

    async fn install(&self, session: &mut Session<'_>, target: &BootTarget) -> Result<()> {
        ensure_listed(session, target).await?;

        let command = format!("install all nxos {}", target.location());
        info!("{}: {}", session.host(), command);
        match session.send_slow(&command).await {
            Ok(_) => Ok(()),
            // The switch reloads at the end of a successful install.
            Err(e) if e.is_transient() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn trigger_reboot(&self, session: &mut Session<'_>) -> Result<()> {
        let reload = InteractiveEvent::new("reload", r"(?i)\(y/n\)|reboot|restarting")?
            .with_timeout(Duration::from_secs(10));
        if let Some(output) = session.send_and_drop(reload).await? {
            if output.contains("(y/n)") {
                session
                    .send_and_drop(
                        InteractiveEvent::new("y", r"(?i)reboot|restarting")?
                            .with_timeout(Duration::from_secs(10)),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn redundancy_state(&self, session: &mut Session<'_>) -> Result<RedundancyState> {
        let command = "show system redundancy status";
        let output = match session.send(command).await {
            Ok(output) => output,
            Err(Error::Device(DeviceError::CommandFailed { .. })) => {
                return Err(session.unsupported("redundancy_state"));
            }
            Err(e) => return Err(e),
        };

        let states = super::capture_all(
            r"(?m)^\s*Redundancy state:\s*(?P<s>.+?)\s*$",
            &output,
            "s",
        )?;
        let supervisor = capture(
            r"(?s)This supervisor.*?Supervisor state:\s*(?P<s>[^\r\n]+)",
            &output,
            "s",
        )?;
        let other = capture(
            r"(?s)Other supervisor.*?Supervisor state:\s*(?P<s>[^\r\n]+)",
            &output,
            "s",
        )?;

        let mine = states
            .first()
            .copied()
            .ok_or_else(|| parse_error(command, "no redundancy state"))?;
        let peer = states.get(1).copied();

        if peer.is_none_or(|p| p.eq_ignore_ascii_case("Not present")) {
            let mut state = RedundancyState::standalone();
            state.detail = Some(format!("redundancy state {}", mine));
            return Ok(state);
        }

        let role = role_from(mine);
        let peer_role = peer.map(role_from);
        let peer_reachable = other.is_some_and(|s| !s.eq_ignore_ascii_case("Not present"));
        let peer_consistent = match role {
            RedundancyRole::Active => other.is_some_and(|s| s.contains("HA standby")),
            RedundancyRole::Standby => peer_role == Some(RedundancyRole::Active),
            _ => false,
        };

        Ok(RedundancyState {
            role,
            peer_role,
            peer_reachable,
            peer_consistent,
            detail: Some(format!(
                "this supervisor {}, other supervisor {}",
                supervisor.unwrap_or(mine),
                other.unwrap_or("unknown")
            )),
        })
    }
}
