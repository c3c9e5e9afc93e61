//! Cisco IOS / IOS-XE platform.
//!
//! Boot-variable platform: the image is selected with `boot system`, saved,
//! and picked up by a `reload`. Digests come from `verify /sha512`.
//!
//! # Prompt Examples
//!
//! ```text
//! router>                  # user exec
//! router#                  # privileged exec
//! router(config)#          # configuration
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};

use super::{
    bytes_free, capture, ensure_listed, missing_as_not_found, not_found, parse_error,
    role_from, split_location,
};
use crate::device::{
    BootTarget, Checksum, ChecksumAlgorithm, RedundancyRole, RedundancyState, RegexFactsParser,
    RemoteFile, Session,
};
use crate::error::{DeviceError, Error, Result};
use crate::platform::{PlatformDefinition, VendorBehavior, looks_missing};
use crate::transport::InteractiveEvent;

pub const PLATFORM_NAME: &str = "cisco_ios";

const PROMPT: &str = r"(?m)^[\w.\-@()/:]{1,63}[>#]\s?$";
const RELOAD_PROMPT: &str = r"(?i)\[confirm\]|\[yes/no\]";

/// Create the Cisco IOS platform definition.
pub fn platform() -> Result<PlatformDefinition> {
    let parser = RegexFactsParser::new()
        .with_hostname(r"(?m)^(?P<value>\S+) uptime is")?
        .with_os_version(r"(?:Cisco IOS|IOS \(tm\)).*?Version (?P<value>[^,\s]+)")?
        .with_running_image(r#"System image file is "(?:[\w-]+:)?/?(?P<value>[^"]+)""#)?
        .with_model(r"(?mi)^cisco (?P<value>\S+) \(.+\) processor")?
        .with_serial_number(r"(?m)^Processor board ID (?P<value>\S+)")?
        .with_interfaces(r"(?m)^(?P<value>[A-Z][A-Za-z\-]*\d\S*)\s+\S+\s+(?:YES|NO)\s")?
        .with_extra("uptime", r"(?m)^\S+ uptime is (?P<value>.+)$")?;

    Ok(
        PlatformDefinition::new(PLATFORM_NAME, PROMPT, Arc::new(CiscoIosBehavior))?
            .with_failure_pattern("% Invalid input")
            .with_failure_pattern("% Incomplete command")
            .with_failure_pattern("% Ambiguous command")
            .with_failure_pattern("% Unknown command")
            .with_failure_pattern("%Error")
            .with_on_open_command("terminal length 0")
            .with_on_open_command("terminal width 511")
            .with_facts_command("show version")
            .with_facts_command("show ip interface brief")
            .with_config_mode("configure terminal", "end")
            .with_default_file_system("flash:")
            .with_checksum_algorithm(ChecksumAlgorithm::Sha512)
            .with_facts_parser(Arc::new(parser)),
    )
}

/// IOS behavior.
pub struct CiscoIosBehavior;

impl CiscoIosBehavior {
    async fn save(&self, session: &mut Session<'_>) -> Result<()> {
        session.send_slow("write memory").await?;
        Ok(())
    }
}

#[async_trait]
impl VendorBehavior for CiscoIosBehavior {
    async fn default_file_system(&self, session: &mut Session<'_>) -> Result<String> {
        let output = session.send("dir").await?;
        match capture(r"Directory of (?P<fs>[\w-]+:)", &output, "fs")? {
            Some(fs) => Ok(fs.to_string()),
            None => session
                .definition()
                .default_file_system
                .clone()
                .ok_or_else(|| parse_error("dir", "no file system in output")),
        }
    }

    async fn checksum(&self, session: &mut Session<'_>, file: &RemoteFile) -> Result<Checksum> {
        let command = format!("verify /sha512 {}", file.location());
        let output = session
            .send_slow(&command)
            .await
            .map_err(|e| missing_as_not_found(e, file))?;
        if looks_missing(&output) {
            return Err(not_found(file));
        }
        Checksum::find_in(ChecksumAlgorithm::Sha512, &output)
            .ok_or_else(|| parse_error(&command, "no sha512 digest in output"))
    }

    async fn free_space(&self, session: &mut Session<'_>, file_system: &str) -> Result<u64> {
        let command = format!("dir {}", file_system);
        let output = session.send(&command).await?;
        bytes_free(&command, &output)
    }

    async fn boot_target(&self, session: &mut Session<'_>) -> Result<BootTarget> {
        // Catalyst switches report a BOOT path; routers only have config lines.
        match session.send("show boot").await {
            Ok(output) => {
                if let Some(path) = capture(
                    r"(?m)^BOOT (?:variable|path-list)\s*[:=]\s*(?P<path>[^;,\s]+)",
                    &output,
                    "path",
                )? {
                    return Ok(split_location(path));
                }
            }
            Err(Error::Device(DeviceError::CommandFailed { .. })) => {}
            Err(e) => return Err(e),
        }

        let command = "show running-config | include ^boot system";
        let output = session.send(command).await?;
        let re = r"(?m)^boot system (?:(?P<fsword>flash|bootflash|disk\d|usbflash\d) )?(?P<path>\S+)\s*$";
        let path = capture(re, &output, "path")?
            .ok_or_else(|| parse_error(command, "no boot image configured"))?;
        match capture(re, &output, "fsword")? {
            Some(fs) => Ok(BootTarget::new(path.trim_start_matches('/'), format!("{}:", fs))),
            None => Ok(split_location(path)),
        }
    }

    async fn set_boot_target(&self, session: &mut Session<'_>, target: &BootTarget) -> Result<()> {
        ensure_listed(session, target).await?;

        let boot = format!("boot system {}", target.location());
        session.send_config(&["no boot system", boot.as_str()]).await?;
        self.save(session).await?;
        info!("{}: boot system set to {}", session.host(), target);
        Ok(())
    }

    async fn trigger_reboot(&self, session: &mut Session<'_>) -> Result<()> {
        let output = session
            .send_interactive(&[InteractiveEvent::new("reload", RELOAD_PROMPT)?])
            .await?;

        // Unsaved changes: decline saving, then confirm.
        if output.contains("[yes/no]") {
            debug!("{}: declining to save configuration before reload", session.host());
            session
                .send_interactive(&[InteractiveEvent::new("no", r"(?i)\[confirm\]")?])
                .await?;
        }

        session
            .send_and_drop(
                InteractiveEvent::new("", r"(?i)reload requested")?
                    .with_timeout(Duration::from_secs(10)),
            )
            .await?;
        Ok(())
    }

    async fn redundancy_state(&self, session: &mut Session<'_>) -> Result<RedundancyState> {
        let command = "show redundancy states";
        let output = match session.send(command).await {
            Ok(output) => output,
            Err(Error::Device(DeviceError::CommandFailed { .. })) => {
                return Err(session.unsupported("redundancy_state"));
            }
            Err(e) => return Err(e),
        };

        let my_state = capture(r"(?m)my state = \d+\s*-(?P<s>.+?)\s*$", &output, "s")?
            .ok_or_else(|| parse_error(command, "no local redundancy state"))?;
        let peer_state = capture(r"(?m)peer state = \d+\s*-(?P<s>.+?)\s*$", &output, "s")?;
        let mode = capture(r"(?m)^\s*Mode = (?P<m>\S+)", &output, "m")?;

        if mode == Some("Simplex") {
            let mut state = RedundancyState::standalone();
            state.detail = Some(format!("my state {}, mode Simplex", my_state));
            return Ok(state);
        }

        let role = role_from(my_state);
        let peer = peer_state.map(role_from);
        let peer_reachable = peer_state.is_some_and(|s| !s.contains("DISABLED"));
        let peer_consistent = match role {
            RedundancyRole::Active => peer_state.is_some_and(|s| s.contains("STANDBY HOT")),
            RedundancyRole::Standby => peer == Some(RedundancyRole::Active),
            _ => false,
        };

        Ok(RedundancyState {
            role,
            peer_role: peer,
            peer_reachable,
            peer_consistent,
            detail: Some(format!(
                "my state {}, peer state {}",
                my_state,
                peer_state.unwrap_or("unknown")
            )),
        })
    }
}
