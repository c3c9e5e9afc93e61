//! Juniper JUNOS platform.
//!
//! JUNOS has no boot variable to point at an image; a package is installed
//! with `request system software add` and the router reboots into it.
//!
//! # Prompt Examples
//!
//! ```text
//! user@router>              # operational mode
//! user@router#              # configuration mode
//! {master:0}                # routing-engine indicator (separate line)
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::info;

use super::{missing_as_not_found, not_found, parse_error};
use crate::device::{
    BootTarget, Checksum, ChecksumAlgorithm, Facts, RegexFactsParser, RemoteFile, Session,
};
use crate::error::{DeviceError, Error, Result};
use crate::platform::{PlatformDefinition, VendorBehavior, base_name, looks_missing};
use crate::transport::InteractiveEvent;

pub const PLATFORM_NAME: &str = "juniper_junos";

const PROMPT: &str = r"(?m)^[\w.\-@()/:]{1,63}[>#%]\s?$";

/// Create the Juniper JUNOS platform definition.
pub fn platform() -> Result<PlatformDefinition> {
    let parser = RegexFactsParser::new()
        .with_hostname(r"(?m)^Hostname:\s*(?P<value>\S+)")?
        .with_model(r"(?m)^Model:\s*(?P<value>\S+)")?
        .with_os_version(r"(?m)^Junos:\s*(?P<value>\S+)")?
        .with_serial_number(r"(?m)^Chassis\s+(?P<value>\S+)")?
        .with_interfaces(r"(?m)^(?P<value>(?:[gx]e|et|ae|em|fxp|lo|irb)-?[\d/.]*\d)\s+up")?;

    Ok(
        PlatformDefinition::new(PLATFORM_NAME, PROMPT, Arc::new(JuniperJunosBehavior))?
            .with_failure_pattern("error:")
            .with_failure_pattern("syntax error")
            .with_failure_pattern("unknown command")
            .with_failure_pattern("missing argument")
            .with_failure_pattern("ERROR:")
            .with_on_open_command("set cli screen-length 0")
            .with_on_open_command("set cli screen-width 511")
            .with_on_open_command("set cli complete-on-space off")
            .with_facts_command("show version")
            .with_facts_command("show chassis hardware")
            .with_facts_command("show interfaces terse")
            .with_config_mode("configure", "commit and-quit")
            .with_default_file_system("/var/tmp")
            .with_checksum_algorithm(ChecksumAlgorithm::Sha256)
            .with_facts_parser(Arc::new(parser)),
    )
}

/// Parse a `show system storage` size such as `1.2G` or `512K` into bytes.
fn parse_size(size: &str) -> Option<u64> {
    let (number, unit) = match size.char_indices().find(|(_, c)| c.is_ascii_alphabetic()) {
        Some((pos, _)) => size.split_at(pos),
        None => (size, ""),
    };
    let value: f64 = number.parse().ok()?;
    let scale = match unit.chars().next().map(|c| c.to_ascii_uppercase()) {
        None | Some('B') => 1u64,
        Some('K') => 1 << 10,
        Some('M') => 1 << 20,
        Some('G') => 1 << 30,
        Some('T') => 1 << 40,
        Some(_) => return None,
    };
    Some((value * scale as f64) as u64)
}

/// JUNOS behavior.
pub struct JuniperJunosBehavior;

#[async_trait]
impl VendorBehavior for JuniperJunosBehavior {
    async fn file_exists(&self, session: &mut Session<'_>, file: &RemoteFile) -> Result<bool> {
        let command = format!("file list {}", file.location());
        match session.send(&command).await {
            Ok(output) => Ok(!looks_missing(&output) && output.contains(file.file_name())),
            Err(Error::Device(DeviceError::CommandFailed { .. })) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn checksum(&self, session: &mut Session<'_>, file: &RemoteFile) -> Result<Checksum> {
        let command = format!("file checksum sha-256 {}", file.location());
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
        let command = "show system storage";
        let output = session.send(command).await?;

        // The mount holding `file_system` is the longest mount point prefixing it.
        let mut best: Option<(usize, u64)> = None;
        for line in output.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let Some(mount) = fields.last().filter(|m| m.starts_with('/')) else {
                continue;
            };
            if fields.len() < 6 {
                continue;
            }
            let mount_path = mount.trim_start_matches("/.mount");
            let covers = file_system == mount_path
                || mount_path == "/"
                || file_system.starts_with(&format!("{}/", mount_path));
            if !covers {
                continue;
            }
            if let Some(avail) = parse_size(fields[3]) {
                if best.is_none_or(|(len, _)| mount_path.len() > len) {
                    best = Some((mount_path.len(), avail));
                }
            }
        }
        best.map(|(_, avail)| avail)
            .ok_or_else(|| parse_error(command, format!("no mount covering {}", file_system)))
    }

    async fn install(&self, session: &mut Session<'_>, target: &BootTarget) -> Result<()> {
        let file = target.as_remote_file();
        if !self.file_exists(session, &file).await? {
            return Err(not_found(&file));
        }

        let command = format!(
            "request system software add {} no-validate reboot",
            target.location()
        );
        info!("{}: {}", session.host(), command);
        match session.send_slow(&command).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_transient() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn trigger_reboot(&self, session: &mut Session<'_>) -> Result<()> {
        let prompt = InteractiveEvent::new("request system reboot", r"\[yes,no\]")?;
        session.send_interactive(&[prompt]).await?;
        session
            .send_and_drop(
                InteractiveEvent::new("yes", r"(?i)shutdown|reboot")?
                    .with_timeout(Duration::from_secs(10)),
            )
            .await?;
        Ok(())
    }

    fn image_matches(&self, facts: &Facts, target: &BootTarget) -> bool {
        match facts.os_version.as_deref() {
            Some(version) => base_name(&target.image).contains(version),
            None => false,
        }
    }
}
