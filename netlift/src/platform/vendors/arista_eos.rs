//! Arista EOS platform.
//!
//! # Prompt Examples
//!
//! ```text
//! switch>                            # exec mode
//! switch#                            # privileged exec
//! switch(config)#                    # configuration mode
//! switch(config-if-Et1)#             # config sub-mode
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::info;

use super::{
    bytes_free, capture, ensure_listed, missing_as_not_found, not_found, parse_error,
    split_location,
};
use crate::device::{
    BootTarget, Checksum, ChecksumAlgorithm, Facts, RegexFactsParser, RemoteFile, Session,
};
use crate::error::Result;
use crate::platform::{PlatformDefinition, VendorBehavior, base_name, looks_missing};
use crate::transport::InteractiveEvent;

pub const PLATFORM_NAME: &str = "arista_eos";

const PROMPT: &str = r"(?mi)^[\w.\-@()/: ]{1,63}(?:\(config[\w.\-@/:+]{0,63}\))?[>#]\s?$";

/// Create the Arista EOS platform definition.
pub fn platform() -> Result<PlatformDefinition> {
    let parser = RegexFactsParser::new()
        .with_hostname(r"(?m)^Hostname:\s*(?P<value>\S+)")?
        .with_os_version(r"(?m)^Software image version:\s*(?P<value>\S+)")?
        .with_model(r"(?m)^Arista (?P<value>\S+)")?
        .with_serial_number(r"(?m)^Serial number:\s*(?P<value>\S+)")?
        .with_interfaces(r"(?m)^(?P<value>(?:Et|Ma|Po|Vl)\S*\d)\s")?
        .with_extra("fqdn", r"(?m)^FQDN:\s*(?P<value>\S+)")?;

    Ok(
        PlatformDefinition::new(PLATFORM_NAME, PROMPT, Arc::new(AristaEosBehavior))?
            .with_failure_pattern("% Ambiguous command")
            .with_failure_pattern("% Error")
            .with_failure_pattern("% Incomplete command")
            .with_failure_pattern("% Invalid input")
            .with_failure_pattern("% Cannot commit")
            .with_failure_pattern("% Unavailable command")
            .with_on_open_command("terminal length 0")
            .with_on_open_command("terminal width 32767")
            .with_facts_command("show version")
            .with_facts_command("show hostname")
            .with_facts_command("show interfaces status")
            .with_config_mode("configure terminal", "end")
            .with_default_file_system("flash:")
            .with_checksum_algorithm(ChecksumAlgorithm::Sha512)
            .with_terminal_size(32767, 24)
            .with_facts_parser(Arc::new(parser)),
    )
}

/// EOS behavior.
pub struct AristaEosBehavior;

#[async_trait]
impl VendorBehavior for AristaEosBehavior {
    async fn default_file_system(&self, session: &mut Session<'_>) -> Result<String> {
        let output = session.send("dir").await?;
        capture(r"Directory of\s*(?P<fs>\S+?:)", &output, "fs")?
            .map(str::to_string)
            .ok_or_else(|| parse_error("dir", "no file system in output"))
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
        let command = "show boot-config";
        let output = session.send(command).await?;
        let path = capture(r"(?m)^Software image:\s*(?P<path>\S+)", &output, "path")?
            .ok_or_else(|| parse_error(command, "no software image in boot-config"))?;
        Ok(split_location(path))
    }

    async fn set_boot_target(&self, session: &mut Session<'_>, target: &BootTarget) -> Result<()> {
        ensure_listed(session, target).await?;
        // `install source` updates boot-config, which EOS persists on its own.
        session
            .send(&format!("install source {}", target.location()))
            .await?;
        info!("{}: boot image set to {}", session.host(), target);
        Ok(())
    }

    async fn trigger_reboot(&self, session: &mut Session<'_>) -> Result<()> {
        session
            .send_and_drop(
                InteractiveEvent::new("reload now", r"(?i)restarting|reboot")?
                    .with_timeout(Duration::from_secs(10)),
            )
            .await?;
        Ok(())
    }

    fn image_matches(&self, facts: &Facts, target: &BootTarget) -> bool {
        // EOS reports a version, never the .swi it booted from.
        match facts.os_version.as_deref() {
            Some(version) => base_name(&target.image).contains(version),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::device::{Device, DeviceHandle};
    use crate::test_support::MockTransport;

    const SHOW_VERSION: &str = "\
Arista DCS-7050TX-64-R
Hardware version:    01.11
Serial number:       JPE16123456
System MAC address:  001c.7300.0001

Software image version: 4.22.1F
Architecture:           i686";

    async fn open(transport: MockTransport) -> DeviceHandle {
        let mut device = DeviceHandle::new(platform().unwrap(), Box::new(transport));
        device.open(Duration::from_secs(5)).await.unwrap();
        device
    }

    #[test]
    fn test_prompt_match() {
        let platform = platform().unwrap();
        assert!(platform.prompt.is_match(b"switch>"));
        assert!(platform.prompt.is_match(b"switch#"));
        assert!(platform.prompt.is_match(b"switch(config-if-Et1)#"));
        assert_eq!(platform.terminal_width, 32767);
    }

    #[tokio::test]
    async fn test_facts_and_image_match() {
        let mut device = open(
            MockTransport::new("sw1")
                .reply("show version", SHOW_VERSION)
                .reply("show hostname", "Hostname: sw1\nFQDN:     sw1.lab.example")
                .reply(
                    "show interfaces status",
                    "Port   Name   Status       Vlan     Duplex Speed  Type\n\
                     Et1           connected    1        full   10G    10GBASE-T\n\
                     Ma1           connected    routed   a-full a-1G   10/100/1000",
                ),
        )
        .await;

        let facts = device.refresh_facts().await.unwrap();
        assert_eq!(facts.hostname.as_deref(), Some("sw1"));
        assert_eq!(facts.model.as_deref(), Some("DCS-7050TX-64-R"));
        assert_eq!(facts.serial_number.as_deref(), Some("JPE16123456"));
        assert_eq!(facts.interfaces, vec!["Et1", "Ma1"]);
        assert_eq!(
            facts.extra.get("fqdn").map(String::as_str),
            Some("sw1.lab.example")
        );

        assert!(device.image_matches(&facts, &BootTarget::new("EOS-4.22.1F.swi", "flash:")));
        assert!(!device.image_matches(&facts, &BootTarget::new("EOS-4.24.0F.swi", "flash:")));
        device.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_boot_config_round_trip() {
        let transport = MockTransport::new("sw1")
            .reply("dir flash:", "Directory of flash:/\n  -rwx  800000000  EOS-4.24.0F.swi\n")
            .reply(
                "show boot-config",
                "Software image: flash:/EOS-4.24.0F.swi\nConsole speed: (not set)",
            );
        let log = transport.log();
        let mut device = open(transport).await;

        let target = BootTarget::new("EOS-4.24.0F.swi", "flash:");
        device.set_boot_target(&target).await.unwrap();
        assert!(log.sent().contains(&"install source flash:EOS-4.24.0F.swi".to_string()));

        let current = device.boot_target().await.unwrap();
        assert!(device.boot_target_matches(&current, &target));
        device.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_default_file_system() {
        let mut device = open(MockTransport::new("sw1").reply(
            "dir",
            "Directory of flash:/\n\n  -rwx  800000000  EOS-4.22.1F.swi\n\n3957878784 bytes total (2345078784 bytes free)",
        ))
        .await;
        assert_eq!(device.default_file_system().await.unwrap(), "flash:");
        device.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_reload_now() {
        let transport = MockTransport::new("sw1").drop_on("reload now");
        let log = transport.log();
        let mut device = open(transport).await;
        device.trigger_reboot().await.unwrap();
        assert_eq!(log.interactive(), vec!["reload now"]);
    }

    #[tokio::test]
    async fn test_redundancy_unsupported() {
        let mut device = open(MockTransport::new("sw1")).await;
        assert!(device.redundancy_state().await.unwrap_err().is_unsupported());
        device.close().await.unwrap();
    }
}
