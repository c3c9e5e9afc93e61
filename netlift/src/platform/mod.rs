//! Platform definitions for multi-vendor support.
//!
//! Each backend is independent: a [`PlatformDefinition`] carrying prompts,
//! failure patterns and facts commands, plus a [`VendorBehavior`] that maps
//! the capability contract onto that vendor's commands. Backends are picked
//! by [`Platform`] tag when a device is built.

mod definition;
pub mod vendors;

pub use definition::PlatformDefinition;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::device::{
    BootTarget, Checksum, Facts, RedundancyState, RemoteFile, Session, StagedChanges,
};
use crate::error::{DeviceError, Error, PlatformError, Result};

/// Built-in platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    CiscoIos,
    CiscoNxos,
    AristaEos,
    JuniperJunos,
    CiscoAireos,
}

impl Platform {
    /// All built-in platforms.
    pub const ALL: [Platform; 5] = [
        Platform::CiscoIos,
        Platform::CiscoNxos,
        Platform::AristaEos,
        Platform::JuniperJunos,
        Platform::CiscoAireos,
    ];

    /// Canonical name of the platform.
    pub fn name(self) -> &'static str {
        match self {
            Platform::CiscoIos => vendors::cisco_ios::PLATFORM_NAME,
            Platform::CiscoNxos => vendors::cisco_nxos::PLATFORM_NAME,
            Platform::AristaEos => vendors::arista_eos::PLATFORM_NAME,
            Platform::JuniperJunos => vendors::juniper_junos::PLATFORM_NAME,
            Platform::CiscoAireos => vendors::cisco_aireos::PLATFORM_NAME,
        }
    }

    /// Build a fresh definition for this platform.
    pub fn definition(self) -> Result<PlatformDefinition> {
        match self {
            Platform::CiscoIos => vendors::cisco_ios::platform(),
            Platform::CiscoNxos => vendors::cisco_nxos::platform(),
            Platform::AristaEos => vendors::arista_eos::platform(),
            Platform::JuniperJunos => vendors::juniper_junos::platform(),
            Platform::CiscoAireos => vendors::cisco_aireos::platform(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = PlatformError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| PlatformError::UnknownPlatform { name: s.to_string() })
    }
}

/// Vendor-specific half of the device contract.
///
/// Defaults report the operation as unsupported, which the lifecycle layer
/// reads as a capability signal.
#[async_trait]
pub trait VendorBehavior: Send + Sync {
    /// Discover the device's default file system.
    async fn default_file_system(&self, session: &mut Session<'_>) -> Result<String> {
        session
            .definition()
            .default_file_system
            .clone()
            .ok_or_else(|| session.unsupported("default_file_system"))
    }

    /// Whether `file` exists on the device.
    async fn file_exists(&self, session: &mut Session<'_>, file: &RemoteFile) -> Result<bool> {
        let command = format!("dir {}", file.location());
        match session.send(&command).await {
            Ok(output) => Ok(!looks_missing(&output) && output.contains(file.file_name())),
            Err(Error::Device(DeviceError::CommandFailed { .. })) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Digest of a remote file, computed by the device.
    async fn checksum(&self, session: &mut Session<'_>, _file: &RemoteFile) -> Result<Checksum> {
        Err(session.unsupported("checksum"))
    }

    /// Free bytes on `file_system`.
    async fn free_space(&self, session: &mut Session<'_>, _file_system: &str) -> Result<u64> {
        Err(session.unsupported("free_space"))
    }

    /// Image the device will load on next boot.
    async fn boot_target(&self, session: &mut Session<'_>) -> Result<BootTarget> {
        Err(session.unsupported("boot_target"))
    }

    /// Point the next boot at `target` and persist it.
    async fn set_boot_target(&self, session: &mut Session<'_>, _target: &BootTarget) -> Result<()> {
        Err(session.unsupported("set_boot_target"))
    }

    /// Install `target`; the device reboots into it on its own.
    async fn install(&self, session: &mut Session<'_>, _target: &BootTarget) -> Result<()> {
        Err(session.unsupported("install"))
    }

    /// Issue a reload and return without waiting for the device.
    async fn trigger_reboot(&self, session: &mut Session<'_>) -> Result<()> {
        Err(session.unsupported("trigger_reboot"))
    }

    /// Active/standby state of the unit and its peer.
    async fn redundancy_state(&self, session: &mut Session<'_>) -> Result<RedundancyState> {
        Err(session.unsupported("redundancy_state"))
    }

    /// Pause dependent services ahead of a disruptive change.
    async fn pre_stage(
        &self,
        session: &mut Session<'_>,
        _target: &BootTarget,
    ) -> Result<StagedChanges> {
        Err(session.unsupported("pre_stage"))
    }

    /// Undo whatever `pre_stage` paused.
    async fn post_stage(&self, session: &mut Session<'_>, staged: &StagedChanges) -> Result<()> {
        if staged.is_empty() {
            Ok(())
        } else {
            Err(session.unsupported("post_stage"))
        }
    }

    /// Whether the device described by `facts` runs `target`.
    fn image_matches(&self, facts: &Facts, target: &BootTarget) -> bool {
        facts
            .running_image
            .as_deref()
            .map(|running| base_name(running) == base_name(&target.image))
            .unwrap_or(false)
    }

    /// Whether two boot targets name the same image.
    fn boot_target_matches(&self, current: &BootTarget, requested: &BootTarget) -> bool {
        base_name(&current.image) == base_name(&requested.image)
            && trim_fs(&current.file_system) == trim_fs(&requested.file_system)
    }
}

/// Last path component of an image reference.
pub fn base_name(image: &str) -> &str {
    image.rsplit(['/', ':']).next().unwrap_or(image)
}

fn trim_fs(file_system: &str) -> &str {
    file_system.trim_end_matches(['/', ':'])
}

/// Whether device output reports a missing file.
pub(crate) fn looks_missing(output: &str) -> bool {
    let lower = output.to_ascii_lowercase();
    [
        "no such file",
        "not found",
        "invalid path",
        "does not exist",
        "error opening",
        "could not resolve",
    ]
        .iter()
        .any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_names_round_trip() {
        for platform in Platform::ALL {
            assert_eq!(platform.name().parse::<Platform>().unwrap(), platform);
        }
        assert!(matches!(
            "linux".parse::<Platform>(),
            Err(PlatformError::UnknownPlatform { .. })
        ));
    }

    #[test]
    fn test_every_definition_builds() {
        for platform in Platform::ALL {
            let definition = platform.definition().unwrap();
            assert_eq!(definition.name, platform.name());
            assert!(!definition.facts_commands.is_empty());
        }
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("flash:/c2960.bin"), "c2960.bin");
        assert_eq!(base_name("bootflash:nxos.bin"), "nxos.bin");
        assert_eq!(base_name("/var/tmp/junos.tgz"), "junos.tgz");
        assert_eq!(base_name("EOS.swi"), "EOS.swi");
    }

    #[test]
    fn test_looks_missing() {
        assert!(looks_missing("%Error opening flash:x.bin (No such file or directory)"));
        assert!(looks_missing("error: file not found"));
        assert!(looks_missing("error: could not resolve file: /var/tmp/x.tgz"));
        assert!(!looks_missing("Directory of flash:/\n  1  -rwx  1234  c2960.bin"));
    }
}
