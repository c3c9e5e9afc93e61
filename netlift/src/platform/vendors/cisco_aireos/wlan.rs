//! Parsers for AireOS controller output.

use regex::Regex;

use crate::error::{PlatformError, Result};

const WLAN_ROW: &str = r"(?m)^(?P<wlan_id>\d+)\s+(?P<profile>\S+)\s*/\s+(?P<ssid>\S+)\s+(?P<status>\S+)\s+(?P<interface>.+?)\s*\S+\s*$";
const VERSION_IN_FILENAME: &str = r"^.+?(?P<version>\d+(?:-|_)\d+(?:-|_)\d+(?:-|_)\d+)\.";
const BOOT_SLOT: &str =
    r"(?m)^(?P<slot>Primary|Backup)\s+Boot\s+Image\s*\.+\s*(?P<version>\S+)(?P<flags>.*)$";
const AP_TOTAL: &str = r"(?m)^[Tt]otal\s+number\s+of\s+APs\.+\s+(?P<count>\d+)\s*$";
const AP_DOWNLOADED: &str = r"(?m)^\s*[Cc]ompleted\s+[Pp]redownloading\.+\s+(?P<count>\d+)\s*$";
const AP_UNSUPPORTED: &str = r"(?m)^\s*[Nn]ot\s+[Ss]upported\.+\s+(?P<count>\d+)";
const AP_FAILED: &str = r"(?m)^\s*[Ff]ailed\s+to\s+[Pp]redownload\.+\s+(?P<count>\d+)";

fn regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| PlatformError::InvalidPattern(e).into())
}

/// One row of `show wlan summary`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wlan {
    pub id: u32,
    pub profile: String,
    pub ssid: String,
    pub enabled: bool,
    pub interface: String,
}

pub fn parse_wlans(output: &str) -> Result<Vec<Wlan>> {
    Ok(regex(WLAN_ROW)?
        .captures_iter(output)
        .filter_map(|caps| {
            Some(Wlan {
                id: caps.name("wlan_id")?.as_str().parse().ok()?,
                profile: caps.name("profile")?.as_str().to_string(),
                ssid: caps.name("ssid")?.as_str().to_string(),
                enabled: caps.name("status")?.as_str().eq_ignore_ascii_case("enabled"),
                interface: caps.name("interface")?.as_str().trim().to_string(),
            })
        })
        .collect())
}

/// Release version embedded in an image file name.
///
/// `AIR-CT5520-K9-8-8-125-0.aes` is release `8.8.125.0`.
pub fn filename_to_version(file_name: &str) -> Option<String> {
    Regex::new(VERSION_IN_FILENAME)
        .ok()?
        .captures(file_name)
        .and_then(|caps| caps.name("version"))
        .map(|m| m.as_str().replace(['-', '_'], "."))
}

/// Release a target names, whether given as a file name or a bare version.
pub fn target_version(image: &str) -> String {
    filename_to_version(image).unwrap_or_else(|| image.trim().to_string())
}

/// The two image slots from `show boot`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootSlots {
    pub primary: Option<String>,
    pub backup: Option<String>,

    /// Slot marked `(default)`, the one loaded on the next boot.
    pub default: Option<&'static str>,
}

impl BootSlots {
    /// Slot holding `version`, preferring the primary.
    pub fn slot_of(&self, version: &str) -> Option<&'static str> {
        if self.primary.as_deref() == Some(version) {
            Some("primary")
        } else if self.backup.as_deref() == Some(version) {
            Some("backup")
        } else {
            None
        }
    }

    pub fn version_in(&self, slot: &str) -> Option<&str> {
        match slot {
            "primary" => self.primary.as_deref(),
            "backup" => self.backup.as_deref(),
            _ => None,
        }
    }
}

pub fn parse_boot(output: &str) -> Result<BootSlots> {
    let mut slots = BootSlots::default();
    for caps in regex(BOOT_SLOT)?.captures_iter(output) {
        let version = caps.name("version").map(|m| m.as_str().to_string());
        let is_default = caps
            .name("flags")
            .is_some_and(|m| m.as_str().contains("(default)"));
        let slot = match caps.name("slot").map(|m| m.as_str()) {
            Some("Primary") => {
                slots.primary = version;
                "primary"
            }
            _ => {
                slots.backup = version;
                "backup"
            }
        };
        if is_default {
            slots.default = Some(slot);
        }
    }
    Ok(slots)
}

/// AP predownload counters from `show ap image all`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApImageStats {
    pub total: u32,
    pub downloaded: u32,
    pub unsupported: u32,
    pub failed: u32,
}

impl ApImageStats {
    /// Whether every AP that can take the image has it.
    pub fn is_complete(&self) -> bool {
        self.downloaded + self.unsupported >= self.total
    }
}

fn count(pattern: &str, output: &str) -> Result<u32> {
    Ok(regex(pattern)?
        .captures(output)
        .and_then(|caps| caps.name("count"))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0))
}

pub fn parse_ap_image_stats(output: &str) -> Result<ApImageStats> {
    Ok(ApImageStats {
        total: count(AP_TOTAL, output)?,
        downloaded: count(AP_DOWNLOADED, output)?,
        unsupported: count(AP_UNSUPPORTED, output)?,
        failed: count(AP_FAILED, output)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_to_version() {
        for (name, version) in [
            ("AIR-CT5520-K9-8-8-125-0.aes", "8.8.125.0"),
            ("AIR-CT5520-8-8-125-0.aes", "8.8.125.0"),
            ("AS_5500_8_5_161_7.aes", "8.5.161.7"),
            ("AP_BUNDLE_5500_8_5_161_7.aes", "8.5.161.7"),
        ] {
            assert_eq!(filename_to_version(name).as_deref(), Some(version), "{name}");
        }
        assert_eq!(filename_to_version("8.8.125.0"), None);
        assert_eq!(target_version("8.8.125.0"), "8.8.125.0");
    }

    #[test]
    fn test_parse_wlans() {
        let output = "\
Number of WLANs.................................. 3

WLAN ID  WLAN Profile Name / SSID               Status    Interface Name        PMIPv6 Mobility
-------  -------------------------------------  --------  --------------------  ---------------
1        corp / corp                            Enabled   management            none
2        guest / guest-wifi                     Disabled  guest-vlan            none
3        voice / voice                          Enabled   voice                 none";

        let wlans = parse_wlans(output).unwrap();
        assert_eq!(wlans.len(), 3);
        assert_eq!(wlans[1].ssid, "guest-wifi");
        assert_eq!(wlans[1].interface, "guest-vlan");
        let enabled: Vec<u32> = wlans.iter().filter(|w| w.enabled).map(|w| w.id).collect();
        assert_eq!(enabled, vec![1, 3]);
    }

    #[test]
    fn test_parse_boot() {
        let slots = parse_boot(
            "Primary Boot Image............................... 8.5.110.0\n\
             Backup Boot Image................................ 8.8.125.0 (default) (active)",
        )
        .unwrap();
        assert_eq!(slots.primary.as_deref(), Some("8.5.110.0"));
        assert_eq!(slots.default, Some("backup"));
        assert_eq!(slots.slot_of("8.8.125.0"), Some("backup"));
        assert_eq!(slots.slot_of("8.10.1.0"), None);
    }

    #[test]
    fn test_parse_ap_image_stats() {
        let output = "\
Total number of APs.............................. 10

Number of APs
        Initiated....................................... 0
        Predownloading.................................. 2
        Completed predownloading........................ 7
        Not Supported................................... 1
        Failed to Predownload........................... 0";
        let stats = parse_ap_image_stats(output).unwrap();
        assert_eq!(
            stats,
            ApImageStats {
                total: 10,
                downloaded: 7,
                unsupported: 1,
                failed: 0
            }
        );
        assert!(!stats.is_complete());
    }
}
