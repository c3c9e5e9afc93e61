//! Built-in vendor backends.
//!
//! Each backend is self-contained. The helpers below are plain functions
//! over command output; nothing here is a base class.

pub mod arista_eos;
pub mod cisco_aireos;
pub mod cisco_ios;
pub mod cisco_nxos;
pub mod juniper_junos;

use regex::Regex;

use crate::device::{BootTarget, RedundancyRole, RemoteFile, Session};
use crate::error::{DeviceError, Error, PlatformError, Result};
use crate::platform::looks_missing;

/// First match of `group` in `text`.
pub(crate) fn capture<'t>(pattern: &str, text: &'t str, group: &str) -> Result<Option<&'t str>> {
    let re = Regex::new(pattern).map_err(PlatformError::InvalidPattern)?;
    Ok(re
        .captures(text)
        .and_then(|caps| caps.name(group))
        .map(|m| m.as_str().trim()))
}

/// Every match of `group` in `text`.
pub(crate) fn capture_all<'t>(pattern: &str, text: &'t str, group: &str) -> Result<Vec<&'t str>> {
    let re = Regex::new(pattern).map_err(PlatformError::InvalidPattern)?;
    Ok(re
        .captures_iter(text)
        .filter_map(|caps| caps.name(group))
        .map(|m| m.as_str().trim())
        .collect())
}

pub(crate) fn parse_error(command: &str, message: impl Into<String>) -> Error {
    DeviceError::Parse {
        command: command.to_string(),
        message: message.into(),
    }
    .into()
}

pub(crate) fn not_found(file: &RemoteFile) -> Error {
    DeviceError::FileNotFound {
        file: file.path.clone(),
        file_system: file.file_system.clone(),
    }
    .into()
}

/// Turn a failed command about `file` into `FileNotFound` when the device
/// said the file is missing.
pub(crate) fn missing_as_not_found(err: Error, file: &RemoteFile) -> Error {
    match &err {
        Error::Device(DeviceError::CommandFailed { message, .. }) if looks_missing(message) => {
            not_found(file)
        }
        _ => err,
    }
}

/// Free bytes from a `dir` style listing ("... (1234 bytes free)").
pub(crate) fn bytes_free(command: &str, output: &str) -> Result<u64> {
    capture(r"(?i)(?P<free>\d+) bytes free", output, "free")?
        .and_then(|free| free.parse().ok())
        .ok_or_else(|| parse_error(command, "no free byte count in output"))
}

/// Split `flash:/image.bin` into a boot target.
pub(crate) fn split_location(location: &str) -> BootTarget {
    match location.find(':') {
        Some(pos) => BootTarget::new(
            location[pos + 1..].trim_start_matches('/'),
            &location[..=pos],
        ),
        None => BootTarget::new(location, ""),
    }
}

/// Role from a vendor state string such as `ACTIVE` or `STANDBY HOT`.
pub(crate) fn role_from(state: &str) -> RedundancyRole {
    let upper = state.trim().to_ascii_uppercase();
    if upper.starts_with("ACTIVE") {
        RedundancyRole::Active
    } else if upper.contains("STANDBY") {
        RedundancyRole::Standby
    } else {
        RedundancyRole::Unknown
    }
}

/// Fail with `FileNotFound` unless a listing of the target's file system
/// mentions the image.
pub(crate) async fn ensure_listed(session: &mut Session<'_>, target: &BootTarget) -> Result<()> {
    let file = target.as_remote_file();
    let command = format!("dir {}", target.file_system);
    let listing = session
        .send(&command)
        .await
        .map_err(|e| missing_as_not_found(e, &file))?;
    if listing.contains(target.image.as_str()) {
        Ok(())
    } else {
        Err(not_found(&file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_location() {
        assert_eq!(
            split_location("flash:/c2960.bin"),
            BootTarget::new("c2960.bin", "flash:")
        );
        assert_eq!(
            split_location("bootflash:nxos.9.3.8.bin"),
            BootTarget::new("nxos.9.3.8.bin", "bootflash:")
        );
        assert_eq!(split_location("EOS.swi"), BootTarget::new("EOS.swi", ""));
    }

    #[test]
    fn test_bytes_free() {
        let listing = "Directory of flash:/\n\n    2  -rwx  18000000  c2960.bin\n\n\
                       32514048 bytes total (14389760 bytes free)";
        assert_eq!(bytes_free("dir flash:", listing).unwrap(), 14389760);
        assert!(bytes_free("dir flash:", "nothing useful").is_err());
    }

    #[test]
    fn test_role_from() {
        assert_eq!(role_from("ACTIVE"), RedundancyRole::Active);
        assert_eq!(role_from("STANDBY HOT"), RedundancyRole::Standby);
        assert_eq!(role_from("Standby"), RedundancyRole::Standby);
        assert_eq!(role_from("DISABLED"), RedundancyRole::Unknown);
    }

    #[test]
    fn test_missing_as_not_found() {
        let file = RemoteFile::new("flash:", "x.bin");
        let err = missing_as_not_found(
            DeviceError::CommandFailed {
                command: "verify /sha512 flash:x.bin".into(),
                message: "%Error opening flash:x.bin (No such file or directory)".into(),
            }
            .into(),
            &file,
        );
        assert!(err.is_file_not_found());
    }
}
