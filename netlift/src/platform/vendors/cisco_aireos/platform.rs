//! Cisco AireOS wireless controller definition.
//!
//! # Prompt Examples
//!
//! ```text
//! (Cisco Controller) >           # exec
//! (wlc-01) config>               # config
//! ```

use std::sync::Arc;

use super::{CiscoAireosBehavior, PLATFORM_NAME};
use crate::device::RegexFactsParser;
use crate::error::Result;
use crate::platform::PlatformDefinition;

const PROMPT: &str = r"(?m)^\([\w.\-@ ]{1,63}\)\s?(?:config)?>\s?$";

/// Create the Cisco AireOS platform definition.
///
/// Controllers pull images themselves and cannot hash files, so the
/// definition carries no checksum algorithm. Configuration is sent as
/// one-line `config ...` commands from the exec prompt.
pub fn platform() -> Result<PlatformDefinition> {
    let parser = RegexFactsParser::new()
        .with_hostname(r"(?m)^System Name\.+\s*(?P<value>\S+)")?
        .with_os_version(r"(?m)^Product Version\.+\s*(?P<value>\S+)")?
        .with_model(r"(?m)^PID:\s*(?P<value>[^,\s]+)")?
        .with_serial_number(r"(?m)SN:\s*(?P<value>\S+)")?
        .with_extra("uptime", r"(?m)^System Up Time\.+\s*(?P<value>.+?)\s*$")?;

    Ok(
        PlatformDefinition::new(PLATFORM_NAME, PROMPT, Arc::new(CiscoAireosBehavior))?
            .with_failure_pattern("Incorrect usage")
            .with_failure_pattern("Incorrect input")
            .with_failure_pattern("Error:")
            .with_failure_pattern("% Invalid")
            .with_on_open_command("config paging disable")
            .with_facts_command("show sysinfo")
            .with_facts_command("show inventory")
            .with_facts_parser(Arc::new(parser)),
    )
}
