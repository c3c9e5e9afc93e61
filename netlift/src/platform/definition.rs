//! Platform definition for vendor-specific configurations.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use regex::bytes::Regex;

use super::VendorBehavior;
use crate::device::{ChecksumAlgorithm, FactsParser, RegexFactsParser};
use crate::error::{PlatformError, Result};

/// Platform definition containing all vendor-specific configuration.
///
/// Data lives in fields; anything that needs a conversation with the device
/// lives behind [`VendorBehavior`].
#[derive(Clone)]
pub struct PlatformDefinition {
    /// Platform name (e.g., "cisco_ios", "juniper_junos").
    pub name: String,

    /// Pattern matching the CLI prompt in any mode.
    pub prompt: Regex,

    /// Substrings that indicate command failure.
    pub failed_when_contains: Vec<String>,

    /// Commands to run when the session is established.
    pub on_open_commands: Vec<String>,

    /// Commands whose output feeds the facts parser, in order.
    pub facts_commands: Vec<String>,

    /// Command that enters configuration mode, if the platform has one.
    pub config_enter: Option<String>,

    /// Command that leaves configuration mode (and commits, where needed).
    pub config_exit: Option<String>,

    /// File system used when the device cannot tell us its own.
    pub default_file_system: Option<String>,

    /// Digest algorithm the device can compute over its own files.
    pub checksum_algorithm: Option<ChecksumAlgorithm>,

    /// Timeout for slow file operations (hashing, installs).
    pub file_operation_timeout: Duration,

    /// Terminal width for PTY.
    pub terminal_width: u32,

    /// Terminal height for PTY.
    pub terminal_height: u32,

    /// Parser turning facts command output into [`Facts`](crate::device::Facts).
    pub facts_parser: Arc<dyn FactsParser>,

    /// Vendor-specific behavior.
    pub behavior: Arc<dyn VendorBehavior>,
}

impl PlatformDefinition {
    /// Create a new platform definition with minimal required fields.
    pub fn new(
        name: impl Into<String>,
        prompt: &str,
        behavior: Arc<dyn VendorBehavior>,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            prompt: Regex::new(prompt).map_err(PlatformError::InvalidPattern)?,
            failed_when_contains: vec![],
            on_open_commands: vec![],
            facts_commands: vec![],
            config_enter: None,
            config_exit: None,
            default_file_system: None,
            checksum_algorithm: None,
            file_operation_timeout: Duration::from_secs(900),
            terminal_width: 511,
            terminal_height: 24,
            facts_parser: Arc::new(RegexFactsParser::new()),
            behavior,
        })
    }

    /// Add a failure pattern.
    pub fn with_failure_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.failed_when_contains.push(pattern.into());
        self
    }

    /// Add an on_open command.
    pub fn with_on_open_command(mut self, command: impl Into<String>) -> Self {
        self.on_open_commands.push(command.into());
        self
    }

    /// Add a facts command.
    pub fn with_facts_command(mut self, command: impl Into<String>) -> Self {
        self.facts_commands.push(command.into());
        self
    }

    /// Set the commands that enter and leave configuration mode.
    pub fn with_config_mode(mut self, enter: impl Into<String>, exit: impl Into<String>) -> Self {
        self.config_enter = Some(enter.into());
        self.config_exit = Some(exit.into());
        self
    }

    pub fn with_default_file_system(mut self, file_system: impl Into<String>) -> Self {
        self.default_file_system = Some(file_system.into());
        self
    }

    pub fn with_checksum_algorithm(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.checksum_algorithm = Some(algorithm);
        self
    }

    pub fn with_file_operation_timeout(mut self, timeout: Duration) -> Self {
        self.file_operation_timeout = timeout;
        self
    }

    /// Set terminal dimensions.
    pub fn with_terminal_size(mut self, width: u32, height: u32) -> Self {
        self.terminal_width = width;
        self.terminal_height = height;
        self
    }

    /// Replace the facts parser.
    pub fn with_facts_parser(mut self, parser: Arc<dyn FactsParser>) -> Self {
        self.facts_parser = parser;
        self
    }

    /// First failure pattern found in `output`, if any.
    pub fn detect_failure(&self, output: &str) -> Option<&str> {
        self.failed_when_contains
            .iter()
            .find(|pattern| output.contains(pattern.as_str()))
            .map(String::as_str)
    }
}

impl fmt::Debug for PlatformDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformDefinition")
            .field("name", &self.name)
            .field("prompt", &self.prompt.as_str())
            .field("failed_when_contains", &self.failed_when_contains)
            .field("on_open_commands", &self.on_open_commands)
            .field("facts_commands", &self.facts_commands)
            .field("config_enter", &self.config_enter)
            .field("config_exit", &self.config_exit)
            .field("default_file_system", &self.default_file_system)
            .field("checksum_algorithm", &self.checksum_algorithm)
            .field("file_operation_timeout", &self.file_operation_timeout)
            .field("terminal_width", &self.terminal_width)
            .field("terminal_height", &self.terminal_height)
            .field("behavior", &"<VendorBehavior>")
            .finish()
    }
}
