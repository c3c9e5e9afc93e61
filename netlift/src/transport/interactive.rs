//! Prompted command sequences.
//!
//! Disruptive commands ask before acting, and each vendor asks differently:
//!
//! ```text
//! reload                  Proceed with reload? [confirm]
//! reset system            Are you sure you would like to reset the system? (y/N)
//! request system reboot   Reboot the system ? [yes,no] (no)
//! ```
//!
//! Each event sends its input and then waits for its pattern before the
//! next one is sent.

use std::time::Duration;

use regex::bytes::Regex;

use crate::error::{PlatformError, Result};

/// One input and the output that must follow it.
#[derive(Debug, Clone)]
pub struct InteractiveEvent {
    pub input: String,
    pub pattern: Regex,

    /// Overrides the transport's command timeout for this step.
    pub timeout: Option<Duration>,
}

impl InteractiveEvent {
    pub fn new(input: impl Into<String>, pattern: &str) -> Result<Self> {
        Ok(Self {
            input: input.into(),
            pattern: Regex::new(pattern).map_err(PlatformError::InvalidPattern)?,
            timeout: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Step that waits for the device prompt again.
    pub fn until_prompt(input: impl Into<String>, prompt: &Regex) -> Self {
        Self {
            input: input.into(),
            pattern: prompt.clone(),
            timeout: None,
        }
    }
}
