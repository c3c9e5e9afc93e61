//! Device facts and the injected parsing seam.
//!
//! Turning raw vendor output into structured data is not this crate's job.
//! The core only needs a handful of fields to validate an upgrade, so it
//! takes a [`FactsParser`] and ships [`RegexFactsParser`] as a default that
//! each platform configures with its own patterns.

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{PlatformError, Result};

/// Snapshot of identifying facts about a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facts {
    pub hostname: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub os_version: Option<String>,

    /// Image file the device is running, when the platform reports one.
    pub running_image: Option<String>,

    pub interfaces: Vec<String>,

    /// Vendor-specific extras.
    pub extra: IndexMap<String, String>,
}

/// Converts raw command output into [`Facts`].
///
/// `outputs` holds the output of the platform's facts commands, in order.
pub trait FactsParser: Send + Sync {
    fn parse(&self, outputs: &[String]) -> Result<Facts>;
}

impl<F> FactsParser for F
where
    F: Fn(&[String]) -> Result<Facts> + Send + Sync,
{
    fn parse(&self, outputs: &[String]) -> Result<Facts> {
        self(outputs)
    }
}

/// Facts parser driven by one regex per field.
///
/// Every pattern must contain a capture group named `value`. The interface
/// pattern is applied repeatedly; every other pattern takes its first match.
#[derive(Debug, Clone, Default)]
pub struct RegexFactsParser {
    hostname: Option<Regex>,
    model: Option<Regex>,
    serial_number: Option<Regex>,
    os_version: Option<Regex>,
    running_image: Option<Regex>,
    interfaces: Option<Regex>,
    extra: IndexMap<String, Regex>,
}

fn compile(pattern: &str) -> Result<Regex> {
    let re = Regex::new(pattern).map_err(PlatformError::InvalidPattern)?;
    if re.capture_names().flatten().all(|name| name != "value") {
        return Err(PlatformError::InvalidDefinition {
            message: format!("facts pattern '{}' has no 'value' group", pattern),
        }
        .into());
    }
    Ok(re)
}

fn first(re: Option<&Regex>, text: &str) -> Option<String> {
    re.and_then(|re| re.captures(text))
        .and_then(|caps| caps.name("value"))
        .map(|m| m.as_str().trim().to_string())
        .filter(|v| !v.is_empty())
}

impl RegexFactsParser {
    /// Create a parser with no patterns.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hostname(mut self, pattern: &str) -> Result<Self> {
        self.hostname = Some(compile(pattern)?);
        Ok(self)
    }

    pub fn with_model(mut self, pattern: &str) -> Result<Self> {
        self.model = Some(compile(pattern)?);
        Ok(self)
    }

    pub fn with_serial_number(mut self, pattern: &str) -> Result<Self> {
        self.serial_number = Some(compile(pattern)?);
        Ok(self)
    }

    pub fn with_os_version(mut self, pattern: &str) -> Result<Self> {
        self.os_version = Some(compile(pattern)?);
        Ok(self)
    }

    pub fn with_running_image(mut self, pattern: &str) -> Result<Self> {
        self.running_image = Some(compile(pattern)?);
        Ok(self)
    }

    pub fn with_interfaces(mut self, pattern: &str) -> Result<Self> {
        self.interfaces = Some(compile(pattern)?);
        Ok(self)
    }

    /// Add a vendor-specific field stored under `key` in [`Facts::extra`].
    pub fn with_extra(mut self, key: impl Into<String>, pattern: &str) -> Result<Self> {
        self.extra.insert(key.into(), compile(pattern)?);
        Ok(self)
    }
}

impl FactsParser for RegexFactsParser {
    fn parse(&self, outputs: &[String]) -> Result<Facts> {
        let text = outputs.join("\n");

        let interfaces = self
            .interfaces
            .as_ref()
            .map(|re| {
                re.captures_iter(&text)
                    .filter_map(|caps| caps.name("value").map(|m| m.as_str().to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let mut extra = IndexMap::new();
        for (key, re) in &self.extra {
            if let Some(value) = first(Some(re), &text) {
                extra.insert(key.clone(), value);
            }
        }

        Ok(Facts {
            hostname: first(self.hostname.as_ref(), &text),
            model: first(self.model.as_ref(), &text),
            serial_number: first(self.serial_number.as_ref(), &text),
            os_version: first(self.os_version.as_ref(), &text),
            running_image: first(self.running_image.as_ref(), &text),
            interfaces,
            extra,
        })
    }
}
