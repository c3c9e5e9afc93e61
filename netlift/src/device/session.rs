//! Command session handed to vendor behaviors.
//!
//! A [`Session`] borrows the transport and platform definition of an open
//! [`DeviceHandle`](super::DeviceHandle) for the length of one operation and
//! applies the platform's failure patterns to everything sent through it.

use log::{debug, warn};

use crate::error::{DeviceError, Error, Result};
use crate::platform::PlatformDefinition;
use crate::transport::{InteractiveEvent, Transport};

/// Borrowed view of an open device session.
pub struct Session<'a> {
    transport: &'a mut dyn Transport,
    definition: &'a PlatformDefinition,
}

impl<'a> Session<'a> {
    pub fn new(transport: &'a mut dyn Transport, definition: &'a PlatformDefinition) -> Self {
        Self {
            transport,
            definition,
        }
    }

    pub fn host(&self) -> &str {
        self.transport.host()
    }

    pub fn platform(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &PlatformDefinition {
        self.definition
    }

    /// Capability signal for `operation` on this platform.
    pub fn unsupported(&self, operation: &'static str) -> Error {
        DeviceError::unsupported(&self.definition.name, operation).into()
    }

    fn check(&self, command: &str, output: String) -> Result<String> {
        match self.definition.detect_failure(&output) {
            Some(pattern) => {
                let message = output
                    .lines()
                    .find(|line| line.contains(pattern))
                    .unwrap_or(pattern)
                    .trim()
                    .to_string();
                Err(DeviceError::CommandFailed {
                    command: command.to_string(),
                    message,
                }
                .into())
            }
            None => Ok(output),
        }
    }

    /// Send an operational command and check its output for failures.
    pub async fn send(&mut self, command: &str) -> Result<String> {
        let output = self.transport.execute(command, None).await?;
        self.check(command, output)
    }

    /// Like [`send`](Self::send) with the platform's slow-operation timeout.
    pub async fn send_slow(&mut self, command: &str) -> Result<String> {
        let timeout = self.definition.file_operation_timeout;
        let output = self.transport.execute(command, Some(timeout)).await?;
        self.check(command, output)
    }

    /// Send several operational commands in order.
    pub async fn send_many(&mut self, commands: &[&str]) -> Result<Vec<String>> {
        let outputs = self.transport.execute_many(commands).await?;
        commands
            .iter()
            .zip(outputs)
            .map(|(command, output)| self.check(command, output))
            .collect()
    }

    /// Apply configuration statements.
    ///
    /// Enters and leaves configuration mode when the platform has one. The
    /// first rejected statement aborts the rest.
    pub async fn send_config(&mut self, commands: &[&str]) -> Result<()> {
        let definition = self.definition;
        if let Some(enter) = definition.config_enter.as_deref() {
            self.send(enter).await?;
        }

        for command in commands {
            let output = self.transport.execute(command, None).await?;
            if let Some(pattern) = definition.detect_failure(&output) {
                let reason = output
                    .lines()
                    .find(|line| line.contains(pattern))
                    .unwrap_or(pattern)
                    .trim()
                    .to_string();
                warn!("{}: '{}' rejected: {}", self.host(), command, reason);
                self.leave_config().await;
                return Err(DeviceError::ConfigRejected {
                    command: command.to_string(),
                    reason,
                }
                .into());
            }
        }

        if let Some(exit) = definition.config_exit.as_deref() {
            let output = self.transport.execute(exit, None).await?;
            if let Some(pattern) = definition.detect_failure(&output) {
                return Err(DeviceError::ConfigRejected {
                    command: exit.to_string(),
                    reason: pattern.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    async fn leave_config(&mut self) {
        let definition = self.definition;
        if let Some(exit) = definition.config_exit.as_deref() {
            if let Err(e) = self.transport.execute(exit, None).await {
                debug!("{}: leaving config mode: {}", self.host(), e);
            }
        }
    }

    /// Run a prompted sequence and check the collected output for failures.
    pub async fn send_interactive(&mut self, events: &[InteractiveEvent]) -> Result<String> {
        let output = self.transport.execute_interactive(events).await?;
        let command = events.first().map(|e| e.input.as_str()).unwrap_or_default();
        self.check(command, output)
    }

    /// Send something that may take the session down with it.
    ///
    /// Returns the output when the event's pattern came back, or `None`
    /// when the session dropped or went quiet. Output carrying a failure
    /// pattern is an error.
    pub async fn send_and_drop(&mut self, event: InteractiveEvent) -> Result<Option<String>> {
        let input = event.input.clone();
        match self.transport.execute_interactive(&[event]).await {
            Ok(output) => self.check(&input, output).map(Some),
            Err(e) if e.is_transient() => {
                debug!("{}: session dropped after '{}': {}", self.host(), input, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
