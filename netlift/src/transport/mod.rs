//! Transport seam between the device layer and the wire.
//!
//! A [`Transport`] owns one interactive CLI session plus the ability to
//! push a file to the device. [`SshTransport`] is the production
//! implementation; tests script their own.

mod buffer;
pub mod config;
mod interactive;
pub(crate) mod scp;
mod ssh;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

pub use config::{AuthMethod, HostKeyVerification, SshConfig};
pub use interactive::InteractiveEvent;
pub use ssh::SshTransport;

use crate::error::Result;

/// A CLI session to one device.
#[async_trait]
pub trait Transport: Send {
    /// Host this transport connects to.
    fn host(&self) -> &str;

    /// Establish the session, giving up after `timeout`.
    async fn connect(&mut self, timeout: Duration) -> Result<()>;

    /// Tear the session down. Safe to call when already disconnected.
    async fn disconnect(&mut self) -> Result<()>;

    /// Whether the session is believed to be up.
    fn is_connected(&self) -> bool;

    /// Send a command and return its output without echo or prompt.
    ///
    /// `timeout` overrides the configured command timeout.
    async fn execute(&mut self, command: &str, timeout: Option<Duration>) -> Result<String>;

    /// Send several commands in order, stopping at the first error.
    async fn execute_many(&mut self, commands: &[&str]) -> Result<Vec<String>> {
        let mut outputs = Vec::with_capacity(commands.len());
        for command in commands {
            outputs.push(self.execute(command, None).await?);
        }
        Ok(outputs)
    }

    /// Run a sequence of prompted inputs and return the collected output.
    async fn execute_interactive(&mut self, events: &[InteractiveEvent]) -> Result<String>;

    /// Push a local file to `remote_path` on `file_system`.
    ///
    /// Returns the number of bytes sent.
    async fn transfer(&mut self, local: &Path, remote_path: &str, file_system: &str)
    -> Result<u64>;
}
