//! Builder for creating device handles.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use super::{DeviceHandle, FactsParser};
use crate::error::{DeviceError, Result};
use crate::platform::{Platform, PlatformDefinition};
use crate::transport::config::{AuthMethod, HostKeyVerification, SshConfig};
use crate::transport::{SshTransport, Transport};

/// Builder for constructing device handles.
///
/// Connection parameters come from the caller's own configuration layer;
/// netlift never reads configuration files.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use netlift::{Device, DeviceBuilder, Platform};
///
/// # async fn example() -> Result<(), netlift::Error> {
/// let mut device = DeviceBuilder::new("192.0.2.10")
///     .username("admin")
///     .password("secret")
///     .platform(Platform::CiscoIos)
///     .build()?;
///
/// device.open(Duration::from_secs(30)).await?;
/// let facts = device.refresh_facts().await?;
/// println!("{:?}", facts.os_version);
/// device.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct DeviceBuilder {
    host: String,
    port: u16,
    username: Option<String>,
    auth: AuthMethod,
    platform: Option<Platform>,
    custom_platform: Option<PlatformDefinition>,
    command_timeout: Duration,
    file_operation_timeout: Option<Duration>,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    default_file_system: Option<String>,
    facts_parser: Option<Arc<dyn FactsParser>>,
}

impl DeviceBuilder {
    /// Create a new builder for the specified host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: None,
            auth: AuthMethod::None,
            platform: None,
            custom_platform: None,
            command_timeout: Duration::from_secs(30),
            file_operation_timeout: None,
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
            default_file_system: None,
            facts_parser: None,
        }
    }

    /// Set the SSH port (default: 22).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the username for authentication.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set password authentication.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.auth = AuthMethod::Password(SecretString::from(password.into()));
        self
    }

    /// Set private key authentication.
    pub fn private_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.auth = AuthMethod::PrivateKey {
            path: key_path.into(),
            passphrase: None,
        };
        self
    }

    /// Set private key authentication with passphrase.
    pub fn private_key_with_passphrase(
        mut self,
        key_path: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Self {
        self.auth = AuthMethod::PrivateKey {
            path: key_path.into(),
            passphrase: Some(SecretString::from(passphrase.into())),
        };
        self
    }

    /// Select a built-in platform.
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Use a custom platform definition instead of a built-in one.
    pub fn custom_platform(mut self, platform: PlatformDefinition) -> Self {
        self.custom_platform = Some(platform);
        self
    }

    /// Timeout for ordinary commands (default: 30s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Timeout for hashing and install commands.
    pub fn file_operation_timeout(mut self, timeout: Duration) -> Self {
        self.file_operation_timeout = Some(timeout);
        self
    }

    /// Host key verification mode (default: accept new, reject changed).
    pub fn host_key_verification(mut self, mode: HostKeyVerification) -> Self {
        self.host_key_verification = mode;
        self
    }

    /// Use a specific known_hosts file.
    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    /// Skip default file system discovery and use this one.
    pub fn default_file_system(mut self, file_system: impl Into<String>) -> Self {
        self.default_file_system = Some(file_system.into());
        self
    }

    /// Replace the platform's facts parser.
    pub fn facts_parser(mut self, parser: Arc<dyn FactsParser>) -> Self {
        self.facts_parser = Some(parser);
        self
    }

    fn resolve_platform(&mut self) -> Result<PlatformDefinition> {
        let mut definition = match (self.custom_platform.take(), self.platform) {
            (Some(custom), _) => custom,
            (None, Some(platform)) => platform.definition()?,
            (None, None) => {
                return Err(DeviceError::InvalidConfig {
                    message: "Platform must be specified".to_string(),
                }
                .into());
            }
        };
        if let Some(timeout) = self.file_operation_timeout {
            definition.file_operation_timeout = timeout;
        }
        Ok(definition)
    }

    /// Build a handle over SSH.
    ///
    /// This does not connect. Call `open()` on the returned handle.
    pub fn build(mut self) -> Result<DeviceHandle> {
        let username = self.username.take().ok_or_else(|| DeviceError::InvalidConfig {
            message: "Username is required".to_string(),
        })?;
        let definition = self.resolve_platform()?;

        let ssh_config = SshConfig::new(&self.host, username, self.auth.clone())
            .with_port(self.port)
            .with_command_timeout(self.command_timeout)
            .with_terminal_size(definition.terminal_width, definition.terminal_height)
            .with_host_key_verification(
                self.host_key_verification.clone(),
                self.known_hosts_path.clone(),
            );
        let transport = SshTransport::new(ssh_config, definition.prompt.clone());

        Ok(self.finish(definition, Box::new(transport)))
    }

    /// Build a handle over a caller-supplied transport.
    pub fn build_with_transport(mut self, transport: Box<dyn Transport>) -> Result<DeviceHandle> {
        let definition = self.resolve_platform()?;
        Ok(self.finish(definition, transport))
    }

    fn finish(self, definition: PlatformDefinition, transport: Box<dyn Transport>) -> DeviceHandle {
        let mut handle = DeviceHandle::new(definition, transport);
        if let Some(fs) = self.default_file_system {
            handle = handle.with_default_file_system(fs);
        }
        if let Some(parser) = self.facts_parser {
            handle = handle.with_facts_parser(parser);
        }
        handle
    }
}
