//! Connection parameters for [`SshTransport`](super::SshTransport).

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

/// What to do with the server's host key, after OpenSSH's
/// `StrictHostKeyChecking`.
///
/// A device that was reimaged may come back with a new key. `AcceptNew`
/// still refuses that; clear the known_hosts entry or use `Disabled` for
/// lab gear that is reimaged routinely.
#[derive(Debug, Clone, Default)]
pub enum HostKeyVerification {
    /// Only hosts already in known_hosts are accepted.
    Strict,

    /// Learn unknown hosts, refuse changed keys.
    #[default]
    AcceptNew,

    /// No checking at all.
    Disabled,
}

/// How to authenticate.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// `none` authentication; only useful against test servers.
    None,

    Password(SecretString),

    PrivateKey {
        path: PathBuf,
        passphrase: Option<SecretString>,
    },
}

/// Everything needed to reach one device.
///
/// Resolved by the caller; netlift never reads configuration files.
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: AuthMethod,

    /// Wait for a prompt, an interactive pattern or an SCP acknowledgement.
    pub command_timeout: Duration,

    /// SSH keepalive while idle. Long image copies and `install` runs can
    /// leave the shell silent for minutes.
    pub keepalive_interval: Duration,

    /// PTY size. Wide terminals keep long `dir` and version lines unwrapped.
    pub terminal_width: u32,
    pub terminal_height: u32,

    pub host_key_verification: HostKeyVerification,

    /// Defaults to `~/.ssh/known_hosts`.
    pub known_hosts_path: Option<PathBuf>,
}

impl SshConfig {
    pub fn new(host: impl Into<String>, username: impl Into<String>, auth: AuthMethod) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            auth,
            command_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(30),
            terminal_width: 511,
            terminal_height: 24,
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_terminal_size(mut self, width: u32, height: u32) -> Self {
        self.terminal_width = width;
        self.terminal_height = height;
        self
    }

    pub fn with_host_key_verification(
        mut self,
        mode: HostKeyVerification,
        known_hosts_path: Option<PathBuf>,
    ) -> Self {
        self.host_key_verification = mode;
        self.known_hosts_path = known_hosts_path;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SshConfig::new("10.0.0.1", "admin", AuthMethod::None)
            .with_port(2222)
            .with_terminal_size(32767, 24);
        assert_eq!(config.port, 2222);
        assert_eq!(config.terminal_width, 32767);
        assert_eq!(config.command_timeout, Duration::from_secs(30));
        assert!(matches!(
            config.host_key_verification,
            HostKeyVerification::AcceptNew
        ));
    }
}
