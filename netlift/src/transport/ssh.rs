//! SSH transport implementation using russh.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace, warn};
use regex::bytes::Regex;
use russh::client::{self, Handle, Msg};
use russh::keys::{PrivateKeyWithHashAlg, PublicKey, load_secret_key};
use russh::{Channel, ChannelMsg};
use secrecy::ExposeSecret;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::Instant;

use super::buffer::{ShellBuffer, normalize_output};
use super::config::{AuthMethod, HostKeyVerification, SshConfig};
use super::interactive::InteractiveEvent;
use super::scp::{self, ReplyReader};
use super::Transport;
use crate::device::join_location;
use crate::error::{DeviceError, Result, TransportError};

const SCP_CHUNK: usize = 32 * 1024;

/// SSH transport wrapping a russh client and one PTY shell channel.
pub struct SshTransport {
    config: SshConfig,

    /// Pattern matching the device's CLI prompt.
    prompt: Regex,

    session: Option<Handle<SshHandler>>,
    shell: Option<Channel<Msg>>,
    buffer: ShellBuffer,
}

impl SshTransport {
    /// Create a disconnected transport.
    pub fn new(config: SshConfig, prompt: Regex) -> Self {
        Self {
            config,
            prompt,
            session: None,
            shell: None,
            buffer: ShellBuffer::default(),
        }
    }

    /// Configuration this transport was created with.
    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    async fn establish(&mut self) -> Result<()> {
        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(self.config.keepalive_interval),
            ..Default::default()
        });

        let host_key_error: Arc<Mutex<Option<TransportError>>> = Arc::new(Mutex::new(None));

        let handler = SshHandler {
            host: self.config.host.clone(),
            port: self.config.port,
            host_key_verification: self.config.host_key_verification.clone(),
            known_hosts_path: self.config.known_hosts_path.clone(),
            host_key_error: host_key_error.clone(),
        };

        let stream = TcpStream::connect((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|source| TransportError::ConnectionFailed {
                host: self.config.host.clone(),
                port: self.config.port,
                source,
            })?;
        let _ = stream.set_nodelay(true);

        let mut session = client::connect_stream(ssh_config, stream, handler)
            .await
            .map_err(|e| {
                // a refused host key surfaces from russh as a generic error
                let stored = host_key_error.lock().ok().and_then(|mut slot| slot.take());
                stored.unwrap_or(TransportError::Ssh(e))
            })?;

        Self::authenticate(&mut session, &self.config).await?;

        let channel = session
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;
        channel
            .request_pty(
                true,
                "xterm",
                self.config.terminal_width,
                self.config.terminal_height,
                0,
                0,
                &[],
            )
            .await
            .map_err(TransportError::Ssh)?;
        channel
            .request_shell(true)
            .await
            .map_err(TransportError::Ssh)?;

        self.buffer.reset();
        self.session = Some(session);
        self.shell = Some(channel);
        Ok(())
    }

    /// Authenticate with the server.
    async fn authenticate(session: &mut Handle<SshHandler>, config: &SshConfig) -> Result<()> {
        let success = match &config.auth {
            AuthMethod::None => session
                .authenticate_none(&config.username)
                .await
                .map_err(TransportError::Ssh)?
                .success(),
            AuthMethod::Password(password) => session
                .authenticate_password(&config.username, password.expose_secret())
                .await
                .map_err(TransportError::Ssh)?
                .success(),
            AuthMethod::PrivateKey { path, passphrase } => {
                let key = load_secret_key(path, passphrase.as_ref().map(|p| p.expose_secret()))
                    .map_err(|e| TransportError::Key(e.to_string()))?;

                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(TransportError::Ssh)?
                    .flatten();

                session
                    .authenticate_publickey(
                        &config.username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
                    .map_err(TransportError::Ssh)?
                    .success()
            }
        };

        if !success {
            return Err(TransportError::AuthenticationFailed {
                user: config.username.clone(),
            }
            .into());
        }

        Ok(())
    }

    fn drop_session(&mut self) {
        self.shell = None;
        self.session = None;
        self.buffer.reset();
    }

    async fn write_line(&mut self, input: &str) -> Result<()> {
        let channel = self.shell.as_ref().ok_or(DeviceError::NotConnected)?;
        let line = format!("{}\n", input);
        if let Err(e) = channel.data(line.as_bytes()).await {
            self.drop_session();
            return Err(TransportError::Ssh(e).into());
        }
        Ok(())
    }

    /// Read until `pattern` appears in the tail of the buffer.
    async fn read_until(&mut self, pattern: &Regex, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.buffer.find_in_tail(pattern).is_some() {
                return Ok(self.buffer.drain());
            }

            let channel = self.shell.as_mut().ok_or(DeviceError::NotConnected)?;
            let msg = tokio::time::timeout_at(deadline, channel.wait())
                .await
                .map_err(|_| TransportError::Timeout(timeout))?;

            match msg {
                Some(ChannelMsg::Data { ref data }) => {
                    trace!("{}: read {} bytes", self.config.host, data.len());
                    self.buffer.push(data);
                }
                Some(ChannelMsg::ExtendedData { ref data, .. }) => self.buffer.push(data),
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    debug!("{}: shell channel closed by peer", self.config.host);
                    self.drop_session();
                    return Err(TransportError::Disconnected.into());
                }
                Some(_) => {}
            }
        }
    }

    async fn push(&mut self, local: &Path, location: &str) -> Result<u64> {
        let local_err = |source| DeviceError::LocalFile {
            path: local.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::open(local).await.map_err(local_err)?;
        let size = file.metadata().await.map_err(local_err)?.len();
        let file_name = location
            .rsplit(['/', ':'])
            .next()
            .filter(|n| !n.is_empty())
            .unwrap_or(location);

        let session = self.session.as_ref().ok_or(DeviceError::NotConnected)?;
        let mut channel = session
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;
        channel
            .exec(true, scp::sink_command(location))
            .await
            .map_err(TransportError::Ssh)?;

        let timeout = self.config.command_timeout;
        let mut reader = ReplyReader::new();

        await_reply(&mut channel, &mut reader, location, timeout).await?;
        channel
            .data(scp::file_header(size, file_name).as_bytes())
            .await
            .map_err(TransportError::Ssh)?;
        await_reply(&mut channel, &mut reader, location, timeout).await?;

        let mut buf = vec![0u8; SCP_CHUNK];
        let mut sent = 0u64;
        loop {
            let n = file.read(&mut buf).await.map_err(local_err)?;
            if n == 0 {
                break;
            }
            channel
                .data(&buf[..n])
                .await
                .map_err(TransportError::Ssh)?;
            sent += n as u64;
        }

        channel.data(&[0u8][..]).await.map_err(TransportError::Ssh)?;
        await_reply(&mut channel, &mut reader, location, timeout).await?;

        let _ = channel.eof().await;
        let _ = channel.close().await;
        Ok(sent)
    }
}

/// Wait for the next SCP status reply on `channel`.
async fn await_reply(
    channel: &mut Channel<Msg>,
    reader: &mut ReplyReader,
    location: &str,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(reply) = reader.next_reply() {
            return Ok(reply.into_result(location)?);
        }

        let msg = tokio::time::timeout_at(deadline, channel.wait())
            .await
            .map_err(|_| TransportError::Timeout(timeout))?;
        match msg {
            Some(ChannelMsg::Data { ref data }) => reader.extend(data),
            Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                // stderr carries the sink's complaint; treat it as fatal
                let message = String::from_utf8_lossy(data).trim().to_string();
                if !message.is_empty() {
                    return Err(scp::classify(location, message).into());
                }
            }
            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                return Err(TransportError::Disconnected.into());
            }
            Some(_) => {}
        }
    }
}

#[async_trait]
impl Transport for SshTransport {
    fn host(&self) -> &str {
        &self.config.host
    }

    async fn connect(&mut self, timeout: Duration) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        debug!("{}: connecting on port {}", self.config.host, self.config.port);

        let started = Instant::now();
        tokio::time::timeout(timeout, self.establish())
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;

        let remaining = timeout.saturating_sub(started.elapsed());
        let prompt = self.prompt.clone();
        if let Err(e) = self.read_until(&prompt, remaining).await {
            self.drop_session();
            return Err(e);
        }
        debug!("{}: session ready", self.config.host);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(channel) = self.shell.take() {
            let _ = channel.close().await;
        }
        let result = match self.session.take() {
            Some(session) => session
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await
                .map_err(TransportError::Ssh),
            None => Ok(()),
        };
        self.buffer.reset();

        match result {
            Ok(()) => Ok(()),
            // Already gone is as good as closed
            Err(e) => {
                debug!("{}: disconnect: {}", self.config.host, e);
                Ok(())
            }
        }
    }

    fn is_connected(&self) -> bool {
        match (&self.session, &self.shell) {
            (Some(session), Some(_)) => !session.is_closed(),
            _ => false,
        }
    }

    async fn execute(&mut self, command: &str, timeout: Option<Duration>) -> Result<String> {
        let timeout = timeout.unwrap_or(self.config.command_timeout);
        debug!("{}: sending '{}'", self.config.host, command);
        self.buffer.reset();
        self.write_line(command).await?;
        let prompt = self.prompt.clone();
        let raw = self.read_until(&prompt, timeout).await?;
        Ok(normalize_output(&raw, command))
    }

    async fn execute_interactive(&mut self, events: &[InteractiveEvent]) -> Result<String> {
        let mut output = String::new();
        self.buffer.reset();
        for event in events {
            debug!("{}: interactive '{}'", self.config.host, event.input);
            self.write_line(&event.input).await?;
            let timeout = event.timeout.unwrap_or(self.config.command_timeout);
            let raw = self.read_until(&event.pattern, timeout).await?;
            output.push_str(&String::from_utf8_lossy(&raw));
        }
        Ok(output)
    }

    async fn transfer(
        &mut self,
        local: &Path,
        remote_path: &str,
        file_system: &str,
    ) -> Result<u64> {
        let location = join_location(file_system, remote_path);
        let location = location.as_str();
        debug!("{}: pushing {} to {}", self.config.host, local.display(), location);
        let sent = self.push(local, location).await?;
        debug!("{}: pushed {} bytes to {}", self.config.host, sent, location);
        Ok(sent)
    }
}

/// russh callbacks; only the host key check does anything.
struct SshHandler {
    host: String,
    port: u16,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    /// Set when the key is refused so `establish` can report why.
    host_key_error: Arc<Mutex<Option<TransportError>>>,
}

impl SshHandler {
    /// `Ok(false)` means the host has no entry yet.
    fn known(&self, key: &PublicKey) -> std::result::Result<bool, TransportError> {
        let checked = match &self.known_hosts_path {
            Some(path) => russh::keys::check_known_hosts_path(&self.host, self.port, key, path),
            None => russh::keys::check_known_hosts(&self.host, self.port, key),
        };
        checked.map_err(|e| match e {
            russh::keys::Error::KeyChanged { line } => TransportError::HostKeyChanged {
                host: self.host.clone(),
                port: self.port,
                line,
            },
            other => TransportError::KnownHosts(other.to_string()),
        })
    }

    fn remember(&self, key: &PublicKey) {
        use russh::keys::known_hosts::{learn_known_hosts, learn_known_hosts_path};

        let learned = match &self.known_hosts_path {
            Some(path) => learn_known_hosts_path(&self.host, self.port, key, path),
            None => learn_known_hosts(&self.host, self.port, key),
        };
        if let Err(e) = learned {
            warn!("{}: host key not saved: {}", self.host, e);
        }
    }

    fn accept(&self, key: &PublicKey) -> std::result::Result<(), TransportError> {
        let strict = match self.host_key_verification {
            HostKeyVerification::Disabled => return Ok(()),
            HostKeyVerification::Strict => true,
            HostKeyVerification::AcceptNew => false,
        };
        match self.known(key)? {
            true => Ok(()),
            false if strict => Err(TransportError::HostKeyUnknown {
                host: self.host.clone(),
                port: self.port,
            }),
            false => {
                self.remember(key);
                Ok(())
            }
        }
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match self.accept(server_public_key) {
            Ok(()) => Ok(true),
            Err(e) => {
                if let Ok(mut slot) = self.host_key_error.lock() {
                    *slot = Some(e);
                }
                Ok(false)
            }
        }
    }
}
