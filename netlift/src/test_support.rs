//! Scripted transports and devices for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::device::{
    BootTarget, Checksum, ChecksumAlgorithm, Device, Facts, RedundancyState, RemoteFile,
    StagedChanges, join_location,
};
use crate::error::{DeviceError, Error, Result, TransportError};
use crate::platform::base_name;
use crate::transport::{InteractiveEvent, Transport};

#[derive(Default)]
struct LogInner {
    sent: Vec<String>,
    interactive: Vec<String>,
    transfers: Vec<String>,
}

/// Shared record of what a mock was asked to do.
#[derive(Clone, Default)]
pub struct MockLog(Arc<Mutex<LogInner>>);

impl MockLog {
    /// Commands sent through `execute`.
    pub fn sent(&self) -> Vec<String> {
        self.0.lock().unwrap().sent.clone()
    }

    /// Inputs sent through `execute_interactive`.
    pub fn interactive(&self) -> Vec<String> {
        self.0.lock().unwrap().interactive.clone()
    }

    /// Locations files were pushed to.
    pub fn transfers(&self) -> Vec<String> {
        self.0.lock().unwrap().transfers.clone()
    }
}

/// Transport answering from a script.
///
/// Replies registered more than once for a command are returned in order;
/// the last one repeats. Unknown commands answer with empty output.
pub struct MockTransport {
    host: String,
    replies: HashMap<String, VecDeque<String>>,
    drop_on: HashSet<String>,
    unreachable: bool,
    connected: bool,
    log: MockLog,
}

impl MockTransport {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            replies: HashMap::new(),
            drop_on: HashSet::new(),
            unreachable: false,
            connected: false,
            log: MockLog::default(),
        }
    }

    pub fn reply(mut self, command: &str, output: &str) -> Self {
        self.replies
            .entry(command.to_string())
            .or_default()
            .push_back(output.to_string());
        self
    }

    /// Refuse every connection attempt.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Lose the session when `command` is sent.
    pub fn drop_on(mut self, command: &str) -> Self {
        self.drop_on.insert(command.to_string());
        self
    }

    pub fn log(&self) -> MockLog {
        self.log.clone()
    }

    fn answer(&mut self, command: &str) -> Result<String> {
        if !self.connected {
            return Err(TransportError::Disconnected.into());
        }
        if self.drop_on.contains(command) {
            self.connected = false;
            return Err(TransportError::Disconnected.into());
        }
        let output = match self.replies.get_mut(command) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => String::new(),
        };
        Ok(output)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn host(&self) -> &str {
        &self.host
    }

    async fn connect(&mut self, _timeout: Duration) -> Result<()> {
        if self.unreachable {
            return Err(TransportError::ConnectionFailed {
                host: self.host.clone(),
                port: 22,
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            }
            .into());
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn execute(&mut self, command: &str, _timeout: Option<Duration>) -> Result<String> {
        self.log.0.lock().unwrap().sent.push(command.to_string());
        self.answer(command)
    }

    async fn execute_interactive(&mut self, events: &[InteractiveEvent]) -> Result<String> {
        let mut output = String::new();
        for event in events {
            self.log
                .0
                .lock()
                .unwrap()
                .interactive
                .push(event.input.clone());
            let reply = self.answer(&event.input)?;
            if !output.is_empty() && !reply.is_empty() {
                output.push('\n');
            }
            output.push_str(&reply);
        }
        Ok(output)
    }

    async fn transfer(&mut self, local: &Path, remote_path: &str, file_system: &str) -> Result<u64> {
        if !self.connected {
            return Err(TransportError::Disconnected.into());
        }
        let size = std::fs::metadata(local).map_err(TransportError::Io)?.len();
        self.log
            .0
            .lock()
            .unwrap()
            .transfers
            .push(join_location(file_system, remote_path));
        Ok(size)
    }
}

/// How a [`MockDevice`] handles one transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Store the local file intact.
    Ok,
    /// Store a corrupted copy.
    Corrupt,
    /// Lose the connection mid-transfer.
    Drop,
    /// Device reports no space left.
    Full,
}

/// Whether the mock comes back from a reload on the new image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootResult {
    NewImage,
    OldImage,
    Never,
    /// Back on the new image, but `show version` output cannot be parsed.
    Unparseable,
    /// Back on the new image, but the login is refused.
    Refused,
}

/// Scripted device for lifecycle tests.
///
/// Reboots take `reboot_after` of (tokio) time; during that window `open`
/// sleeps for the connect timeout and fails, the way a dead host behaves.
pub struct MockDevice {
    pub host: String,
    pub algorithm: Option<ChecksumAlgorithm>,
    pub files: HashMap<String, Vec<u8>>,
    pub pushes: VecDeque<PushOutcome>,
    pub free_space: Option<u64>,
    pub boot_target: Option<BootTarget>,
    pub boot_supported: bool,
    pub boot_readback: Option<BootTarget>,
    pub install_supported: bool,
    pub running_image: String,
    pub reboot_after: Duration,
    pub boot_result: BootResult,
    /// Successive redundancy answers; the last repeats. Empty means unsupported.
    pub redundancy: VecDeque<RedundancyState>,
    /// How long each redundancy query takes to answer.
    pub redundancy_delay: Duration,
    pub staging: Option<StagedChanges>,
    pub post_stage_fails: bool,
    pub open: bool,
    pub facts: Option<Facts>,
    pub ops: Vec<String>,
    reboot_at: Option<tokio::time::Instant>,
}

impl MockDevice {
    pub fn new(host: &str, running_image: &str) -> Self {
        Self {
            host: host.to_string(),
            algorithm: Some(ChecksumAlgorithm::Sha256),
            files: HashMap::new(),
            pushes: VecDeque::new(),
            free_space: None,
            boot_target: Some(BootTarget::new(running_image, "flash:")),
            boot_supported: true,
            boot_readback: None,
            install_supported: false,
            running_image: running_image.to_string(),
            reboot_after: Duration::from_secs(60),
            boot_result: BootResult::NewImage,
            redundancy: VecDeque::new(),
            redundancy_delay: Duration::ZERO,
            staging: None,
            post_stage_fails: false,
            open: true,
            facts: None,
            ops: Vec::new(),
            reboot_at: None,
        }
    }

    fn record(&mut self, op: impl Into<String>) {
        self.ops.push(op.into());
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(DeviceError::NotConnected.into())
        }
    }

    fn rebooting(&self) -> bool {
        self.reboot_at.is_some_and(|at| tokio::time::Instant::now() < at)
    }

    /// Number of recorded operations named `op`.
    pub fn count(&self, op: &str) -> usize {
        self.ops.iter().filter(|o| o.as_str() == op).count()
    }

    fn start_reboot(&mut self) {
        self.open = false;
        self.facts = None;
        self.reboot_at = Some(tokio::time::Instant::now() + self.reboot_after);
        match self.boot_result {
            BootResult::NewImage | BootResult::Unparseable | BootResult::Refused => {
                if let Some(target) = &self.boot_target {
                    self.running_image = target.image.clone();
                }
            }
            BootResult::OldImage => {}
            BootResult::Never => {
                self.reboot_at =
                    Some(tokio::time::Instant::now() + Duration::from_secs(86_400 * 365));
            }
        }
    }
}

#[async_trait]
impl Device for MockDevice {
    fn host(&self) -> &str {
        &self.host
    }

    fn platform(&self) -> &str {
        "mock"
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn cached_facts(&self) -> Option<&Facts> {
        self.facts.as_ref()
    }

    fn checksum_algorithm(&self) -> Option<ChecksumAlgorithm> {
        self.algorithm
    }

    async fn open(&mut self, timeout: Duration) -> Result<()> {
        self.record("open");
        if self.rebooting() {
            tokio::time::sleep(timeout).await;
            return Err(DeviceError::ConnectFailed {
                host: self.host.clone(),
                source: Box::new(TransportError::Timeout(timeout).into()),
            }
            .into());
        }
        if self.reboot_at.is_some() && self.boot_result == BootResult::Refused {
            return Err(DeviceError::ConnectFailed {
                host: self.host.clone(),
                source: Box::new(
                    TransportError::AuthenticationFailed {
                        user: "admin".to_string(),
                    }
                    .into(),
                ),
            }
            .into());
        }
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    async fn run(&mut self, commands: &[&str]) -> Result<Vec<String>> {
        self.ensure_open()?;
        Ok(commands.iter().map(|_| String::new()).collect())
    }

    async fn apply(&mut self, commands: &[&str]) -> Result<()> {
        self.ensure_open()?;
        for command in commands {
            self.record(format!("apply {}", command));
        }
        Ok(())
    }

    async fn refresh_facts(&mut self) -> Result<Facts> {
        self.ensure_open()?;
        self.record("refresh_facts");
        if self.reboot_at.is_some() && self.boot_result == BootResult::Unparseable {
            return Err(DeviceError::Parse {
                command: "show version".to_string(),
                message: "no version line".to_string(),
            }
            .into());
        }
        let facts = Facts {
            hostname: Some(self.host.clone()),
            running_image: Some(self.running_image.clone()),
            ..Facts::default()
        };
        self.facts = Some(facts.clone());
        Ok(facts)
    }

    async fn default_file_system(&mut self) -> Result<String> {
        Ok("flash:".to_string())
    }

    async fn file_exists(&mut self, file: &RemoteFile) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.files.contains_key(&file.location()))
    }

    async fn transfer(&mut self, local: &Path, destination: &RemoteFile) -> Result<u64> {
        self.ensure_open()?;
        self.record("transfer");
        let data = std::fs::read(local).map_err(|source| DeviceError::LocalFile {
            path: PathBuf::from(local),
            source,
        })?;
        match self.pushes.pop_front().unwrap_or(PushOutcome::Ok) {
            PushOutcome::Ok => {
                let len = data.len() as u64;
                self.files.insert(destination.location(), data);
                Ok(len)
            }
            PushOutcome::Corrupt => {
                let mut data = data;
                data.push(0xff);
                let len = data.len() as u64;
                self.files.insert(destination.location(), data);
                Ok(len)
            }
            PushOutcome::Drop => Err(TransportError::Disconnected.into()),
            PushOutcome::Full => Err(TransportError::InsufficientSpace {
                path: destination.location(),
                message: "No space left on device".to_string(),
            }
            .into()),
        }
    }

    async fn checksum(&mut self, file: &RemoteFile) -> Result<Checksum> {
        self.ensure_open()?;
        self.record("checksum");
        let algorithm = self
            .algorithm
            .ok_or_else(|| Error::from(DeviceError::unsupported("mock", "checksum")))?;
        match self.files.get(&file.location()) {
            Some(data) => Ok(Checksum::of_bytes(algorithm, data)),
            None => Err(DeviceError::FileNotFound {
                file: file.path.clone(),
                file_system: file.file_system.clone(),
            }
            .into()),
        }
    }

    async fn free_space(&mut self, _file_system: &str) -> Result<u64> {
        self.ensure_open()?;
        self.free_space
            .ok_or_else(|| DeviceError::unsupported("mock", "free_space").into())
    }

    async fn boot_target(&mut self) -> Result<BootTarget> {
        self.ensure_open()?;
        self.boot_target
            .clone()
            .ok_or_else(|| DeviceError::unsupported("mock", "boot_target").into())
    }

    async fn set_boot_target(&mut self, target: &BootTarget) -> Result<()> {
        self.ensure_open()?;
        if !self.boot_supported {
            return Err(DeviceError::unsupported("mock", "set_boot_target").into());
        }
        self.record("set_boot_target");
        self.boot_target = Some(self.boot_readback.clone().unwrap_or_else(|| target.clone()));
        Ok(())
    }

    async fn install(&mut self, target: &BootTarget) -> Result<()> {
        self.ensure_open()?;
        if !self.install_supported {
            return Err(DeviceError::unsupported("mock", "install").into());
        }
        self.record("install");
        self.boot_target = Some(target.clone());
        self.start_reboot();
        Ok(())
    }

    async fn trigger_reboot(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.record("trigger_reboot");
        self.start_reboot();
        Ok(())
    }

    async fn redundancy_state(&mut self) -> Result<RedundancyState> {
        self.ensure_open()?;
        self.record("redundancy_state");
        tokio::time::sleep(self.redundancy_delay).await;
        let state = if self.redundancy.len() > 1 {
            self.redundancy.pop_front()
        } else {
            self.redundancy.front().cloned()
        };
        state.ok_or_else(|| DeviceError::unsupported("mock", "redundancy_state").into())
    }

    async fn pre_stage(&mut self, _target: &BootTarget) -> Result<StagedChanges> {
        self.ensure_open()?;
        match &self.staging {
            Some(staged) => {
                let staged = staged.clone();
                self.record("pre_stage");
                Ok(staged)
            }
            None => Err(DeviceError::unsupported("mock", "pre_stage").into()),
        }
    }

    async fn post_stage(&mut self, staged: &StagedChanges) -> Result<()> {
        self.ensure_open()?;
        self.record("post_stage");
        if self.post_stage_fails && !staged.is_empty() {
            return Err(DeviceError::CommandFailed {
                command: "config wlan enable 1".to_string(),
                message: "Error: WLAN 1 is not configured".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn image_matches(&self, facts: &Facts, target: &BootTarget) -> bool {
        facts
            .running_image
            .as_deref()
            .is_some_and(|image| base_name(image) == base_name(&target.image))
    }

    fn boot_target_matches(&self, current: &BootTarget, requested: &BootTarget) -> bool {
        current == requested
    }
}

/// Write `data` to a fresh temp file.
pub fn local_image(data: &[u8]) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.bin");
    std::fs::write(&path, data).unwrap();
    (dir, path)
}
