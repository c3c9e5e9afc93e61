//! Standard [`Device`] implementation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};

use super::{
    BootTarget, Checksum, ChecksumAlgorithm, Device, Facts, FactsParser, RedundancyRole,
    RedundancyState, RemoteFile, Session, StagedChanges,
};
use crate::error::{DeviceError, Result};
use crate::platform::{PlatformDefinition, VendorBehavior};
use crate::transport::Transport;

/// Session to one device.
///
/// Owned by whoever opened it. Config-changing operations drop the cached
/// facts until the next refresh.
pub struct DeviceHandle {
    definition: PlatformDefinition,
    transport: Box<dyn Transport>,
    facts_parser: Arc<dyn FactsParser>,

    /// Caller-supplied default file system; skips discovery.
    file_system_override: Option<String>,
    default_file_system: Option<String>,

    facts: Option<Facts>,

    /// Role seen on the last redundancy query.
    role: RedundancyRole,

    open: bool,
}

impl DeviceHandle {
    /// Bind a transport to a platform definition.
    pub fn new(definition: PlatformDefinition, transport: Box<dyn Transport>) -> Self {
        let facts_parser = definition.facts_parser.clone();
        Self {
            definition,
            transport,
            facts_parser,
            file_system_override: None,
            default_file_system: None,
            facts: None,
            role: RedundancyRole::Unknown,
            open: false,
        }
    }

    /// Use `file_system` instead of asking the device.
    pub fn with_default_file_system(mut self, file_system: impl Into<String>) -> Self {
        self.file_system_override = Some(file_system.into());
        self
    }

    /// Replace the platform's facts parser.
    pub fn with_facts_parser(mut self, parser: Arc<dyn FactsParser>) -> Self {
        self.facts_parser = parser;
        self
    }

    pub fn definition(&self) -> &PlatformDefinition {
        &self.definition
    }

    /// HA role seen on the last redundancy query.
    pub fn role(&self) -> RedundancyRole {
        self.role
    }

    fn behavior(&self) -> Arc<dyn VendorBehavior> {
        self.definition.behavior.clone()
    }

    fn session(&mut self) -> Result<Session<'_>> {
        if !self.open {
            return Err(DeviceError::NotConnected.into());
        }
        Ok(Session::new(self.transport.as_mut(), &self.definition))
    }

    /// Note a lost session so later calls fail fast with `NotConnected`.
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() && !self.transport.is_connected() {
            self.open = false;
        }
        result
    }

    async fn run_on_open(&mut self) -> Result<()> {
        let commands: Vec<&str> = self
            .definition
            .on_open_commands
            .iter()
            .map(String::as_str)
            .collect();
        let mut session = Session::new(self.transport.as_mut(), &self.definition);
        session.send_many(&commands).await?;
        Ok(())
    }
}

#[async_trait]
impl Device for DeviceHandle {
    fn host(&self) -> &str {
        self.transport.host()
    }

    fn platform(&self) -> &str {
        &self.definition.name
    }

    fn is_open(&self) -> bool {
        self.open && self.transport.is_connected()
    }

    fn cached_facts(&self) -> Option<&Facts> {
        self.facts.as_ref()
    }

    fn checksum_algorithm(&self) -> Option<ChecksumAlgorithm> {
        self.definition.checksum_algorithm
    }

    async fn open(&mut self, timeout: Duration) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        let host = self.transport.host().to_string();

        if let Err(e) = self.transport.connect(timeout).await {
            debug!("{}: connect failed: {}", host, e);
            return Err(DeviceError::ConnectFailed {
                host,
                source: Box::new(e),
            }
            .into());
        }

        if let Err(e) = self.run_on_open().await {
            let _ = self.transport.disconnect().await;
            return Err(e);
        }

        self.open = true;
        info!("{}: session open ({})", host, self.definition.name);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let was_open = self.open;
        self.open = false;
        self.transport.disconnect().await?;
        if was_open {
            debug!("{}: session closed", self.transport.host());
        }
        Ok(())
    }

    async fn run(&mut self, commands: &[&str]) -> Result<Vec<String>> {
        let result = self.session()?.send_many(commands).await;
        self.track(result)
    }

    async fn apply(&mut self, commands: &[&str]) -> Result<()> {
        self.facts = None;
        let result = self.session()?.send_config(commands).await;
        self.track(result)
    }

    async fn refresh_facts(&mut self) -> Result<Facts> {
        let commands: Vec<String> = self.definition.facts_commands.clone();
        let commands: Vec<&str> = commands.iter().map(String::as_str).collect();
        let outputs = {
            let result = self.session()?.send_many(&commands).await;
            self.track(result)?
        };

        let facts = self.facts_parser.parse(&outputs)?;
        debug!(
            "{}: facts refreshed (version {:?}, image {:?})",
            self.transport.host(),
            facts.os_version,
            facts.running_image
        );
        self.facts = Some(facts.clone());
        Ok(facts)
    }

    async fn default_file_system(&mut self) -> Result<String> {
        if let Some(fs) = self.file_system_override.as_ref().or(self.default_file_system.as_ref()) {
            return Ok(fs.clone());
        }
        let behavior = self.behavior();
        let result = behavior.default_file_system(&mut self.session()?).await;
        let fs = self.track(result)?;
        debug!("{}: default file system is {}", self.transport.host(), fs);
        self.default_file_system = Some(fs.clone());
        Ok(fs)
    }

    async fn file_exists(&mut self, file: &RemoteFile) -> Result<bool> {
        let behavior = self.behavior();
        let result = behavior.file_exists(&mut self.session()?, file).await;
        self.track(result)
    }

    async fn transfer(&mut self, local: &Path, destination: &RemoteFile) -> Result<u64> {
        if !self.open {
            return Err(DeviceError::NotConnected.into());
        }
        let result = self
            .transport
            .transfer(local, &destination.path, &destination.file_system)
            .await;
        self.track(result)
    }

    async fn checksum(&mut self, file: &RemoteFile) -> Result<Checksum> {
        let behavior = self.behavior();
        let result = behavior.checksum(&mut self.session()?, file).await;
        self.track(result)
    }

    async fn free_space(&mut self, file_system: &str) -> Result<u64> {
        let behavior = self.behavior();
        let result = behavior.free_space(&mut self.session()?, file_system).await;
        self.track(result)
    }

    async fn boot_target(&mut self) -> Result<BootTarget> {
        let behavior = self.behavior();
        let result = behavior.boot_target(&mut self.session()?).await;
        self.track(result)
    }

    async fn set_boot_target(&mut self, target: &BootTarget) -> Result<()> {
        self.facts = None;
        let behavior = self.behavior();
        let result = behavior.set_boot_target(&mut self.session()?, target).await;
        self.track(result)
    }

    async fn install(&mut self, target: &BootTarget) -> Result<()> {
        self.facts = None;
        let behavior = self.behavior();
        let result = behavior.install(&mut self.session()?, target).await;
        self.track(result)
    }

    async fn trigger_reboot(&mut self) -> Result<()> {
        self.facts = None;
        let behavior = self.behavior();
        let result = behavior.trigger_reboot(&mut self.session()?).await;
        self.track(result)
    }

    async fn redundancy_state(&mut self) -> Result<RedundancyState> {
        let behavior = self.behavior();
        let result = behavior.redundancy_state(&mut self.session()?).await;
        let state = self.track(result)?;
        self.role = state.role;
        Ok(state)
    }

    async fn pre_stage(&mut self, target: &BootTarget) -> Result<StagedChanges> {
        let behavior = self.behavior();
        let result = behavior.pre_stage(&mut self.session()?, target).await;
        self.track(result)
    }

    async fn post_stage(&mut self, staged: &StagedChanges) -> Result<()> {
        let behavior = self.behavior();
        let result = behavior.post_stage(&mut self.session()?, staged).await;
        self.track(result)
    }

    fn image_matches(&self, facts: &Facts, target: &BootTarget) -> bool {
        self.definition.behavior.image_matches(facts, target)
    }

    fn boot_target_matches(&self, current: &BootTarget, requested: &BootTarget) -> bool {
        self.definition.behavior.boot_target_matches(current, requested)
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if self.open {
            warn!("{}: DeviceHandle dropped without close()", self.transport.host());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::platform::Platform;
    use crate::test_support::MockTransport;

    fn handle(transport: MockTransport) -> DeviceHandle {
        DeviceHandle::new(
            Platform::CiscoIos.definition().unwrap(),
            Box::new(transport),
        )
    }

    #[tokio::test]
    async fn test_open_runs_on_open_commands() {
        let transport = MockTransport::new("sw1");
        let log = transport.log();
        let mut device = handle(transport);

        device.open(Duration::from_secs(5)).await.unwrap();
        assert!(device.is_open());
        assert_eq!(
            log.sent(),
            vec!["terminal length 0".to_string(), "terminal width 511".to_string()]
        );

        device.close().await.unwrap();
        device.close().await.unwrap();
        assert!(!device.is_open());
    }

    #[tokio::test]
    async fn test_open_failure_is_connect_failed() {
        let mut device = handle(MockTransport::new("sw1").unreachable());
        let err = device.open(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::Device(DeviceError::ConnectFailed { .. })));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_operations_require_open() {
        let mut device = handle(MockTransport::new("sw1"));
        let err = device.run(&["show version"]).await.unwrap_err();
        assert!(matches!(err, Error::Device(DeviceError::NotConnected)));
    }

    #[tokio::test]
    async fn test_apply_rejected_carries_command_and_reason() {
        let transport = MockTransport::new("sw1").reply(
            "boot system flash:missing.bin",
            "boot system flash:missing.bin\n% Invalid input detected at '^' marker.",
        );
        let log = transport.log();
        let mut device = handle(transport);
        device.open(Duration::from_secs(5)).await.unwrap();

        let err = device
            .apply(&["boot system flash:missing.bin", "hostname never-sent"])
            .await
            .unwrap_err();
        match err {
            Error::Device(DeviceError::ConfigRejected { command, reason }) => {
                assert_eq!(command, "boot system flash:missing.bin");
                assert!(reason.contains("% Invalid input"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!log.sent().contains(&"hostname never-sent".to_string()));
        assert_eq!(log.sent().last().map(String::as_str), Some("end"));
        device.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_facts_and_invalidate_on_apply() {
        let transport = MockTransport::new("sw1").reply(
            "show version",
            "sw1 uptime is 1 week\nSystem image file is \"flash:c2960-lanbasek9-mz.150-2.SE11.bin\"",
        );
        let mut device = handle(transport);
        device.open(Duration::from_secs(5)).await.unwrap();

        let facts = device.refresh_facts().await.unwrap();
        assert_eq!(facts.hostname.as_deref(), Some("sw1"));
        assert!(device.cached_facts().is_some());

        device.apply(&["ntp server 10.0.0.1"]).await.unwrap();
        assert!(device.cached_facts().is_none());
        device.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_default_file_system_override_skips_discovery() {
        let transport = MockTransport::new("sw1");
        let log = transport.log();
        let mut device = handle(transport).with_default_file_system("bootflash:");
        device.open(Duration::from_secs(5)).await.unwrap();

        assert_eq!(device.default_file_system().await.unwrap(), "bootflash:");
        assert!(!log.sent().iter().any(|c| c == "dir"));
        device.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_lost_session_marks_closed() {
        let transport = MockTransport::new("sw1").drop_on("show redundancy states");
        let mut device = handle(transport);
        device.open(Duration::from_secs(5)).await.unwrap();

        let err = device.redundancy_state().await.unwrap_err();
        assert!(err.is_transient());
        assert!(!device.is_open());
        let err = device.run(&["show clock"]).await.unwrap_err();
        assert!(matches!(err, Error::Device(DeviceError::NotConnected)));
    }
}
