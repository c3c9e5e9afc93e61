//! The device contract and its standard implementation.
//!
//! [`Device`] is the operation set the lifecycle layer is written against.
//! [`DeviceHandle`] implements it for every built-in platform by binding a
//! [`Transport`](crate::transport::Transport), a
//! [`PlatformDefinition`](crate::platform::PlatformDefinition) and a
//! [`FactsParser`].

mod builder;
mod facts;
mod handle;
mod session;
mod types;

pub use builder::DeviceBuilder;
pub use facts::{Facts, FactsParser, RegexFactsParser};
pub use handle::DeviceHandle;
pub use session::Session;
pub use types::{
    BootTarget, Checksum, ChecksumAlgorithm, RedundancyRole, RedundancyState, RemoteFile,
    StagedChanges, join_location,
};

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Uniform operation set every device backend supports.
///
/// Operations fail with a classified [`Error`](crate::Error) and never
/// retry on their own; retry budgets belong to the lifecycle layer.
/// Optional capabilities fail with `UnsupportedOperation`.
#[async_trait]
pub trait Device: Send {
    /// Host this device is reached at.
    fn host(&self) -> &str;

    /// Vendor tag of the backend.
    fn platform(&self) -> &str;

    /// Whether the session is open.
    fn is_open(&self) -> bool;

    /// Facts from the last refresh, if still valid.
    fn cached_facts(&self) -> Option<&Facts>;

    /// Digest algorithm the device computes, if it can hash files at all.
    fn checksum_algorithm(&self) -> Option<ChecksumAlgorithm>;

    /// Establish the session; fails with `ConnectFailed` after `timeout`.
    async fn open(&mut self, timeout: Duration) -> Result<()>;

    /// Close the session. Idempotent.
    async fn close(&mut self) -> Result<()>;

    /// Run read-only operational commands.
    async fn run(&mut self, commands: &[&str]) -> Result<Vec<String>>;

    /// Apply configuration statements; fails with `ConfigRejected`.
    async fn apply(&mut self, commands: &[&str]) -> Result<()>;

    /// Re-read facts from the device and cache them.
    async fn refresh_facts(&mut self) -> Result<Facts>;

    /// The device's default file system.
    async fn default_file_system(&mut self) -> Result<String>;

    /// Whether `file` is present.
    async fn file_exists(&mut self, file: &RemoteFile) -> Result<bool>;

    /// Push a local file to `destination`; returns bytes sent.
    async fn transfer(&mut self, local: &Path, destination: &RemoteFile) -> Result<u64>;

    /// Device-computed digest of `file`; fails with `FileNotFound`.
    async fn checksum(&mut self, file: &RemoteFile) -> Result<Checksum>;

    /// Free bytes on `file_system`.
    async fn free_space(&mut self, file_system: &str) -> Result<u64>;

    async fn boot_target(&mut self) -> Result<BootTarget>;

    async fn set_boot_target(&mut self, target: &BootTarget) -> Result<()>;

    /// Install-mode upgrade: the device switches images as it reboots.
    async fn install(&mut self, target: &BootTarget) -> Result<()>;

    /// Fire-and-forget reload.
    async fn trigger_reboot(&mut self) -> Result<()>;

    async fn redundancy_state(&mut self) -> Result<RedundancyState>;

    /// Pause dependent services before a disruptive change.
    async fn pre_stage(&mut self, target: &BootTarget) -> Result<StagedChanges>;

    /// Restore what `pre_stage` paused.
    async fn post_stage(&mut self, staged: &StagedChanges) -> Result<()>;

    /// Whether `facts` show the device running `target`.
    fn image_matches(&self, facts: &Facts, target: &BootTarget) -> bool;

    /// Whether a boot target read back from the device equals the requested one.
    fn boot_target_matches(&self, current: &BootTarget, requested: &BootTarget) -> bool;
}
