//! # netlift
//!
//! Async upgrade, reboot and reconnect orchestration for network devices.
//!
//! netlift drives an image upgrade end to end over SSH: push the image and
//! prove it with a device-side checksum, set the boot target (or use the
//! platform's install mode), reload, wait for the device to come back, and
//! check that it runs what was asked for. HA pairs are guarded so only the
//! active unit is disrupted, and the peer is checked afterwards.
//!
//! ## Features
//!
//! - Async SSH sessions via russh, with SCP image push
//! - Multi-vendor support (Cisco IOS/IOS-XE, NX-OS, AireOS, Arista EOS, Juniper JUNOS)
//! - Typed outcomes for every way an upgrade can end
//! - Injected facts parsing with a regex default
//! - Easy vendor extensibility through [`PlatformDefinition`] and `VendorBehavior`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use netlift::{Device, DeviceBuilder, Platform, RebootPolicy, reboot_and_wait};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), netlift::Error> {
//!     let mut device = DeviceBuilder::new("192.168.1.1")
//!         .username("admin")
//!         .password("secret")
//!         .platform(Platform::AristaEos)
//!         .build()?;
//!
//!     device.open(Duration::from_secs(30)).await?;
//!
//!     let policy = RebootPolicy::new(Duration::from_secs(600), Duration::from_secs(15));
//!     let report = reboot_and_wait(&mut device, &policy).await?;
//!     println!("{} after {:?}", report.phase, report.elapsed);
//!
//!     device.close().await?;
//!     Ok(())
//! }
//! ```

pub mod device;
pub mod error;
pub mod lifecycle;
pub mod platform;
pub mod transport;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use device::{
    BootTarget, Checksum, ChecksumAlgorithm, Device, DeviceBuilder, DeviceHandle, Facts,
    FactsParser, RedundancyRole, RedundancyState, RegexFactsParser, RemoteFile, StagedChanges,
};
pub use error::{Error, Result};
pub use lifecycle::{
    OutcomeKind, PairLocks, PeerConsistency, PeerPolicy, RebootPhase, RebootPolicy, RebootReport,
    TransferPolicy, TransferRequest, TransferResult, TransferStatus, UpgradeOutcome, UpgradePhase,
    UpgradePolicy, Upgrader, await_peer_consistency, ensure_active, reboot_and_wait, upgrade,
    verify_transfer,
};
pub use platform::{Platform, PlatformDefinition};
pub use transport::{AuthMethod, HostKeyVerification, SshConfig};
