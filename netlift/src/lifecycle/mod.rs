//! Upgrade lifecycle built on the [`Device`](crate::Device) contract.
//!
//! - [`verify_transfer`] pushes an image and proves it with a device-side
//!   checksum.
//! - [`reboot_and_wait`] / [`reboot_into`] reload a device and follow it
//!   back, validating the running image.
//! - [`ensure_active`] and [`await_peer_consistency`] keep disruptive work
//!   on the active HA unit and check the pair afterwards.
//! - [`Upgrader`] strings them together into a single run that always
//!   resolves to an [`UpgradeOutcome`].
//!
//! Retry budgets live here, not in the device layer.

mod outcome;
mod policy;
mod reboot;
mod redundancy;
mod transfer;
mod upgrade;

pub use outcome::{OutcomeKind, UpgradeOutcome, UpgradePhase};
pub use policy::{PeerPolicy, RebootPolicy, TransferPolicy, UpgradePolicy};
pub use reboot::{RebootPhase, RebootReport, RebootTrigger, reboot_and_wait, reboot_into};
pub use redundancy::{
    PairLease, PairLocks, PeerConsistency, await_peer_consistency, ensure_active,
};
pub use transfer::{TransferRequest, TransferResult, TransferStatus, verify_transfer};
pub use upgrade::{Upgrader, upgrade};
