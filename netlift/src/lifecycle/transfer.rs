//! Transfer verifier: push an image and prove it landed intact.

use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;

use super::policy::TransferPolicy;
use crate::device::{Checksum, Device, RemoteFile};
use crate::error::{DeviceError, Result};

/// An image to place on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub source: PathBuf,
    pub destination: RemoteFile,

    /// Digest the destination must match. Computed from `source` when absent.
    pub expected: Option<Checksum>,
}

impl TransferRequest {
    pub fn new(source: impl Into<PathBuf>, destination: RemoteFile) -> Self {
        Self {
            source: source.into(),
            destination,
            expected: None,
        }
    }

    pub fn with_expected_checksum(mut self, checksum: Checksum) -> Self {
        self.expected = Some(checksum);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Succeeded,
    ExhaustedRetries,
    DestinationFull,
    ChecksumMismatch,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferStatus::Succeeded => "succeeded",
            TransferStatus::ExhaustedRetries => "exhausted_retries",
            TransferStatus::DestinationFull => "destination_full",
            TransferStatus::ChecksumMismatch => "checksum_mismatch",
        };
        write!(f, "{}", s)
    }
}

/// Terminal result of [`verify_transfer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferResult {
    pub status: TransferStatus,
    pub bytes_transferred: u64,
    pub checksum_matched: bool,

    /// Push attempts made, including the free-space precheck when it
    /// already decides the outcome.
    pub attempts: u32,

    /// The destination already held the image; nothing was pushed.
    pub already_present: bool,

    pub expected: Checksum,
    pub observed: Option<Checksum>,
    pub last_error: Option<String>,
}

impl TransferResult {
    fn new(status: TransferStatus, expected: Checksum) -> Self {
        Self {
            status,
            bytes_transferred: 0,
            checksum_matched: false,
            attempts: 0,
            already_present: false,
            expected,
            observed: None,
            last_error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TransferStatus::Succeeded
    }
}

/// Work out the digest the destination must carry, in the device's algorithm.
async fn expected_checksum<D: Device + ?Sized>(
    device: &D,
    request: &TransferRequest,
) -> Result<Checksum> {
    let algorithm = device
        .checksum_algorithm()
        .ok_or_else(|| DeviceError::unsupported(device.platform(), "checksum"))?;

    match &request.expected {
        Some(expected) if expected.algorithm == algorithm => Ok(expected.clone()),
        Some(expected) => {
            // The caller pinned a digest the device cannot compute; check the
            // local file against it, then verify remotely in the device's
            // own algorithm.
            let local = Checksum::of_file(expected.algorithm, &request.source).await?;
            if &local != expected {
                return Err(DeviceError::InvalidConfig {
                    message: format!(
                        "{} does not match expected {} (local {})",
                        request.source.display(),
                        expected,
                        local
                    ),
                }
                .into());
            }
            Checksum::of_file(algorithm, &request.source).await
        }
        None => Checksum::of_file(algorithm, &request.source).await,
    }
}

async fn local_size(path: &Path) -> Result<u64> {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .map_err(|source| {
            DeviceError::LocalFile {
                path: path.to_path_buf(),
                source,
            }
            .into()
        })
}

/// Push `request.source` to the device and verify it with a device-side
/// checksum.
///
/// Transient failures are retried up to `policy.max_attempts` with linear
/// backoff. A full destination ends the run at once. A completed push whose
/// digest does not match is retried once, then reported as
/// `ChecksumMismatch`. When the destination already matches, nothing is
/// pushed.
///
/// Returns `Err` only for failures that are not transfer outcomes: the
/// device cannot hash files, the local image is unreadable, or the device
/// rejected the push outright.
pub async fn verify_transfer<D: Device + ?Sized>(
    device: &mut D,
    request: &TransferRequest,
    policy: &TransferPolicy,
) -> Result<TransferResult> {
    let host = device.host().to_string();
    let destination = &request.destination;
    let expected = expected_checksum(device, request).await?;
    let max_attempts = policy.max_attempts.max(1);

    if !device.is_open() {
        device.open(policy.reconnect_timeout).await?;
    }

    match device.checksum(destination).await {
        Ok(remote) if remote == expected => {
            info!("{}: {} already present, skipping transfer", host, destination);
            let mut result = TransferResult::new(TransferStatus::Succeeded, expected);
            result.checksum_matched = true;
            result.already_present = true;
            result.observed = Some(remote);
            return Ok(result);
        }
        Ok(remote) => debug!("{}: {} exists with {}, replacing", host, destination, remote),
        Err(e) if e.is_file_not_found() || e.is_transient() => {
            debug!("{}: {} not verifiable yet: {}", host, destination, e)
        }
        Err(e) => return Err(e),
    }

    let size = local_size(&request.source).await?;
    if policy.check_free_space {
        match device.free_space(&destination.file_system).await {
            Ok(free) if free < size => {
                warn!(
                    "{}: {} has {} bytes free, image needs {}",
                    host, destination.file_system, free, size
                );
                let mut result = TransferResult::new(TransferStatus::DestinationFull, expected);
                result.attempts = 1;
                result.last_error = Some(format!("{} bytes free, {} needed", free, size));
                return Ok(result);
            }
            Ok(_) => {}
            Err(e) if e.is_unsupported() => {}
            Err(e) => warn!("{}: free space check skipped: {}", host, e),
        }
    }

    let mut result = TransferResult::new(TransferStatus::ExhaustedRetries, expected);
    let mut mismatches = 0;
    // a corrupt push earns one more attempt even when it used the last one
    let mut budget = max_attempts;

    while result.attempts < budget {
        result.attempts += 1;
        let attempt = result.attempts;

        if !device.is_open() {
            if let Err(e) = device.open(policy.reconnect_timeout).await {
                if !e.is_transient() {
                    return Err(e);
                }
                warn!("{}: reconnect for attempt {} failed: {}", host, attempt, e);
                result.last_error = Some(e.to_string());
                tokio::time::sleep(policy.backoff * attempt).await;
                continue;
            }
        }

        info!(
            "{}: pushing {} to {} (attempt {}/{})",
            host,
            request.source.display(),
            destination,
            attempt,
            budget
        );
        match device.transfer(&request.source, destination).await {
            Ok(bytes) => result.bytes_transferred = bytes,
            Err(e) if e.is_destination_full() => {
                warn!("{}: destination full: {}", host, e);
                result.status = TransferStatus::DestinationFull;
                result.last_error = Some(e.to_string());
                return Ok(result);
            }
            Err(e) if e.is_transient() => {
                warn!("{}: transfer attempt {} failed: {}", host, attempt, e);
                result.last_error = Some(e.to_string());
                if attempt < budget {
                    tokio::time::sleep(policy.backoff * attempt).await;
                }
                continue;
            }
            Err(e) => return Err(e),
        }

        match device.checksum(destination).await {
            Ok(remote) if remote == result.expected => {
                info!("{}: {} verified ({})", host, destination, remote);
                result.status = TransferStatus::Succeeded;
                result.checksum_matched = true;
                result.observed = Some(remote);
                result.last_error = None;
                return Ok(result);
            }
            Ok(remote) => {
                warn!(
                    "{}: {} digest {} does not match {}",
                    host, destination, remote.digest, result.expected.digest
                );
                result.observed = Some(remote);
                mismatches += 1;
            }
            Err(e) if e.is_file_not_found() => {
                warn!("{}: {} missing after push", host, destination);
                result.last_error = Some(e.to_string());
                mismatches += 1;
            }
            Err(e) if e.is_transient() => {
                warn!("{}: verification attempt {} failed: {}", host, attempt, e);
                result.last_error = Some(e.to_string());
                if attempt < budget {
                    tokio::time::sleep(policy.backoff * attempt).await;
                }
                continue;
            }
            Err(e) => return Err(e),
        }

        if mismatches >= 2 {
            result.status = TransferStatus::ChecksumMismatch;
            return Ok(result);
        }
        budget = budget.max(attempt + 1);
    }

    warn!(
        "{}: transfer of {} gave up after {} attempts",
        host, destination, result.attempts
    );
    Ok(result)
}
