//! Value types exchanged across the device contract.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use tokio::io::AsyncReadExt;

use crate::error::{DeviceError, Result};

/// Join a file system and a path the way device CLIs expect.
///
/// Cisco-style file systems end in `:` (`flash:`), unix-style ones are
/// directories (`/var/tmp`).
pub fn join_location(file_system: &str, path: &str) -> String {
    if file_system.is_empty() {
        return path.to_string();
    }
    if file_system.ends_with(':') || file_system.ends_with('/') {
        format!("{}{}", file_system, path.trim_start_matches('/'))
    } else {
        format!("{}/{}", file_system, path.trim_start_matches('/'))
    }
}

/// A file on device storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteFile {
    /// File system or base directory (e.g. `flash:`, `bootflash:`, `/var/tmp`).
    pub file_system: String,

    /// Path relative to the file system.
    pub path: String,
}

impl RemoteFile {
    /// Create a new remote file reference.
    pub fn new(file_system: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            file_system: file_system.into(),
            path: path.into(),
        }
    }

    /// Full location as used on the device CLI.
    pub fn location(&self) -> String {
        join_location(&self.file_system, &self.path)
    }

    /// The final path component.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

impl fmt::Display for RemoteFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.location())
    }
}

/// The image and file system a device should load on its next boot.
///
/// Distinct from the image that is currently running.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BootTarget {
    /// Image file name.
    pub image: String,

    /// File system holding the image.
    pub file_system: String,
}

impl BootTarget {
    /// Create a new boot target.
    pub fn new(image: impl Into<String>, file_system: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            file_system: file_system.into(),
        }
    }

    /// Full location of the image on the device.
    pub fn location(&self) -> String {
        join_location(&self.file_system, &self.image)
    }

    /// The image as a remote file reference.
    pub fn as_remote_file(&self) -> RemoteFile {
        RemoteFile::new(&self.file_system, &self.image)
    }
}

impl fmt::Display for BootTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.location())
    }
}

/// Digest algorithm used for transfer verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumAlgorithm {
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    /// Length of the hex digest.
    pub fn hex_len(self) -> usize {
        match self {
            ChecksumAlgorithm::Sha256 => 64,
            ChecksumAlgorithm::Sha512 => 128,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
            ChecksumAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    fn finalize(self) -> String {
        match self {
            Hasher::Sha256(h) => hex::encode(h.finalize()),
            Hasher::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// A file digest, stored as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    pub digest: String,
}

impl Checksum {
    /// Create a checksum from a hex digest (case-insensitive).
    pub fn new(algorithm: ChecksumAlgorithm, digest: impl AsRef<str>) -> Self {
        Self {
            algorithm,
            digest: digest.as_ref().trim().to_ascii_lowercase(),
        }
    }

    /// Digest an in-memory buffer.
    pub fn of_bytes(algorithm: ChecksumAlgorithm, data: &[u8]) -> Self {
        let mut hasher = Hasher::new(algorithm);
        hasher.update(data);
        Self {
            algorithm,
            digest: hasher.finalize(),
        }
    }

    /// Digest a local file without loading it into memory.
    pub async fn of_file(algorithm: ChecksumAlgorithm, path: &Path) -> Result<Self> {
        let local_err = |source| DeviceError::LocalFile {
            path: path.to_path_buf(),
            source,
        };

        let mut file = tokio::fs::File::open(path).await.map_err(local_err)?;
        let mut hasher = Hasher::new(algorithm);
        let mut buf = vec![0u8; 1 << 20];
        loop {
            let n = file.read(&mut buf).await.map_err(local_err)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        Ok(Self {
            algorithm,
            digest: hasher.finalize(),
        })
    }

    /// Find a digest of the right length in free-form device output.
    pub fn find_in(algorithm: ChecksumAlgorithm, output: &str) -> Option<Self> {
        let len = algorithm.hex_len();
        output
            .split(|c: char| !c.is_ascii_hexdigit())
            .find(|token| token.len() == len)
            .map(|token| Self::new(algorithm, token))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.digest)
    }
}

/// High-availability role of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedundancyRole {
    Active,
    Standby,
    /// Not part of an HA pair.
    None,
    /// Not yet determined, or reported in a form we do not recognise.
    Unknown,
}

impl fmt::Display for RedundancyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RedundancyRole::Active => "active",
            RedundancyRole::Standby => "standby",
            RedundancyRole::None => "none",
            RedundancyRole::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Redundancy state of a unit and its peer.
///
/// Always recomputed from the device; never carried across a reboot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedundancyState {
    /// Role of the unit this handle is connected to.
    pub role: RedundancyRole,

    /// Role the peer reports, if any.
    pub peer_role: Option<RedundancyRole>,

    /// Whether the peer answers at all.
    pub peer_reachable: bool,

    /// Whether the peer is in the state the pair expects (e.g. standby hot).
    pub peer_consistent: bool,

    /// Raw state strings as reported by the device.
    pub detail: Option<String>,
}

impl RedundancyState {
    /// State of a unit that is not part of an HA pair.
    pub fn standalone() -> Self {
        Self {
            role: RedundancyRole::None,
            peer_role: None,
            peer_reachable: false,
            peer_consistent: true,
            detail: None,
        }
    }

    /// Whether this unit participates in an HA pair.
    pub fn is_paired(&self) -> bool {
        self.role != RedundancyRole::None
    }

    /// Whether the pair is consistent (trivially true when standalone).
    pub fn is_synced(&self) -> bool {
        !self.is_paired() || (self.peer_reachable && self.peer_consistent)
    }
}

/// Record of what a pre-stage step paused, handed back to post-stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedChanges {
    /// Identifiers of services that were disabled (e.g. WLAN IDs).
    pub paused: Vec<String>,

    /// Human-readable notes about what was done.
    pub notes: Vec<String>,
}

impl StagedChanges {
    /// Whether nothing needs restoring.
    pub fn is_empty(&self) -> bool {
        self.paused.is_empty()
    }
}
