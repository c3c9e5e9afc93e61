//! Error types for netlift.
//!
//! Errors are layered the same way the crate is: the transport seam, the
//! device contract, and platform definitions each own an enum, and the
//! top-level [`Error`] wraps them. The lifecycle layer never uses these for
//! normal control flow; it classifies them into typed outcomes.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for netlift operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level errors (SSH session, file push)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Device contract errors
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Platform/vendor definition errors
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
}

impl Error {
    /// Whether the failure is transient and worth retrying.
    ///
    /// Connection resets, timeouts and dropped sessions are transient.
    /// Rejected configuration, missing files and capability signals are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transport(e) => e.is_transient(),
            Error::Device(DeviceError::ConnectFailed { source, .. }) => source.is_transient(),
            Error::Device(DeviceError::NotConnected) => true,
            _ => false,
        }
    }

    /// Whether this is a capability signal rather than a failure.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Device(DeviceError::UnsupportedOperation { .. }))
    }

    /// Whether the device reported that the destination storage is full.
    pub fn is_destination_full(&self) -> bool {
        matches!(self, Error::Transport(TransportError::InsufficientSpace { .. }))
    }

    /// Whether the device reported the remote file as absent.
    pub fn is_file_not_found(&self) -> bool {
        matches!(self, Error::Device(DeviceError::FileNotFound { .. }))
    }
}

/// Transport layer errors (SSH connection, authentication, file push).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// Host key does not match the known_hosts entry
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// Host is not present in known_hosts and strict checking is on
    #[error("Host key for {host}:{port} is unknown")]
    HostKeyUnknown { host: String, port: u16 },

    /// Reading or writing known_hosts failed
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// Connection was closed unexpectedly
    #[error("Connection disconnected")]
    Disconnected,

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The device has no room left for the file
    #[error("Insufficient space for '{path}': {message}")]
    InsufficientSpace { path: String, message: String },

    /// The device refused the file for a reason other than space
    #[error("Transfer of '{path}' rejected: {message}")]
    TransferRejected { path: String, message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Whether the failure is a transient connectivity problem.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::ConnectionFailed { .. }
            | TransportError::Ssh(_)
            | TransportError::Disconnected
            | TransportError::Timeout(_) => true,
            TransportError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Device contract errors.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The session could not be established within the timeout
    #[error("Could not connect to {host}: {source}")]
    ConnectFailed {
        host: String,
        #[source]
        source: Box<Error>,
    },

    /// The handle is not open
    #[error("Device not connected - call open() first")]
    NotConnected,

    /// A configuration statement was refused by the device
    #[error("Configuration '{command}' rejected: {reason}")]
    ConfigRejected { command: String, reason: String },

    /// An operational command reported a failure
    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    /// A remote file does not exist
    #[error("{file} was not found in {file_system}")]
    FileNotFound { file: String, file_system: String },

    /// The platform has no such capability
    #[error("'{operation}' is not supported on {platform}")]
    UnsupportedOperation {
        platform: String,
        operation: &'static str,
    },

    /// The unit is not the active member of its HA pair
    #[error("{host} is not the active device (device state: {role}, peer state: {peer_role})")]
    NotActive {
        host: String,
        role: String,
        peer_role: String,
    },

    /// Another run already holds the HA pair
    #[error("HA pair '{pair}' is already held by another run")]
    Conflict { pair: String },

    /// Device output could not be interpreted
    #[error("Unable to parse output of '{command}': {message}")]
    Parse { command: String, message: String },

    /// Invalid configuration supplied by the caller
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Reading a local file failed
    #[error("Local file '{}': {source}", path.display())]
    LocalFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DeviceError {
    /// Build the capability signal for `operation` on `platform`.
    pub fn unsupported(platform: impl Into<String>, operation: &'static str) -> Self {
        DeviceError::UnsupportedOperation {
            platform: platform.into(),
            operation,
        }
    }
}

/// Platform/vendor definition errors.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// No built-in platform with this name
    #[error("Unknown platform '{name}'")]
    UnknownPlatform { name: String },

    /// Invalid platform definition
    #[error("Invalid platform definition: {message}")]
    InvalidDefinition { message: String },

    /// Invalid regex pattern in a platform definition or parser
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Result type alias using netlift's Error.
pub type Result<T> = std::result::Result<T, Error>;
