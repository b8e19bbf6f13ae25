//! Error types for pose telemetry streaming and recording.
//!
//! All errors implement `std::error::Error` and carry enough context to decide
//! whether the failing operation can be retried.
//!
//! ## Error Categories
//!
//! - **Transport Errors**: TCP connect/read/write failures, recovered as disconnects
//! - **Framing Errors**: Length prefixes that cannot describe a valid frame
//! - **Decode Errors**: Packet bodies exhausted before a field was fully read
//! - **Protocol Errors**: Version mismatch between client and server
//! - **Recording Errors**: Preconditions for starting or stopping a CSV session
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use posecast::PosecastError;
//!
//! let error = PosecastError::connection_failed("connection refused");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::PeerId;

/// Result type alias for posecast operations.
pub type Result<T, E = PosecastError> = std::result::Result<T, E>;

/// Reasons a recording session could not be started or stopped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordingRejection {
    #[error("a subject identifier is required")]
    MissingSubject,

    #[error("a trial identifier is required")]
    MissingTrial,

    #[error("file already exists: {}", .0.display())]
    FileExists(PathBuf),

    #[error("a recording is already active")]
    AlreadyRecording,

    #[error("no recording is active")]
    NotRecording,

    #[error("an automatic stop is pending")]
    AutoStopPending,
}

/// Main error type for posecast operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PosecastError {
    #[error("Connection failed: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Recording file error: {}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Protocol version mismatch: expected {expected}, found {found}")]
    Version { expected: String, found: String },

    #[error("Decode error in {context}: {details}")]
    Decode { context: String, details: String },

    #[error("Framing error: {details}")]
    Framing { details: String },

    #[error("Unknown packet type {value}")]
    UnknownPacketType { value: i32 },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Peer {peer_id} is not connected")]
    PeerNotFound { peer_id: PeerId },

    #[error("Not connected to a validated server")]
    NotConnected,

    #[error("Connection is closed")]
    Closed,

    #[error("Invalid server address '{input}': {details}")]
    Address { input: String, details: String },

    #[error("Configuration error: {details}")]
    Config {
        details: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Recording rejected: {0}")]
    Recording(#[from] RecordingRejection),
}

impl PosecastError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            PosecastError::Connection { .. } => true,
            PosecastError::Timeout { .. } => true,
            PosecastError::NotConnected => true,
            PosecastError::Closed => true,
            PosecastError::File { .. } => false,
            PosecastError::Version { .. } => false,
            PosecastError::Decode { .. } => false,
            PosecastError::Framing { .. } => false,
            PosecastError::UnknownPacketType { .. } => false,
            PosecastError::PeerNotFound { .. } => false,
            PosecastError::Address { .. } => false,
            PosecastError::Config { .. } => false,
            PosecastError::Recording(_) => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            PosecastError::Connection { .. } => vec![
                "Ensure the server application is running",
                "Check that both devices are on the same network",
                "Verify the server address and port",
            ],
            PosecastError::File { .. } => vec![
                "Check the data directory is writable",
                "Ensure sufficient disk space",
                "Check file permissions",
            ],
            PosecastError::Version { .. } => vec![
                "Update the server application",
                "Update the client application to the same protocol version",
            ],
            PosecastError::Decode { .. } => vec![
                "Check both peers are configured with the same tracked objects",
                "Verify both peers run the same protocol version",
            ],
            PosecastError::Framing { .. } => vec![
                "Verify the peer speaks the posecast wire protocol",
                "Reconnect to resynchronise the stream",
            ],
            PosecastError::UnknownPacketType { .. } => vec![
                "Verify both peers run the same protocol version",
                "Update the older peer",
            ],
            PosecastError::Timeout { .. } => vec![
                "Increase the timeout duration",
                "Check network latency between peers",
            ],
            PosecastError::PeerNotFound { .. } => {
                vec!["Refresh the peer list", "Wait for the peer to reconnect"]
            }
            PosecastError::NotConnected => vec![
                "Connect to the server before sending",
                "Wait for the version handshake to complete",
            ],
            PosecastError::Closed => {
                vec!["Reconnect to the peer", "Check the connection was not closed locally"]
            }
            PosecastError::Address { .. } => vec![
                "Use the form a.b.c.d:port",
                "Check the port is between 0 and 65535",
            ],
            PosecastError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Compare against the documented defaults",
            ],
            PosecastError::Recording(_) => vec![
                "Enter both a subject and a trial identifier",
                "Choose a trial name that does not exist yet",
                "Stop the active recording first",
            ],
        }
    }

    /// Helper constructor for recording file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        PosecastError::File { path, source }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        PosecastError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        PosecastError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for decode errors.
    pub fn decode_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        PosecastError::Decode { context: context.into(), details: details.into() }
    }

    /// Helper constructor for framing errors.
    pub fn framing_error(details: impl Into<String>) -> Self {
        PosecastError::Framing { details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config_error(details: impl Into<String>) -> Self {
        PosecastError::Config { details: details.into(), source: None }
    }
}

impl From<std::io::Error> for PosecastError {
    fn from(err: std::io::Error) -> Self {
        PosecastError::Connection { reason: format!("I/O error: {}", err), source: Some(Box::new(err)) }
    }
}
