//! # Error Types
//!
//! Custom error types for Cell Reporter using `thiserror`.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Main error type for Cell Reporter
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Session could not be opened (malformed endpoint, unreachable collector)
    #[error("Connect error: {0}")]
    Connect(String),

    /// No reply arrived within the exchange timeout
    #[error("Timed out after {0:?} waiting for reply")]
    Timeout(Duration),

    /// Connection-level failure during an exchange
    #[error("Transport error: {0}")]
    Transport(String),

    /// The snapshot source had no data for this attempt
    #[error("Snapshot unavailable")]
    SnapshotUnavailable,

    /// The snapshot source panicked while producing a snapshot
    #[error("Snapshot source failed: {0}")]
    Source(String),

    /// Reporter setting out of range (zero interval, zero timeout)
    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    /// Control command not recognized
    #[error("Unknown command '{0}' (expected start, stop, send, status, quit)")]
    UnknownCommand(String),

    /// Snapshot values outside their physical range
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Snapshot could not be encoded
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TelemetryError {
    /// Classify this error for status display
    pub fn kind(&self) -> FailureKind {
        match self {
            TelemetryError::Connect(_) => FailureKind::Connect,
            TelemetryError::Timeout(_) => FailureKind::Timeout,
            TelemetryError::Transport(_) => FailureKind::Transport,
            TelemetryError::SnapshotUnavailable => FailureKind::SnapshotUnavailable,
            TelemetryError::Source(_) => FailureKind::Source,
            TelemetryError::Serialize(_) => FailureKind::Serialize,
            TelemetryError::InvalidSetting(_)
            | TelemetryError::UnknownCommand(_)
            | TelemetryError::InvalidSnapshot(_)
            | TelemetryError::Config(_)
            | TelemetryError::Io(_) => FailureKind::Other,
        }
    }
}

/// Copyable failure classification, used in status reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Connect,
    Timeout,
    Transport,
    SnapshotUnavailable,
    Source,
    Serialize,
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Connect => "connect",
            FailureKind::Timeout => "timeout",
            FailureKind::Transport => "transport",
            FailureKind::SnapshotUnavailable => "no data",
            FailureKind::Source => "source",
            FailureKind::Serialize => "serialize",
            FailureKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Result type alias for Cell Reporter
pub type Result<T> = std::result::Result<T, TelemetryError>;
