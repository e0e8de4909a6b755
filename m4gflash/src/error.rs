//! Error types for m4gflash.
//!
//! Each concern has its own error enum so callers can tell tolerated
//! failures (diagnostic queries, lock releases, resets) from fatal ones.
//! [`ErrorKind`] folds them into one taxonomy and [`ErrorKind::reversion`]
//! is the single place that decides which connection state an error
//! leaves behind.

use std::io;
use std::num::ParseIntError;
use std::path::PathBuf;

use thiserror::Error;

use crate::manager::ConnectionState;
use crate::port::StreamKind;

/// Result type for m4gflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Umbrella error type, convenient for front-ends that do not care which stage failed.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport primitive failure.
    #[error(transparent)]
    Port(#[from] PortError),

    /// Device selection failure.
    #[error(transparent)]
    Select(#[from] SelectError),

    /// Bootloader protocol failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Transport reclaim failure.
    #[error(transparent)]
    Reclaim(#[from] ReclaimError),

    /// Connect attempt failure.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Firmware selection is not flashable.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Firmware or manifest could not be fetched.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Flash attempt failure.
    #[error(transparent)]
    Flash(#[from] FlashError),
}

impl Error {
    /// Taxonomy bucket of the wrapped error, when it has one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Connect(e) => e.kind(),
            Self::Flash(e) => e.kind(),
            Self::Select(SelectError::Cancelled) => Some(ErrorKind::PortSelectionCancelled),
            Self::Reclaim(ReclaimError::LockRelease { .. }) => Some(ErrorKind::LockReleaseFailed),
            Self::Validation(_) => Some(ErrorKind::ValidationError),
            Self::Fetch(_) => Some(ErrorKind::FetchError),
            Self::Port(_) | Self::Select(_) | Self::Protocol(_) | Self::Reclaim(_) => None,
        }
    }
}

/// Errors raised by a transport handle.
#[derive(Debug, Error)]
pub enum PortError {
    /// I/O error on the underlying device.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Native serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The stream is held by another reader or writer.
    #[error("{0} stream is locked")]
    Locked(StreamKind),

    /// The stream does not exist (port closed).
    #[error("{0} stream is not available")]
    NoStream(StreamKind),

    /// The writer is already closing.
    #[error("writer is already closing")]
    WriterClosing,

    /// The port is already open.
    #[error("port is already open")]
    AlreadyOpen,

    /// The port is not open.
    #[error("port is not open")]
    NotOpen,

    /// Operation not supported by this transport.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Errors raised while asking the operator (or the platform) for a device.
#[derive(Debug, Error)]
pub enum SelectError {
    /// The chooser was closed without picking a device.
    #[error("No port selected by the user.")]
    Cancelled,

    /// No device matched the filters.
    #[error("No compatible devices found.")]
    NoCompatibleDevice,

    /// Transport failure while enumerating.
    #[error(transparent)]
    Port(#[from] PortError),
}

/// Errors raised by the bootloader protocol capability.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The protocol handle does not implement this operation.
    #[error("{0} is not supported by this loader")]
    Unsupported(&'static str),

    /// The device did not answer in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Bootloader handshake failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The device answered with an error or garbage.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Transport failure underneath the protocol.
    #[error("Transport error: {0}")]
    Port(#[from] PortError),
}

/// Errors raised by the transport reclaimer.
///
/// Callers log these and carry on: a port that really stays busy fails
/// later with a clearer open/handshake error.
#[derive(Debug, Error)]
pub enum ReclaimError {
    /// A leftover stream lock could not be released.
    #[error("failed to release {stream} lock: {source}")]
    LockRelease {
        /// Which stream was locked.
        stream: StreamKind,
        /// Underlying failure.
        #[source]
        source: PortError,
    },

    /// The port could not be closed.
    #[error("close failed: {0}")]
    Close(#[source] PortError),
}

/// Errors raised by [`DeviceManager::connect`](crate::DeviceManager::connect).
#[derive(Debug, Error)]
pub enum ConnectError {
    /// No serial transport on this platform.
    #[error("This platform does not provide a serial transport.")]
    Unsupported,

    /// Another connect or flash owns the state machine.
    #[error("Cannot connect while {0}")]
    Busy(ConnectionState),

    /// The operator closed the device chooser.
    #[error("Serial port selection was cancelled.")]
    SelectionCancelled,

    /// Device selection failed for another reason.
    #[error("Port selection failed: {0}")]
    Selection(#[source] SelectError),

    /// The bootloader handshake failed.
    #[error("{0}")]
    Handshake(#[source] ProtocolError),

    /// A disconnect or newer connect replaced this attempt.
    #[error("Connection attempt was abandoned")]
    Superseded,
}

impl ConnectError {
    /// Taxonomy bucket, `None` for rejections that never owned the state machine.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::SelectionCancelled => Some(ErrorKind::PortSelectionCancelled),
            Self::Selection(_) | Self::Handshake(_) => Some(ErrorKind::HandshakeFailed),
            Self::Unsupported | Self::Busy(_) | Self::Superseded => None,
        }
    }
}

/// A firmware selection that cannot be flashed. Raised before any I/O.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Catalog tab active but nothing picked.
    #[error("Select a firmware package to continue.")]
    NoPackageSelected,

    /// Catalog entry without images.
    #[error("Firmware package '{0}' does not define any images.")]
    NoImages(String),

    /// Custom tab active but no file picked.
    #[error("Choose a firmware .bin file to flash.")]
    NoFileChosen,

    /// Address literal is not a valid u32.
    #[error("Invalid flash address '{value}': {source}")]
    InvalidAddress {
        /// The literal as written.
        value: String,
        /// Parse failure.
        #[source]
        source: ParseIntError,
    },

    /// Flash size/mode/frequency outside the supported set.
    #[error("Unsupported {param} '{value}'")]
    InvalidFlashParam {
        /// Parameter name.
        param: &'static str,
        /// Value as written.
        value: String,
    },
}

/// Firmware or manifest retrieval failure.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Server answered with a non-success status.
    #[error("Failed to fetch {location} (HTTP {status})")]
    Status {
        /// Resolved location.
        location: String,
        /// HTTP status code.
        status: u16,
    },

    /// HTTP client failure.
    #[cfg(feature = "http")]
    #[error("Failed to fetch {location}: {source}")]
    Http {
        /// Resolved location.
        location: String,
        /// Client error.
        #[source]
        source: reqwest::Error,
    },

    /// Local file could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        /// File path.
        path: PathBuf,
        /// I/O error.
        #[source]
        source: io::Error,
    },

    /// Location could not be resolved against the base.
    #[error("Invalid location '{location}': {reason}")]
    InvalidLocation {
        /// Location as written.
        location: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Manifest JSON is malformed.
    #[error("Invalid manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Errors raised by [`DeviceManager::flash`](crate::DeviceManager::flash).
#[derive(Debug, Error)]
pub enum FlashError {
    /// Flash requested without a connected session.
    #[error("Device is not connected (state: {0}). Connect to the board before flashing.")]
    NotConnected(ConnectionState),

    /// Payload could not be materialized.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The protocol write failed.
    #[error("{0}")]
    Write(#[source] ProtocolError),

    /// A disconnect or newer connect replaced the session mid-flash.
    #[error("Flash was abandoned after the session was torn down")]
    Superseded,
}

impl FlashError {
    /// Taxonomy bucket, `None` for rejections that never owned the state machine.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Fetch(_) => Some(ErrorKind::FetchError),
            Self::Write(_) => Some(ErrorKind::FlashWriteFailed),
            Self::NotConnected(_) | Self::Superseded => None,
        }
    }
}

/// Error taxonomy shared by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operator aborted the device chooser.
    PortSelectionCancelled,
    /// Leftover stream lock could not be released.
    LockReleaseFailed,
    /// Bootloader handshake (or anything before it) failed.
    HandshakeFailed,
    /// Flash id, flash size or stub upload failed.
    DiagnosticQueryFailed,
    /// Selection is not flashable.
    ValidationError,
    /// Manifest or image fetch failed.
    FetchError,
    /// The protocol write failed.
    FlashWriteFailed,
    /// Post-write reset failed.
    ResetFailed,
}

/// Connection state an error leaves behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reversion {
    /// Full teardown, no session survives.
    Idle,
    /// Session stays usable for a retry.
    Connected,
    /// State is not touched.
    Unchanged,
}

impl ErrorKind {
    /// State-reversion table.
    ///
    /// | kind                     | state after   |
    /// |--------------------------|---------------|
    /// | `PortSelectionCancelled` | `idle`        |
    /// | `LockReleaseFailed`      | unchanged     |
    /// | `HandshakeFailed`        | `idle`        |
    /// | `DiagnosticQueryFailed`  | unchanged     |
    /// | `ValidationError`        | unchanged     |
    /// | `FetchError`             | `connected`   |
    /// | `FlashWriteFailed`       | `connected`   |
    /// | `ResetFailed`            | unchanged     |
    pub fn reversion(self) -> Reversion {
        match self {
            Self::PortSelectionCancelled | Self::HandshakeFailed => Reversion::Idle,
            Self::FetchError | Self::FlashWriteFailed => Reversion::Connected,
            Self::LockReleaseFailed
            | Self::DiagnosticQueryFailed
            | Self::ValidationError
            | Self::ResetFailed => Reversion::Unchanged,
        }
    }

    /// Whether the error ends the operation it happened in.
    pub fn is_fatal(self) -> bool {
        !matches!(
            self,
            Self::LockReleaseFailed | Self::DiagnosticQueryFailed | Self::ResetFailed
        )
    }
}
