//! Transport abstraction.
//!
//! The engine never talks to a serial device directly. It sees two narrow
//! capabilities:
//!
//! - [`SerialHandle`]: one lockable byte-stream resource. An open handle has
//!   a readable and a writable stream; each stream can be locked by a reader
//!   or writer that a protocol implementation acquired.
//! - [`PortProvider`]: hands out handles, either the ones it already granted
//!   ([`PortProvider::known_ports`]) or a new one picked by the operator,
//!   optionally restricted by USB vendor filters.
//!
//! ```text
//! +-------------------+      +-------------------+
//! | Connection Manager|----->|   PortProvider    |
//! |  Reclaimer        |      +---------+---------+
//! +---------+---------+                |
//!           |                          v
//!           |                +---------+---------+
//!           +--------------->|   SerialHandle    |
//!                            +---------+---------+
//!                                      |
//!                         +------------+------------+
//!                         |                         |
//!                  NativePort (serialport)   embedder-provided
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::fmt;

use serde::Serialize;

use crate::error::{PortError, SelectError};

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortProvider, PortChooser, PortReader, PortWriter};

/// One of the two streams of an open handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Device-to-host stream.
    Readable,
    /// Host-to-device stream.
    Writable,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Readable => write!(f, "readable"),
            Self::Writable => write!(f, "writable"),
        }
    }
}

/// Snapshot of a handle's streams.
///
/// `None` means the stream does not exist (the handle is closed on that
/// side); `Some(locked)` reports whether a reader/writer holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamState {
    /// Readable stream, if present.
    pub readable: Option<bool>,
    /// Writable stream, if present.
    pub writable: Option<bool>,
}

impl StreamState {
    /// A fully closed handle.
    pub const CLOSED: Self = Self {
        readable: None,
        writable: None,
    };

    /// Open handle with both streams unlocked.
    pub const OPEN: Self = Self {
        readable: Some(false),
        writable: Some(false),
    };

    /// Whether either stream endpoint exists.
    pub fn is_open(&self) -> bool {
        self.readable.is_some() || self.writable.is_some()
    }

    /// Whether a reader holds the readable stream.
    pub fn readable_locked(&self) -> bool {
        self.readable == Some(true)
    }

    /// Whether a writer holds the writable stream.
    pub fn writable_locked(&self) -> bool {
        self.writable == Some(true)
    }

    /// Whether the given stream is locked.
    pub fn is_locked(&self, stream: StreamKind) -> bool {
        match stream {
            StreamKind::Readable => self.readable_locked(),
            StreamKind::Writable => self.writable_locked(),
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "readable={} (locked={}), writable={} (locked={})",
            self.readable.is_some(),
            self.readable_locked(),
            self.writable.is_some(),
            self.writable_locked()
        )
    }
}

/// Serial port information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Short description for log lines, e.g. `VID 0x303a PID 0x1001`.
    pub fn describe(&self) -> String {
        let hex = |id: Option<u16>| id.map_or_else(|| "n/a".to_string(), |v| format!("0x{v:04x}"));
        format!("VID {} PID {}", hex(self.vid), hex(self.pid))
    }
}

/// USB selection filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbFilter {
    /// Vendor ID to match.
    pub vendor_id: u16,
    /// Product ID to match; `None` matches any product of the vendor.
    pub product_id: Option<u16>,
}

impl UsbFilter {
    /// Filter matching every product of a vendor.
    pub const fn vendor(vendor_id: u16) -> Self {
        Self {
            vendor_id,
            product_id: None,
        }
    }

    /// Whether a device with these ids passes the filter.
    pub fn matches(&self, vid: Option<u16>, pid: Option<u16>) -> bool {
        vid == Some(self.vendor_id) && self.product_id.is_none_or(|want| pid == Some(want))
    }
}

/// Whether a device passes a filter list. An empty list accepts everything.
pub fn passes_filters(filters: &[UsbFilter], vid: Option<u16>, pid: Option<u16>) -> bool {
    filters.is_empty() || filters.iter().any(|f| f.matches(vid, pid))
}

/// A lockable byte-stream transport resource.
///
/// Implementations mirror the browser serial model: a handle is created
/// closed, [`open`](SerialHandle::open) creates both streams, protocol code
/// locks them through implementation-specific reader/writer accessors, and
/// [`close`](SerialHandle::close) refuses to run while a stream is locked.
///
/// The reclaimer only needs the lock-breaking half of the contract:
/// cancel/close the current holder, then release the lock.
#[allow(async_fn_in_trait)]
pub trait SerialHandle: Send {
    /// Static information about the device behind the handle.
    fn info(&self) -> PortInfo;

    /// Current stream/lock state.
    fn stream_state(&self) -> StreamState;

    /// Open the port at the given baud rate.
    async fn open(&mut self, baud_rate: u32) -> Result<(), PortError>;

    /// Cancel whatever reader holds the readable stream.
    ///
    /// The stream stays locked until [`release_reader`](SerialHandle::release_reader).
    async fn cancel_reader(&mut self) -> Result<(), PortError>;

    /// Release the readable stream lock.
    fn release_reader(&mut self) -> Result<(), PortError>;

    /// Close whatever writer holds the writable stream.
    ///
    /// Returns [`PortError::WriterClosing`] if a close is already underway.
    async fn close_writer(&mut self) -> Result<(), PortError>;

    /// Release the writable stream lock.
    fn release_writer(&mut self) -> Result<(), PortError>;

    /// Close the handle. Fails while a stream is locked.
    async fn close(&mut self) -> Result<(), PortError>;

    /// Short description for log lines.
    fn describe(&self) -> String {
        self.info().describe()
    }
}

/// Source of transport handles.
#[allow(async_fn_in_trait)]
pub trait PortProvider {
    /// Handle type produced by this provider.
    type Port: SerialHandle;

    /// Whether a serial transport exists on this platform at all.
    fn is_supported(&self) -> bool {
        true
    }

    /// Handles this provider granted earlier and may still be open or locked.
    async fn known_ports(&self) -> Result<Vec<Self::Port>, PortError>;

    /// Ask for a new handle.
    ///
    /// With a non-empty filter list, only matching devices are offered and
    /// [`SelectError::NoCompatibleDevice`] is returned when none match. An
    /// empty list offers every device.
    async fn request_port(&self, filters: &[UsbFilter]) -> Result<Self::Port, SelectError>;
}
