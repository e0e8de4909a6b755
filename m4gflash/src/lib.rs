//! # m4gflash
//!
//! A firmware-flash orchestration engine for ROM-bootloader microcontroller
//! boards.
//!
//! The crate does not speak any bootloader protocol itself. It drives one
//! through the [`Loader`] capability and owns everything around it:
//!
//! - [`DeviceManager`]: the `idle → connecting → connected → flashing`
//!   state machine, with a generation counter that discards stale results
//! - [`Reclaimer`]: breaking leftover stream locks and closing ports
//! - [`FirmwareResolver`]: turning a catalog package or a local file into a
//!   [`FlashConfiguration`]
//! - [`LogSink`]: the ordered, user-visible operation trail
//!
//! ## Features
//!
//! - `native` (default): serial ports via the `serialport` crate
//! - `http` (default): fetching catalog images over http(s)
//!
//! ## Example
//!
//! ```rust,ignore
//! use m4gflash::{DeviceManager, FirmwareResolver, FirmwareSelection, DirFetcher, LogSink};
//!
//! let sink = LogSink::new();
//! let manager = DeviceManager::new(provider, factory, sink.clone());
//! manager.connect(Some(921_600)).await?;
//!
//! let resolver = FirmwareResolver::new(DirFetcher::new("public"));
//! let summary = manager
//!     .flash_selection(&selection, &resolver, |pct| println!("{pct}%"))
//!     .await?;
//! manager.disconnect().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod device;
pub mod error;
pub mod firmware;
pub mod loader;
pub mod manager;
pub mod port;
pub mod reclaim;
pub mod trail;

#[cfg(test)]
mod test_helpers;

#[cfg(feature = "native")]
pub use port::{NativePort, NativePortProvider, PortReader, PortWriter};
pub use {
    config::EngineConfig,
    device::{
        DetectedPort, DeviceKind, best_candidate, detect_ports, format_port_list, vendor_filters,
    },
    error::{
        ConnectError, Error, ErrorKind, FetchError, FlashError, PortError, ProtocolError,
        ReclaimError, Result, Reversion, SelectError, ValidationError,
    },
    firmware::{
        BaseFetcher, Catalog, CustomSelection, DirFetcher, Fetcher, FirmwareImage,
        FirmwareManifest, FirmwarePackage, FirmwareResolver, FirmwareSelection, FlashConfiguration,
        FlashFile, FlashFreq, FlashMode, FlashParams, FlashSize, FlashSource, MANIFEST_PATH,
        parse_address, resolve,
    },
    loader::{Loader, LoaderFactory, LoaderOptions, LoaderTerminal},
    manager::{ConnectionState, DeviceInfo, DeviceManager, FlashSummary, FlashedFile, ResetOutcome},
    port::{PortInfo, PortProvider, SerialHandle, StreamKind, StreamState, UsbFilter},
    reclaim::Reclaimer,
    trail::{LogEntry, LogSink, LogVariant},
};
