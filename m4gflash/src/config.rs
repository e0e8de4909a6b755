//! Engine tuning knobs.

use std::time::Duration;

use crate::device;
use crate::port::UsbFilter;

/// Baud rates offered for the flashing link.
pub const SUPPORTED_BAUDS: [u32; 3] = [460_800, 921_600, 1_500_000];

/// Default flashing baud rate.
pub const DEFAULT_BAUD: u32 = 921_600;

/// Baud rate the ROM bootloader answers on before the link is switched.
pub const ROM_BAUD: u32 = 115_200;

/// Configuration for a [`DeviceManager`](crate::DeviceManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Pause after releasing a stream lock.
    pub settle_delay: Duration,
    /// Pause after closing a port.
    pub close_settle_delay: Duration,
    /// Pause after tearing down a previous session before a new attempt.
    pub supersede_delay: Duration,
    /// ROM bootloader baud rate.
    pub rom_baud: u32,
    /// Baud rate used when the caller has no preference.
    pub default_baud: u32,
    /// Filters applied to the first selection attempt.
    pub filters: Vec<UsbFilter>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(100),
            close_settle_delay: Duration::from_millis(150),
            supersede_delay: Duration::from_millis(200),
            rom_baud: ROM_BAUD,
            default_baud: DEFAULT_BAUD,
            filters: device::vendor_filters(&[]),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lock-release settle delay.
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the post-close settle delay.
    #[must_use]
    pub fn with_close_settle_delay(mut self, delay: Duration) -> Self {
        self.close_settle_delay = delay;
        self
    }

    /// Set the delay between tearing down an old session and starting a new one.
    #[must_use]
    pub fn with_supersede_delay(mut self, delay: Duration) -> Self {
        self.supersede_delay = delay;
        self
    }

    /// Set the ROM bootloader baud rate.
    #[must_use]
    pub fn with_rom_baud(mut self, baud: u32) -> Self {
        self.rom_baud = baud;
        self
    }

    /// Set the default flashing baud rate.
    #[must_use]
    pub fn with_default_baud(mut self, baud: u32) -> Self {
        self.default_baud = baud;
        self
    }

    /// Add vendor ids on top of the built-in allow-list.
    #[must_use]
    pub fn with_extra_vendors(mut self, vendor_ids: &[u16]) -> Self {
        for vid in vendor_ids {
            if !self.filters.iter().any(|f| f.vendor_id == *vid) {
                self.filters.push(UsbFilter::vendor(*vid));
            }
        }
        self
    }

    /// Replace the selection filters entirely.
    #[must_use]
    pub fn with_filters(mut self, filters: Vec<UsbFilter>) -> Self {
        self.filters = filters;
        self
    }
}

/// Whether `baud` is one of [`SUPPORTED_BAUDS`].
pub fn is_supported_baud(baud: u32) -> bool {
    SUPPORTED_BAUDS.contains(&baud)
}
