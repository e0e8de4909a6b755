//! Device discovery and classification utilities.
//!
//! Classification is by USB vendor id only: the boards this tool targets
//! show up either as a native USB CDC device or behind one of a handful of
//! USB-UART bridges, and product ids vary too much between board revisions
//! to be worth tracking.

use crate::port::{PortInfo, UsbFilter};

#[cfg(feature = "native")]
use log::{debug, trace};

/// Known USB vendors of boards and bridges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Espressif native USB (USB-Serial-JTAG / CDC).
    Espressif,
    /// Adafruit boards.
    Adafruit,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// WCH CH34x USB-to-Serial converter.
    Ch34x,
    /// FTDI USB-to-Serial converter.
    Ftdi,
    /// Arduino boards.
    Arduino,
    /// Raspberry Pi (RP2040 / Pico) boards.
    RaspberryPi,
    /// Unknown device.
    Unknown,
}

/// Vendor allow-list used to filter device selection.
pub const VENDOR_ALLOWLIST: &[(u16, DeviceKind)] = &[
    (0x303A, DeviceKind::Espressif),
    (0x239A, DeviceKind::Adafruit),
    (0x10C4, DeviceKind::Cp210x),
    (0x1A86, DeviceKind::Ch34x),
    (0x0403, DeviceKind::Ftdi),
    (0x2341, DeviceKind::Arduino),
    (0x2E8A, DeviceKind::RaspberryPi),
];

impl DeviceKind {
    /// Classify a USB vendor id.
    #[must_use]
    pub fn from_vid(vid: u16) -> Self {
        VENDOR_ALLOWLIST
            .iter()
            .find(|(known, _)| *known == vid)
            .map_or(Self::Unknown, |(_, kind)| *kind)
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Espressif => "Espressif USB",
            Self::Adafruit => "Adafruit",
            Self::Cp210x => "CP210x",
            Self::Ch34x => "CH34x",
            Self::Ftdi => "FTDI",
            Self::Arduino => "Arduino",
            Self::RaspberryPi => "Raspberry Pi",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known/expected device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Check if this device kind should be preferred during auto-selection.
    pub fn is_high_priority(&self) -> bool {
        matches!(self, Self::Espressif | Self::Cp210x | Self::Ch34x)
    }
}

/// Selection filters for the allow-list plus any extra vendor ids.
pub fn vendor_filters(extra_vendor_ids: &[u16]) -> Vec<UsbFilter> {
    let mut filters: Vec<UsbFilter> = VENDOR_ALLOWLIST
        .iter()
        .map(|(vid, _)| UsbFilter::vendor(*vid))
        .collect();
    for vid in extra_vendor_ids {
        if !filters.iter().any(|f| f.vendor_id == *vid) {
            filters.push(UsbFilter::vendor(*vid));
        }
    }
    filters
}

/// Discovered device endpoint information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedPort {
    /// Endpoint name/path (e.g., "/dev/ttyACM0" or "COM3").
    pub name: String,
    /// Classified device kind.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// Check if this endpoint passes the vendor allow-list.
    pub fn is_allowlisted(&self) -> bool {
        self.device.is_known()
    }
}

impl From<&DetectedPort> for PortInfo {
    fn from(port: &DetectedPort) -> Self {
        Self {
            name: port.name.clone(),
            vid: port.vid,
            pid: port.pid,
            manufacturer: port.manufacturer.clone(),
            product: port.product.clone(),
            serial_number: port.serial.clone(),
        }
    }
}

/// Detect all available endpoints with metadata.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    let mut result = Vec::new();

    match serialport::available_ports() {
        Ok(ports) => {
            for port_info in ports {
                let mut detected = DetectedPort {
                    name: port_info.port_name.clone(),
                    device: DeviceKind::Unknown,
                    vid: None,
                    pid: None,
                    manufacturer: None,
                    product: None,
                    serial: None,
                };

                if let serialport::SerialPortType::UsbPort(usb_info) = port_info.port_type {
                    detected.vid = Some(usb_info.vid);
                    detected.pid = Some(usb_info.pid);
                    detected.manufacturer = usb_info.manufacturer;
                    detected.product = usb_info.product;
                    detected.serial = usb_info.serial_number;
                    detected.device = DeviceKind::from_vid(usb_info.vid);

                    trace!(
                        "Found USB port: {} (VID: {:04X}, PID: {:04X}, Device: {:?})",
                        port_info.port_name, usb_info.vid, usb_info.pid, detected.device
                    );
                }

                result.push(detected);
            }
        },
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
        },
    }

    result
}

/// Detect all available endpoints (no native transport - always empty).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Pick the most likely board among `ports`.
///
/// Native Espressif USB wins, then the common bridges, then any allow-listed
/// vendor, then the first port.
pub fn best_candidate(ports: &[DetectedPort]) -> Option<usize> {
    ports
        .iter()
        .position(|p| p.device == DeviceKind::Espressif)
        .or_else(|| {
            ports
                .iter()
                .position(|p| p.device.is_high_priority())
        })
        .or_else(|| {
            ports
                .iter()
                .position(|p| p.device.is_known())
        })
        .or_else(|| (!ports.is_empty()).then_some(0))
}

/// Format a list of detected endpoints for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    let mut result = Vec::new();

    for port in ports {
        let device_info = if port.device.is_known() {
            format!(" [{}]", port.device.name())
        } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" [VID:{vid:04X} PID:{pid:04X}]")
        } else {
            String::new()
        };

        let product_info = port
            .product
            .as_ref()
            .map(|p| format!(" - {p}"))
            .unwrap_or_default();

        result.push(format!("{}{}{}", port.name, device_info, product_info));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, vid: Option<u16>) -> DetectedPort {
        DetectedPort {
            name: name.to_string(),
            device: vid.map_or(DeviceKind::Unknown, DeviceKind::from_vid),
            vid,
            pid: vid.map(|_| 0x0001),
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    #[test]
    fn test_device_kind_from_vid() {
        assert_eq!(DeviceKind::from_vid(0x303A), DeviceKind::Espressif);
        assert_eq!(DeviceKind::from_vid(0x239A), DeviceKind::Adafruit);
        assert_eq!(DeviceKind::from_vid(0x10C4), DeviceKind::Cp210x);
        assert_eq!(DeviceKind::from_vid(0x1A86), DeviceKind::Ch34x);
        assert_eq!(DeviceKind::from_vid(0x0403), DeviceKind::Ftdi);
        assert_eq!(DeviceKind::from_vid(0x2341), DeviceKind::Arduino);
        assert_eq!(DeviceKind::from_vid(0x2E8A), DeviceKind::RaspberryPi);
        assert_eq!(DeviceKind::from_vid(0x067B), DeviceKind::Unknown);
    }

    #[test]
    fn test_vendor_filters_cover_allowlist_and_extras() {
        let filters = vendor_filters(&[0x067B, 0x303A]);
        assert_eq!(filters.len(), VENDOR_ALLOWLIST.len() + 1);
        assert!(filters.contains(&UsbFilter::vendor(0x067B)));
        assert!(filters.iter().all(|f| f.product_id.is_none()));
    }

    #[test]
    fn test_best_candidate_priority() {
        let ports = vec![
            port("/dev/ttyS0", None),
            port("/dev/ttyACM1", Some(0x2341)),
            port("/dev/ttyUSB0", Some(0x1A86)),
            port("/dev/ttyACM0", Some(0x303A)),
        ];
        assert_eq!(best_candidate(&ports), Some(3));
        assert_eq!(best_candidate(&ports[..3]), Some(2));
        assert_eq!(best_candidate(&ports[..2]), Some(1));
        assert_eq!(best_candidate(&ports[..1]), Some(0));
        assert_eq!(best_candidate(&[]), None);
    }

    #[test]
    fn test_port_info_from_detected() {
        let detected = port("/dev/ttyUSB0", Some(0x10C4));
        let info = PortInfo::from(&detected);
        assert_eq!(info.name, "/dev/ttyUSB0");
        assert_eq!(info.vid, Some(0x10C4));
        assert!(detected.is_allowlisted());
    }

    #[test]
    fn test_format_port_list() {
        let mut bridge = port("/dev/ttyUSB0", Some(0x10C4));
        bridge.product = Some("CP2102N USB to UART".to_string());
        let mut foreign = port("/dev/ttyUSB1", Some(0x067B));
        foreign.pid = Some(0x2303);
        let ports = vec![bridge, foreign, port("/dev/ttyS0", None)];

        let formatted = format_port_list(&ports);
        assert_eq!(formatted.len(), 3);
        assert_eq!(formatted[0], "/dev/ttyUSB0 [CP210x] - CP2102N USB to UART");
        assert_eq!(formatted[1], "/dev/ttyUSB1 [VID:067B PID:2303]");
        assert_eq!(formatted[2], "/dev/ttyS0");
    }
}
