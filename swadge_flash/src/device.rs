// swadge_flash/src/device.rs

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serialport::SerialPortType;

use crate::FlashError;

/// ESP32-S2 native USB (Espressif vendor id, ROM bootloader product id).
pub const ESP32_S2_VID: u16 = 0x303A;
pub const ESP32_S2_PID: u16 = 0x0002;

/// One entry of a serial port snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRecord {
    pub path: String,
    /// `None` for ports that are not USB (built-in UARTs, bluetooth, pty).
    pub usb: Option<(u16, u16)>,
}

impl PortRecord {
    pub fn usb(path: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        Self {
            path: path.into(),
            usb: Some((vendor_id, product_id)),
        }
    }

    pub fn other(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            usb: None,
        }
    }
}

/// A physically attached device, for as long as it stays attached.
///
/// Two identities are the same device when their port paths are equal; the
/// vendor/product pair is only used to pick the device out of a snapshot.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl PartialEq for DeviceIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for DeviceIdentity {}

impl Hash for DeviceIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl PartialOrd for DeviceIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DeviceIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path.cmp(&other.path)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:04X}:{:04X})",
            self.path, self.vendor_id, self.product_id
        )
    }
}

/// The vendor/product pair a port must report to be flashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDevice {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl Default for TargetDevice {
    fn default() -> Self {
        Self {
            vendor_id: ESP32_S2_VID,
            product_id: ESP32_S2_PID,
        }
    }
}

impl TargetDevice {
    pub fn matches(&self, port: &PortRecord) -> bool {
        port.usb == Some((self.vendor_id, self.product_id))
    }

    /// Identities of every matching port, in snapshot order.
    pub fn filter<'a>(
        &'a self,
        snapshot: &'a [PortRecord],
    ) -> impl Iterator<Item = DeviceIdentity> + 'a {
        snapshot
            .iter()
            .filter(|p| self.matches(p))
            .map(|p| DeviceIdentity {
                path: p.path.clone(),
                vendor_id: self.vendor_id,
                product_id: self.product_id,
            })
    }
}

/// Source of serial port snapshots. Must be cheap and side-effect free.
pub trait PortScanner: Send + Sync {
    fn scan(&self) -> Result<Vec<PortRecord>, FlashError>;
}

/// Scans the host's ports through the `serialport` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialPortScanner;

impl PortScanner for SerialPortScanner {
    fn scan(&self) -> Result<Vec<PortRecord>, FlashError> {
        let ports = serialport::available_ports()?;
        Ok(ports
            .into_iter()
            .map(|p| match p.port_type {
                SerialPortType::UsbPort(info) => PortRecord::usb(p.port_name, info.vid, info.pid),
                _ => PortRecord::other(p.port_name),
            })
            .collect())
    }
}
