//! Device directory queries
//!
//! A [`DeviceDirectory`] reports the serial devices currently attached to
//! the host. [`PortFinder`] filters that table by USB vendor/product ID and
//! reduces each match to a port label.

use std::sync::Arc;

use serialport::{available_ports, SerialPortType};
use tracing::{debug, info};

use crate::device::DeviceRecord;
use crate::error::DetectError;

/// Source of the host's plug-and-play serial device table
pub trait DeviceDirectory: Send + Sync {
    /// Snapshot of currently present devices, in native enumeration order
    fn devices(&self) -> Result<Vec<DeviceRecord>, DetectError>;
}

/// Directory backed by the OS serial port enumeration
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDirectory;

impl DeviceDirectory for SystemDirectory {
    fn devices(&self) -> Result<Vec<DeviceRecord>, DetectError> {
        let ports = available_ports()?;
        Ok(ports
            .into_iter()
            .map(|p| record_from_serialport(p.port_name, &p.port_type))
            .collect())
    }
}

/// Build a device record from serialport's port info
///
/// USB devices get a plug-and-play style instance path so that VID/PID
/// filters work the same on every host.
fn record_from_serialport(port_name: String, port_type: &SerialPortType) -> DeviceRecord {
    let (device_id, product) = match port_type {
        SerialPortType::UsbPort(usb) => (
            format!(
                "USB\\VID_{:04X}&PID_{:04X}\\{}",
                usb.vid,
                usb.pid,
                usb.serial_number.as_deref().unwrap_or(&port_name)
            ),
            usb.product
                .clone()
                .unwrap_or_else(|| "USB Serial Device".to_string()),
        ),
        SerialPortType::PciPort => (format!("PCI\\{port_name}"), "PCI Serial Port".to_string()),
        SerialPortType::BluetoothPort => (
            format!("BTHENUM\\{port_name}"),
            "Standard Serial over Bluetooth link".to_string(),
        ),
        SerialPortType::Unknown => (
            format!("ROOT\\PORTS\\{port_name}"),
            "Communications Port".to_string(),
        ),
    };

    DeviceRecord::new(device_id, format!("{product} ({port_name})"))
        .with_description(product)
        .with_port_name(port_name)
}

/// Filter over device instance paths by USB vendor and/or product ID
///
/// IDs are hex strings as they appear in instance paths (`"0403"`), matched
/// case-insensitively against `VID_xxxx` / `PID_xxxx` segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    vid: Option<String>,
    pid: Option<String>,
}

impl DeviceFilter {
    /// Match devices with the given vendor ID
    pub fn vid(vid: &str) -> Result<Self, DetectError> {
        Ok(Self {
            vid: Some(normalize_id("vendor ID", vid)?),
            pid: None,
        })
    }

    /// Match devices with the given product ID
    pub fn pid(pid: &str) -> Result<Self, DetectError> {
        Ok(Self {
            vid: None,
            pid: Some(normalize_id("product ID", pid)?),
        })
    }

    /// Match devices with both the given vendor and product ID
    pub fn vid_and_pid(vid: &str, pid: &str) -> Result<Self, DetectError> {
        Ok(Self {
            vid: Some(normalize_id("vendor ID", vid)?),
            pid: Some(normalize_id("product ID", pid)?),
        })
    }

    /// Check a device instance path against this filter
    pub fn matches(&self, device_id: &str) -> bool {
        let id = device_id.to_ascii_uppercase();
        let has = |prefix: &str, value: &Option<String>| {
            value
                .as_ref()
                .map_or(true, |v| id.contains(&format!("{prefix}_{v}")))
        };
        has("VID", &self.vid) && has("PID", &self.pid)
    }
}

fn normalize_id(what: &str, value: &str) -> Result<String, DetectError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DetectError::Validation(format!("{what} cannot be empty")));
    }
    Ok(value.to_ascii_uppercase())
}

/// Finds port labels of attached devices
pub struct PortFinder {
    directory: Arc<dyn DeviceDirectory>,
}

impl PortFinder {
    /// Create a finder over the given directory
    pub fn new(directory: Arc<dyn DeviceDirectory>) -> Self {
        Self { directory }
    }

    /// Create a finder over the OS serial port enumeration
    pub fn system() -> Self {
        Self::new(Arc::new(SystemDirectory))
    }

    /// Port labels of all devices matching the filter, in directory order
    ///
    /// Matching devices whose label cannot be determined are skipped.
    pub fn find(&self, filter: &DeviceFilter) -> Result<Vec<String>, DetectError> {
        let devices = self.directory.devices()?;

        let ports: Vec<String> = devices
            .iter()
            .filter(|d| filter.matches(&d.device_id))
            .filter_map(|d| {
                let label = d.port_label();
                if label.is_none() {
                    debug!("Skipping {} (no port label in {:?})", d.device_id, d.name);
                }
                label
            })
            .collect();

        info!("Found {} port(s) matching {:?}", ports.len(), filter);
        Ok(ports)
    }

    /// Ports of devices with the given vendor ID
    pub fn find_by_vid(&self, vid: &str) -> Result<Vec<String>, DetectError> {
        self.find(&DeviceFilter::vid(vid)?)
    }

    /// Ports of devices with the given product ID
    pub fn find_by_pid(&self, pid: &str) -> Result<Vec<String>, DetectError> {
        self.find(&DeviceFilter::pid(pid)?)
    }

    /// Ports of devices with the given vendor and product ID
    pub fn find_by_vid_and_pid(&self, vid: &str, pid: &str) -> Result<Vec<String>, DetectError> {
        self.find(&DeviceFilter::vid_and_pid(vid, pid)?)
    }
}

impl Default for PortFinder {
    fn default() -> Self {
        Self::system()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedDirectory;
    use serialport::UsbPortInfo;

    #[test]
    fn test_record_from_usb_port() {
        let usb_info = SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x0403,
            pid: 0x6001,
            serial_number: Some("A50285BI".to_string()),
            manufacturer: Some("FTDI".to_string()),
            product: Some("FT232R".to_string()),
        });

        let record = record_from_serialport("/dev/ttyUSB0".to_string(), &usb_info);

        assert_eq!(record.device_id, r"USB\VID_0403&PID_6001\A50285BI");
        assert_eq!(record.name, "FT232R (/dev/ttyUSB0)");
        assert_eq!(record.port_label().as_deref(), Some("/dev/ttyUSB0"));
    }

    #[test]
    fn test_record_from_unknown_port() {
        let record = record_from_serialport("COM1".to_string(), &SerialPortType::Unknown);

        assert_eq!(record.device_id, r"ROOT\PORTS\COM1");
        assert_eq!(record.name, "Communications Port (COM1)");
        assert_eq!(record.port_label().as_deref(), Some("COM1"));
    }

    #[test]
    fn test_filter_matches_case_insensitively() {
        let filter = DeviceFilter::vid_and_pid("10c4", "ea60").unwrap();

        assert!(filter.matches(r"USB\VID_10C4&PID_EA60\0001"));
        assert!(filter.matches(r"usb\vid_10c4&pid_ea60\0001"));
        assert!(!filter.matches(r"USB\VID_10C4&PID_EA70\0001"));
        assert!(!filter.matches(r"USB\VID_0403&PID_EA60\0001"));
    }

    #[test]
    fn test_filter_rejects_empty_ids() {
        assert!(matches!(
            DeviceFilter::vid("  "),
            Err(DetectError::Validation(_))
        ));
        assert!(matches!(
            DeviceFilter::vid_and_pid("0403", ""),
            Err(DetectError::Validation(_))
        ));
    }

    #[test]
    fn test_find_in_directory_order_skipping_unlabelled() {
        let directory = Arc::new(SimulatedDirectory::new());
        directory.plug_usb("4D43", "4D50", "COM5");
        directory.plug(DeviceRecord::new(
            r"USB\VID_4D43&PID_4D50\NOPORT",
            "Composite Device",
        ));
        directory.plug_usb("0403", "6001", "COM3");
        directory.plug_usb("4D43", "4D50", "COM2");

        let finder = PortFinder::new(directory);

        assert_eq!(
            finder.find_by_vid_and_pid("4D43", "4D50").unwrap(),
            vec!["COM5", "COM2"]
        );
        assert_eq!(finder.find_by_vid("0403").unwrap(), vec!["COM3"]);
        assert_eq!(finder.find_by_pid("4D50").unwrap(), vec!["COM5", "COM2"]);
        assert!(finder.find_by_pid("FFFF").unwrap().is_empty());
    }

    #[test]
    fn test_find_surfaces_query_failure() {
        let directory = Arc::new(SimulatedDirectory::new());
        directory.set_query_failure(true);

        let finder = PortFinder::new(directory);

        assert!(matches!(
            finder.find_by_vid("0403"),
            Err(DetectError::QueryFailed(_))
        ));
    }
}
