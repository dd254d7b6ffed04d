//! Device records and port label extraction
//!
//! A [`DeviceRecord`] is what a device directory reports for one
//! plug-and-play entry. The watcher reduces each record to a
//! [`DeviceEvent`] carrying the serial port label (`COM3`, `/dev/ttyUSB0`)
//! that the rest of the stack keys on.

/// Device setup class GUID for serial and parallel ports
pub const PORTS_CLASS_GUID: &str = "{4d36e978-e325-11ce-bfc1-08002be10318}";

/// A plug-and-play device entry as reported by a device directory
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceRecord {
    /// Instance path (e.g., `USB\VID_0403&PID_6001\A50285BI`)
    pub device_id: String,
    /// Human-readable name (e.g., `USB Serial Port (COM3)`)
    pub name: String,
    /// Caption, usually identical to the name
    pub caption: String,
    /// Driver description
    pub description: String,
    /// Device setup class GUID
    pub class_guid: String,
    /// OS port path, when the backend knows it without parsing the name
    pub port_name: Option<String>,
}

impl DeviceRecord {
    /// Create a record in the serial ports class
    pub fn new(device_id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            device_id: device_id.into(),
            caption: name.clone(),
            description: String::new(),
            class_guid: PORTS_CLASS_GUID.to_string(),
            name,
            port_name: None,
        }
    }

    /// Set the driver description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Attach the OS port path directly
    pub fn with_port_name(mut self, port_name: impl Into<String>) -> Self {
        self.port_name = Some(port_name.into());
        self
    }

    /// Resolve the port label for this device
    ///
    /// A port path supplied by the backend wins; otherwise the label is
    /// parsed out of the display name.
    pub fn port_label(&self) -> Option<String> {
        self.port_name
            .as_deref()
            .filter(|p| !p.is_empty())
            .or_else(|| extract_port_label(&self.name))
            .map(str::to_string)
    }
}

/// Normalized record of a single device add/remove notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    /// Instance path of the device
    pub device_id: String,
    /// Human-readable name
    pub display_name: String,
    /// Caption
    pub caption: String,
    /// Driver description
    pub description: String,
    /// Device setup class GUID
    pub class_guid: String,
    /// Port label, empty if it could not be determined
    pub port_label: String,
}

impl DeviceEvent {
    /// Whether a port label was resolved for this device
    pub fn has_port_label(&self) -> bool {
        !self.port_label.is_empty()
    }
}

impl From<&DeviceRecord> for DeviceEvent {
    fn from(record: &DeviceRecord) -> Self {
        Self {
            device_id: record.device_id.clone(),
            display_name: record.name.clone(),
            caption: record.caption.clone(),
            description: record.description.clone(),
            class_guid: record.class_guid.clone(),
            port_label: record.port_label().unwrap_or_default(),
        }
    }
}

/// Extract a `COMn` port label from a device display name
///
/// Looks for the first parenthesized `(COM<digits>)` token, so
/// `"USB Serial Port (COM3)"` yields `Some("COM3")`. Names without such a
/// token yield `None`.
pub fn extract_port_label(name: &str) -> Option<&str> {
    name.match_indices('(').find_map(|(start, _)| {
        let rest = &name[start + 1..];
        let digits = rest.strip_prefix("COM")?;
        let len = digits.bytes().take_while(u8::is_ascii_digit).count();
        if len > 0 && digits[len..].starts_with(')') {
            Some(&rest[..3 + len])
        } else {
            None
        }
    })
}
