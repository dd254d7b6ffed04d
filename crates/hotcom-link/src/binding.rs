//! Binding policies
//!
//! A [`Binding`] decides which device events a controller reacts to and
//! which port names it tries when opening.
//!
//! - `FixedName`: the controller owns one port name for life and reacts to
//!   devices exposing exactly that label.
//! - `VidPid`: the controller follows a USB device by vendor/product ID.
//!   Device events do not carry VID/PID, so the concrete port label is
//!   always re-resolved with a fresh directory query.

use hotcom_detect::{DeviceEvent, DeviceFilter, PortFinder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::LinkError;

/// Rule binding a controller to a port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Binding {
    /// A fixed port name such as `COM3` or `/dev/ttyUSB0`
    FixedName {
        /// Port name
        port_name: String,
    },
    /// Whatever port a USB device with this VID/PID exposes
    VidPid {
        /// USB vendor ID as hex (e.g., `"0403"`)
        vid: String,
        /// USB product ID as hex (e.g., `"6001"`)
        pid: String,
    },
}

impl Binding {
    /// Bind to a fixed port name
    pub fn fixed(port_name: impl Into<String>) -> Self {
        Binding::FixedName {
            port_name: port_name.into(),
        }
    }

    /// Bind to a USB device by vendor and product ID
    pub fn vid_pid(vid: impl Into<String>, pid: impl Into<String>) -> Self {
        Binding::VidPid {
            vid: vid.into(),
            pid: pid.into(),
        }
    }

    /// Validate the binding and build its device filter
    ///
    /// Returns `None` for fixed-name bindings, which never query.
    pub fn device_filter(&self) -> Result<Option<DeviceFilter>, LinkError> {
        match self {
            Binding::FixedName { port_name } => {
                if port_name.trim().is_empty() {
                    return Err(LinkError::Validation(
                        "port name cannot be empty".to_string(),
                    ));
                }
                Ok(None)
            }
            Binding::VidPid { vid, pid } => Ok(Some(DeviceFilter::vid_and_pid(vid, pid)?)),
        }
    }

    /// Port name a new controller starts bound to
    ///
    /// VID/PID bindings start unbound until a device is resolved.
    pub fn initial_port_name(&self) -> String {
        match self {
            Binding::FixedName { port_name } => port_name.clone(),
            Binding::VidPid { .. } => String::new(),
        }
    }
}

/// Resolve the ports a VID/PID binding may open, in directory order
///
/// A failed query is reported as no candidates.
pub(crate) fn resolve_candidates(finder: &PortFinder, filter: &DeviceFilter) -> Vec<String> {
    match finder.find(filter) {
        Ok(ports) => ports,
        Err(e) => {
            warn!("Could not resolve ports for {:?}: {}", filter, e);
            Vec::new()
        }
    }
}

/// Whether a removed device is the one the controller is bound to
pub(crate) fn is_bound_device(bound_name: &str, device: &DeviceEvent) -> bool {
    !bound_name.is_empty() && device.port_label == bound_name
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotcom_detect::DeviceRecord;
    use proptest::prelude::*;

    fn event(name: &str) -> DeviceEvent {
        DeviceEvent::from(&DeviceRecord::new(r"USB\VID_4D43&PID_4D50\1", name))
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            Binding::fixed("").device_filter(),
            Err(LinkError::Validation(_))
        ));
        assert!(matches!(
            Binding::vid_pid("", "4D50").device_filter(),
            Err(LinkError::Validation(_))
        ));
        assert!(matches!(
            Binding::vid_pid("4D43", " ").device_filter(),
            Err(LinkError::Validation(_))
        ));
        assert!(Binding::fixed("COM3").device_filter().unwrap().is_none());
        assert!(Binding::vid_pid("4D43", "4D50")
            .device_filter()
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_initial_port_name() {
        assert_eq!(Binding::fixed("COM3").initial_port_name(), "COM3");
        assert_eq!(Binding::vid_pid("4D43", "4D50").initial_port_name(), "");
    }

    #[test]
    fn test_is_bound_device() {
        assert!(is_bound_device("COM3", &event("Dev (COM3)")));
        assert!(!is_bound_device("COM3", &event("Dev (COM4)")));
        assert!(!is_bound_device("", &event("Dev")));
    }

    #[test]
    fn test_serde_representation() {
        let binding: Binding =
            serde_json::from_str(r#"{"type":"vid_pid","vid":"4D43","pid":"4D50"}"#).unwrap();
        assert_eq!(binding, Binding::vid_pid("4D43", "4D50"));

        let json = serde_json::to_string(&Binding::fixed("COM3")).unwrap();
        assert_eq!(json, r#"{"type":"fixed_name","port_name":"COM3"}"#);
    }

    proptest! {
        #[test]
        fn bound_device_matches_only_its_own_label(bound in 0u32..50, seen in 0u32..50) {
            let bound_name = format!("COM{bound}");
            let device = event(&format!("Dev (COM{seen})"));

            prop_assert_eq!(is_bound_device(&bound_name, &device), bound == seen);
            prop_assert!(!is_bound_device("", &device));
        }
    }
}
