//! Simulated device directory
//!
//! Lets tests and demos plug and unplug devices without hardware. Records
//! created by [`SimulatedDirectory::plug_usb`] carry no backend port path,
//! so their labels come from parsing the display name.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::device::DeviceRecord;
use crate::directory::DeviceDirectory;
use crate::error::DetectError;

/// In-memory device table
#[derive(Debug, Default)]
pub struct SimulatedDirectory {
    devices: Mutex<Vec<DeviceRecord>>,
    fail_queries: AtomicBool,
    next_serial: AtomicU32,
}

impl SimulatedDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device
    pub fn plug(&self, record: DeviceRecord) {
        debug!("Simulated plug: {} ({})", record.device_id, record.name);
        self.lock().push(record);
    }

    /// Attach a USB-to-serial adapter exposed as the given port
    pub fn plug_usb(&self, vid: &str, pid: &str, port: &str) -> DeviceRecord {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let record = DeviceRecord::new(
            format!("USB\\VID_{vid}&PID_{pid}\\SIM{serial:04}"),
            format!("USB Serial Device ({port})"),
        )
        .with_description("USB Serial Device");
        self.plug(record.clone());
        record
    }

    /// Detach a device by instance path; returns false if it was not present
    pub fn unplug(&self, device_id: &str) -> bool {
        let mut devices = self.lock();
        let before = devices.len();
        devices.retain(|d| d.device_id != device_id);
        debug!("Simulated unplug: {}", device_id);
        devices.len() != before
    }

    /// Detach every device exposing the given port label
    pub fn unplug_port(&self, port: &str) -> bool {
        let mut devices = self.lock();
        let before = devices.len();
        devices.retain(|d| d.port_label().as_deref() != Some(port));
        devices.len() != before
    }

    /// Make subsequent queries fail with `QueryFailed`
    pub fn set_query_failure(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DeviceRecord>> {
        self.devices.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DeviceDirectory for SimulatedDirectory {
    fn devices(&self) -> Result<Vec<DeviceRecord>, DetectError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(DetectError::QueryFailed(
                "simulated directory unavailable".to_string(),
            ));
        }
        Ok(self.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plug_and_unplug() {
        let directory = SimulatedDirectory::new();
        let a = directory.plug_usb("0403", "6001", "COM3");
        directory.plug_usb("0403", "6001", "COM4");

        assert_ne!(a.device_id, directory.devices().unwrap()[1].device_id);
        assert!(directory.unplug(&a.device_id));
        assert!(!directory.unplug(&a.device_id));
        assert!(directory.unplug_port("COM4"));
        assert!(directory.devices().unwrap().is_empty());
    }
}
