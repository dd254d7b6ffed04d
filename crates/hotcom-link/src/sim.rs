//! Simulated port handle
//!
//! [`SimulatedPort`] is cheaply cloneable; clones share state, so a test
//! can hand one clone to a controller and inspect the other.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::LinkError;
use crate::port::{PortHandle, PortSettings};

/// A call made against a simulated port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortCall {
    /// Successful open
    Open(String),
    /// Rejected open
    OpenFailed(String),
    /// Close of an open port
    Close(String),
    /// Close that released the port but reported an error
    CloseFailed(String),
}

#[derive(Debug, Default)]
struct SimPortState {
    open: Option<String>,
    settings: Option<PortSettings>,
    unavailable: HashSet<String>,
    fail_all: bool,
    fail_close: bool,
    calls: Vec<PortCall>,
}

/// In-memory port handle with scriptable open failures
#[derive(Debug, Clone, Default)]
pub struct SimulatedPort {
    state: Arc<Mutex<SimPortState>>,
}

impl SimulatedPort {
    /// Create a closed port on which every open succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Make opens of a specific port name fail (busy, permission denied)
    pub fn set_unavailable(&self, port_name: &str, unavailable: bool) {
        let mut state = self.lock();
        if unavailable {
            state.unavailable.insert(port_name.to_string());
        } else {
            state.unavailable.remove(port_name);
        }
    }

    /// Make every open fail
    pub fn set_fail_all(&self, fail: bool) {
        self.lock().fail_all = fail;
    }

    /// Make closes report an error; the port is still released
    pub fn set_fail_close(&self, fail: bool) {
        self.lock().fail_close = fail;
    }

    /// Mark the port closed without a close call, as after an abrupt unplug
    pub fn simulate_drop(&self) {
        self.lock().open = None;
    }

    /// Name of the currently open port
    pub fn open_port(&self) -> Option<String> {
        self.lock().open.clone()
    }

    /// Settings used by the most recent successful open
    pub fn last_settings(&self) -> Option<PortSettings> {
        self.lock().settings.clone()
    }

    /// All calls made so far
    pub fn calls(&self) -> Vec<PortCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SimPortState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PortHandle for SimulatedPort {
    fn open(&mut self, port_name: &str, settings: &PortSettings) -> Result<(), LinkError> {
        let mut state = self.lock();

        let reason = if state.open.is_some() {
            Some("handle is already open")
        } else if state.fail_all || state.unavailable.contains(port_name) {
            Some("access denied")
        } else {
            None
        };
        if let Some(reason) = reason {
            state.calls.push(PortCall::OpenFailed(port_name.to_string()));
            return Err(LinkError::OpenFailed {
                port: port_name.to_string(),
                reason: reason.to_string(),
            });
        }

        debug!("Simulated open: {}", port_name);
        state.open = Some(port_name.to_string());
        state.settings = Some(settings.clone());
        state.calls.push(PortCall::Open(port_name.to_string()));
        Ok(())
    }

    fn close(&mut self) -> Result<(), LinkError> {
        let mut state = self.lock();
        let Some(name) = state.open.take() else {
            return Ok(());
        };
        if state.fail_close {
            state.calls.push(PortCall::CloseFailed(name.clone()));
            return Err(LinkError::CloseFailed {
                port: name,
                reason: "write timed out".to_string(),
            });
        }
        debug!("Simulated close: {}", name);
        state.calls.push(PortCall::Close(name));
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.lock().open.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let shared = SimulatedPort::new();
        let mut port = shared.clone();

        port.open("COM3", &PortSettings::default()).unwrap();
        assert_eq!(shared.open_port().as_deref(), Some("COM3"));

        assert!(port.open("COM4", &PortSettings::default()).is_err());
        port.close().unwrap();
        assert_eq!(
            shared.calls(),
            vec![
                PortCall::Open("COM3".into()),
                PortCall::OpenFailed("COM4".into()),
                PortCall::Close("COM3".into()),
            ]
        );
    }

    #[test]
    fn test_failed_close_still_releases() {
        let mut port = SimulatedPort::new();
        port.set_fail_close(true);
        port.open("COM3", &PortSettings::default()).unwrap();

        assert!(matches!(port.close(), Err(LinkError::CloseFailed { .. })));
        assert!(!port.is_open());
        assert_eq!(port.calls().last(), Some(&PortCall::CloseFailed("COM3".into())));
        assert!(port.close().is_ok());
    }

    #[test]
    fn test_unavailable_port() {
        let mut port = SimulatedPort::new();
        port.set_unavailable("COM3", true);

        assert!(matches!(
            port.open("COM3", &PortSettings::default()),
            Err(LinkError::OpenFailed { .. })
        ));
        port.set_unavailable("COM3", false);
        assert!(port.open("COM3", &PortSettings::default()).is_ok());
    }
}
