//! Port lifecycle events
//!
//! Every event a controller publishes carries the port name it refers to.
//! Listeners see events in the order the transitions producing them took
//! place, even across threads. Delivery happens after the controller's
//! state lock has been released, so listeners may call back into the
//! controller.

use std::fmt;

/// Event published by a port controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// A device for the bound port was attached
    Connected {
        /// Port the device exposes
        port_name: String,
    },

    /// The device for the bound port was removed
    Disconnected {
        /// Port that went away
        port_name: String,
    },

    /// The port was opened
    Opened {
        /// Port that was opened
        port_name: String,
    },

    /// The port was closed
    Closed {
        /// Port that was closed
        port_name: String,
    },
}

impl PortEvent {
    /// The port this event refers to
    pub fn port_name(&self) -> &str {
        match self {
            PortEvent::Connected { port_name }
            | PortEvent::Disconnected { port_name }
            | PortEvent::Opened { port_name }
            | PortEvent::Closed { port_name } => port_name,
        }
    }

    /// Check if this is a device presence event (connected/disconnected)
    pub fn is_presence(&self) -> bool {
        matches!(
            self,
            PortEvent::Connected { .. } | PortEvent::Disconnected { .. }
        )
    }

    /// Short verb describing the event
    pub fn verb(&self) -> &'static str {
        match self {
            PortEvent::Connected { .. } => "connected",
            PortEvent::Disconnected { .. } => "disconnected",
            PortEvent::Opened { .. } => "opened",
            PortEvent::Closed { .. } => "closed",
        }
    }
}

impl fmt::Display for PortEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Port {} {}.", self.port_name(), self.verb())
    }
}
