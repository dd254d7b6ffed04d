//! Hot-plug Aware Serial Port Controller
//!
//! This crate keeps one serial port usable across USB unplug/replug. A
//! [`PortController`] watches the host's device table, reports when its
//! device comes and goes, and (with auto-connect) reopens the port when the
//! device returns.
//!
//! # Bindings
//!
//! - [`Binding::FixedName`]: manage a known port name (`COM3`).
//! - [`Binding::VidPid`]: follow a USB adapter by vendor/product ID,
//!   whatever port name the OS assigns it this time.
//!
//! # Events
//!
//! Controllers publish [`PortEvent`]s: `Connected`/`Disconnected` when the
//! bound device is attached/removed, `Opened`/`Closed` when the port
//! changes state. Removal of the bound device always yields
//! `Disconnected` followed by `Closed`.
//!
//! # Example
//!
//! ```rust,no_run
//! use hotcom_link::{ControllerConfig, PortController, PortSettings};
//!
//! let config = ControllerConfig::vid_pid("4D43", "4D50")
//!     .with_settings(PortSettings::with_baud_rate(115200))
//!     .with_auto_connect(true);
//!
//! let controller = PortController::system(config).unwrap();
//! controller.subscribe(|event| println!("{}", event));
//!
//! let connected = controller.try_open().unwrap();
//! println!("Connected: {}", connected);
//! ```

pub mod binding;
pub mod controller;
mod dispatch;
pub mod error;
pub mod events;
pub mod port;
pub mod sim;

pub use binding::Binding;
pub use controller::{ControllerConfig, PortController, PortState};
pub use error::LinkError;
pub use events::PortEvent;
pub use port::{DataBits, Parity, PortHandle, PortSettings, SerialHandle, StopBits};
pub use sim::{PortCall, SimulatedPort};

// Re-export detection types used in the public API
pub use hotcom_detect::{
    DeviceDirectory, DeviceEvent, DeviceWatcher, ListenerId, SimulatedDirectory, SystemDirectory,
    WatcherConfig, WatcherEvent,
};
