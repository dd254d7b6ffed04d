//! Serial Device Detection Library
//!
//! This crate answers two questions about USB-to-serial devices: which
//! ports are attached right now, and when do they come and go.
//!
//! - [`PortFinder`] queries a [`DeviceDirectory`] by USB vendor/product ID
//!   and returns port labels (`COM5`, `/dev/ttyUSB0`).
//! - [`DeviceWatcher`] polls the directory on its own notification thread
//!   and publishes [`WatcherEvent::PortAppeared`] /
//!   [`WatcherEvent::PortDisappeared`] to registered listeners.
//!
//! # Example
//!
//! ```rust,no_run
//! use hotcom_detect::{DeviceWatcher, PortFinder, WatcherConfig, WatcherEvent};
//!
//! let finder = PortFinder::system();
//! for port in finder.find_by_vid_and_pid("0403", "6001").unwrap() {
//!     println!("FTDI adapter on {}", port);
//! }
//!
//! let watcher = DeviceWatcher::system(WatcherConfig::default()).unwrap();
//! watcher.subscribe(|event| match event {
//!     WatcherEvent::PortAppeared(d) => println!("+ {}", d.port_label),
//!     WatcherEvent::PortDisappeared(d) => println!("- {}", d.port_label),
//! });
//! watcher.start().unwrap();
//! ```

pub mod device;
pub mod directory;
pub mod error;
pub mod listeners;
pub mod sim;
pub mod watcher;

pub use device::{extract_port_label, DeviceEvent, DeviceRecord, PORTS_CLASS_GUID};
pub use directory::{DeviceDirectory, DeviceFilter, PortFinder, SystemDirectory};
pub use error::DetectError;
pub use listeners::{ListenerId, ListenerRegistry};
pub use sim::SimulatedDirectory;
pub use watcher::{DeviceWatcher, WatcherConfig, WatcherEvent, DEFAULT_POLL_INTERVAL_SECS};
