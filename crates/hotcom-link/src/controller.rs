//! Port lifecycle controller
//!
//! A [`PortController`] owns one [`PortHandle`] and one [`DeviceWatcher`].
//! Device events from the watcher are filtered through the controller's
//! [`Binding`] and drive the port between `Closed` and `Open`, publishing
//! [`PortEvent`]s along the way.
//!
//! All mutable state (the handle, the bound port name, the auto-connect
//! flag and the disposed flag) lives behind one mutex that is held for the
//! whole of each transition, whether it was triggered by an application
//! thread or by the watcher's notification thread. Events are queued inside
//! the transition and delivered in that order once the mutex is released,
//! so listeners may call back into the controller.

use std::sync::{Arc, Mutex, MutexGuard};

use hotcom_detect::{
    DeviceDirectory, DeviceEvent, DeviceFilter, DeviceWatcher, ListenerId, PortFinder, SystemDirectory, WatcherConfig, WatcherEvent,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::binding::{is_bound_device, resolve_candidates, Binding};
use crate::dispatch::EventDispatcher;
use crate::error::LinkError;
use crate::events::PortEvent;
use crate::port::{PortHandle, PortSettings, SerialHandle};

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Which port to manage
    pub binding: Binding,
    /// Line settings
    #[serde(default)]
    pub settings: PortSettings,
    /// Open automatically when the bound device appears
    #[serde(default)]
    pub auto_connect: bool,
    /// Device watcher settings
    #[serde(default)]
    pub watcher: WatcherConfig,
}

impl ControllerConfig {
    /// Configuration for a fixed port name with default settings
    pub fn fixed(port_name: impl Into<String>) -> Self {
        Self::new(Binding::fixed(port_name))
    }

    /// Configuration for a USB device by VID/PID with default settings
    pub fn vid_pid(vid: impl Into<String>, pid: impl Into<String>) -> Self {
        Self::new(Binding::vid_pid(vid, pid))
    }

    fn new(binding: Binding) -> Self {
        Self {
            binding,
            settings: PortSettings::default(),
            auto_connect: false,
            watcher: WatcherConfig::default(),
        }
    }

    /// Set the line settings
    pub fn with_settings(mut self, settings: PortSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the auto-connect flag
    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }
}

/// Whether the managed port is open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Closed,
    Open,
}

/// State guarded by the controller lock
struct LinkState<P> {
    port: P,
    port_name: String,
    auto_connect: bool,
    disposed: bool,
}

/// State shared with the watcher callback
struct Shared<P> {
    binding: Binding,
    filter: Option<DeviceFilter>,
    settings: PortSettings,
    finder: PortFinder,
    state: Mutex<LinkState<P>>,
    dispatcher: EventDispatcher,
}

/// Hot-plug aware owner of one serial port
pub struct PortController<P: PortHandle> {
    shared: Arc<Shared<P>>,
    watcher: DeviceWatcher,
}

impl PortController<SerialHandle> {
    /// Create a controller over a real serial port and the OS device table
    pub fn system(config: ControllerConfig) -> Result<Self, LinkError> {
        Self::new(config, SerialHandle::new(), Arc::new(SystemDirectory))
    }
}

impl<P: PortHandle + 'static> PortController<P> {
    /// Create a controller and start watching for devices
    ///
    /// The port starts closed. Device events are processed from this point
    /// on, before the port is ever opened.
    pub fn new(
        config: ControllerConfig,
        port: P,
        directory: Arc<dyn DeviceDirectory>,
    ) -> Result<Self, LinkError> {
        let filter = config.binding.device_filter()?;
        config.settings.validate()?;
        let watcher = DeviceWatcher::new(directory.clone(), config.watcher)?;

        let shared = Arc::new(Shared {
            state: Mutex::new(LinkState {
                port,
                port_name: config.binding.initial_port_name(),
                auto_connect: config.auto_connect,
                disposed: false,
            }),
            binding: config.binding,
            filter,
            settings: config.settings,
            finder: PortFinder::new(directory),
            dispatcher: EventDispatcher::new(),
        });

        let weak = Arc::downgrade(&shared);
        watcher.subscribe(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_watcher_event(event);
            }
        });
        watcher.start()?;

        info!("Port controller bound to {:?}", shared.binding);
        Ok(Self { shared, watcher })
    }
}

impl<P: PortHandle> PortController<P> {
    /// Try to open the port; returns false on any failure
    ///
    /// Fixed-name bindings open the configured name. VID/PID bindings query
    /// the device directory and open the first candidate that succeeds,
    /// rebinding the port name to it. An already open port is left alone
    /// and reported as false.
    pub fn try_open(&self) -> Result<bool, LinkError> {
        let opened = {
            let mut state = self.shared.lock();
            if state.disposed {
                return Err(LinkError::Disposed);
            }
            self.shared.open_locked(&mut state)
        };
        self.shared.dispatcher.deliver();
        Ok(opened)
    }

    /// Close the port; a no-op if it is not open
    ///
    /// A close that reports an error still releases the port and publishes
    /// `Closed`; the error is returned afterwards.
    pub fn close(&self) -> Result<(), LinkError> {
        let result = {
            let mut state = self.shared.lock();
            if state.disposed {
                return Err(LinkError::Disposed);
            }
            if !state.port.is_open() {
                return Ok(());
            }
            let result = state.port.close();
            if state.port.is_open() {
                return result;
            }
            debug!("Closed {}", state.port_name);
            self.shared.dispatcher.enqueue([PortEvent::Closed {
                port_name: state.port_name.clone(),
            }]);
            result
        };
        self.shared.dispatcher.deliver();
        result
    }

    /// Close the port, stop watching and detach all listeners; idempotent
    ///
    /// Waits for events still being delivered on other threads, so no
    /// listener runs once this returns (unless called from a listener).
    pub fn dispose(&self) {
        {
            let mut state = self.shared.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;

            if state.port.is_open() {
                if let Err(e) = state.port.close() {
                    warn!("Ignoring close failure during dispose: {}", e);
                }
                if !state.port.is_open() {
                    self.shared.dispatcher.enqueue([PortEvent::Closed {
                        port_name: state.port_name.clone(),
                    }]);
                }
            }
        }

        self.shared.dispatcher.deliver();
        self.watcher.dispose();
        self.shared.dispatcher.shutdown();
        debug!("Port controller disposed");
    }

    /// Scan for device changes now and process them before returning
    pub fn poll_now(&self) -> Result<(), LinkError> {
        if self.is_disposed() {
            return Err(LinkError::Disposed);
        }
        self.watcher.poll_now()?;
        Ok(())
    }

    /// Current state of the port
    pub fn state(&self) -> PortState {
        if self.is_open() {
            PortState::Open
        } else {
            PortState::Closed
        }
    }

    /// Check if the port is open
    pub fn is_open(&self) -> bool {
        self.shared.lock().port.is_open()
    }

    /// Port name the controller is currently bound to
    ///
    /// Empty for a VID/PID binding that has not resolved a device yet.
    pub fn port_name(&self) -> String {
        self.shared.lock().port_name.clone()
    }

    /// The binding policy
    pub fn binding(&self) -> &Binding {
        &self.shared.binding
    }

    /// The line settings
    pub fn settings(&self) -> &PortSettings {
        &self.shared.settings
    }

    /// Check if auto-connect is enabled
    pub fn auto_connect(&self) -> bool {
        self.shared.lock().auto_connect
    }

    /// Enable or disable auto-connect
    pub fn set_auto_connect(&self, auto_connect: bool) {
        self.shared.lock().auto_connect = auto_connect;
    }

    /// Check if the controller has been disposed
    pub fn is_disposed(&self) -> bool {
        self.shared.lock().disposed
    }

    /// Run a closure with exclusive access to the port handle
    ///
    /// Device events wait while the closure runs. The controller lock is
    /// held throughout, so the closure must not call back into this
    /// controller; doing so deadlocks.
    pub fn with_port<R>(&self, f: impl FnOnce(&mut P) -> R) -> Result<R, LinkError> {
        let mut state = self.shared.lock();
        if state.disposed {
            return Err(LinkError::Disposed);
        }
        Ok(f(&mut state.port))
    }

    /// Register a listener for port events
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&PortEvent) + Send + Sync + 'static,
    {
        self.shared.dispatcher.subscribe(listener)
    }

    /// Remove a listener; returns false if it was not registered
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.shared.dispatcher.unsubscribe(id)
    }

    /// Receive port events through an async channel
    pub fn event_stream(&self) -> (ListenerId, mpsc::UnboundedReceiver<PortEvent>) {
        self.shared.dispatcher.channel()
    }
}

impl<P: PortHandle> Drop for PortController<P> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<P: PortHandle> std::fmt::Debug for PortController<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("PortController")
            .field("binding", &self.shared.binding)
            .field("port_name", &state.port_name)
            .field("open", &state.port.is_open())
            .field("auto_connect", &state.auto_connect)
            .field("disposed", &state.disposed)
            .finish()
    }
}

impl<P: PortHandle> Shared<P> {
    fn lock(&self) -> MutexGuard<'_, LinkState<P>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open attempt with the lock held; queues `Opened` on success
    fn open_locked(&self, state: &mut LinkState<P>) -> bool {
        if state.port.is_open() {
            debug!("{} is already open", state.port_name);
            return false;
        }

        let candidates = match &self.filter {
            None => vec![state.port_name.clone()],
            Some(filter) => resolve_candidates(&self.finder, filter),
        };
        if candidates.is_empty() {
            debug!("No candidate ports for {:?}", self.binding);
            return false;
        }

        for candidate in candidates {
            match state.port.open(&candidate, &self.settings) {
                Ok(()) => {
                    if state.port_name != candidate {
                        info!("Rebound from {:?} to {}", state.port_name, candidate);
                        state.port_name = candidate.clone();
                    }
                    info!("Opened {}", candidate);
                    self.dispatcher.enqueue([PortEvent::Opened {
                        port_name: candidate,
                    }]);
                    return true;
                }
                Err(e) => debug!("Could not open {}: {}", candidate, e),
            }
        }
        false
    }

    fn handle_watcher_event(&self, event: &WatcherEvent) {
        {
            let mut state = self.lock();
            if state.disposed {
                return;
            }
            match event {
                WatcherEvent::PortAppeared(device) => self.on_appeared(&mut state, device),
                WatcherEvent::PortDisappeared(device) => self.on_disappeared(&mut state, device),
            }
        }
        self.dispatcher.deliver();
    }

    fn on_appeared(&self, state: &mut LinkState<P>, device: &DeviceEvent) {
        let port_name = match &self.filter {
            None => {
                if device.port_label != state.port_name {
                    return;
                }
                state.port_name.clone()
            }
            Some(filter) => {
                if state.port.is_open() {
                    trace!(
                        "Ignoring {} while {} is open",
                        device.device_id,
                        state.port_name
                    );
                    return;
                }
                // The notification only prompts a fresh query; its own label
                // may belong to any device
                let Some(resolved) = resolve_candidates(&self.finder, filter).into_iter().next()
                else {
                    trace!("No {:?} device present after {}", filter, device.device_id);
                    return;
                };
                if state.port_name != resolved {
                    info!("Bound to {}", resolved);
                    state.port_name = resolved.clone();
                }
                resolved
            }
        };

        info!("Device connected on {}", port_name);
        self.dispatcher.enqueue([PortEvent::Connected { port_name }]);

        if state.auto_connect && !self.open_locked(state) {
            debug!("Auto-connect to {} failed", state.port_name);
        }
    }

    fn on_disappeared(&self, state: &mut LinkState<P>, device: &DeviceEvent) {
        if !is_bound_device(&state.port_name, device) {
            return;
        }

        // Release the OS handle; the link is gone either way
        if state.port.is_open() {
            if let Err(e) = state.port.close() {
                debug!("Close after removal of {} failed: {}", state.port_name, e);
            }
        }

        info!("Device disconnected from {}", state.port_name);
        self.dispatcher.enqueue([
            PortEvent::Disconnected {
                port_name: state.port_name.clone(),
            },
            PortEvent::Closed {
                port_name: state.port_name.clone(),
            },
        ]);
    }
}
