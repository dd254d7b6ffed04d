//! Device presence watcher
//!
//! The watcher owns a notification thread that snapshots the device
//! directory once per poll interval and diffs consecutive snapshots by
//! device instance path. Every removed device is published as
//! [`WatcherEvent::PortDisappeared`] and every new one as
//! [`WatcherEvent::PortAppeared`], in snapshot order, on the notification
//! thread.
//!
//! # Lifecycle
//!
//! - [`DeviceWatcher::start`] fails with `AlreadyWatching` while started.
//! - [`DeviceWatcher::stop`] is a no-op when not watching. Once it returns
//!   no further listener calls are made.
//! - [`DeviceWatcher::dispose`] stops, detaches all listeners and makes
//!   every later `start`/`stop` fail with `Disposed`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc as async_mpsc;
use tracing::{debug, info, trace, warn};

use crate::device::{DeviceEvent, DeviceRecord};
use crate::directory::{DeviceDirectory, SystemDirectory};
use crate::error::DetectError;
use crate::listeners::{ListenerId, ListenerRegistry};

/// Default polling interval in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;

/// Watcher configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Seconds between directory scans (must be at least 1)
    pub poll_interval_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

impl WatcherConfig {
    /// Check the configuration
    pub fn validate(&self) -> Result<(), DetectError> {
        if self.poll_interval_secs < 1 {
            return Err(DetectError::Validation(
                "polling interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Polling interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Event published by the watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherEvent {
    /// A device was attached
    PortAppeared(DeviceEvent),
    /// A device was removed
    PortDisappeared(DeviceEvent),
}

impl WatcherEvent {
    /// The device this event refers to
    pub fn device(&self) -> &DeviceEvent {
        match self {
            WatcherEvent::PortAppeared(device) | WatcherEvent::PortDisappeared(device) => device,
        }
    }

    /// Check if this is an appearance
    pub fn is_appeared(&self) -> bool {
        matches!(self, WatcherEvent::PortAppeared(_))
    }
}

/// Messages to the notification thread
enum Control {
    /// Scan immediately, then acknowledge
    Poll(Sender<()>),
    /// Exit the thread
    Stop,
}

/// A live subscription: the notification thread and its control channel
struct Subscription {
    control: Sender<Control>,
    active: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl Subscription {
    fn is_current_thread(&self) -> bool {
        self.thread.thread().id() == thread::current().id()
    }

    /// Stop the thread and wait for in-flight delivery to finish
    ///
    /// When called from a listener on the notification thread itself the
    /// join is skipped; the thread exits after the current listener returns.
    fn shutdown(self) {
        self.active.store(false, Ordering::SeqCst);
        let _ = self.control.send(Control::Stop);

        if self.is_current_thread() {
            return;
        }
        if self.thread.join().is_err() {
            warn!("Device notification thread panicked");
        }
    }
}

#[derive(Default)]
struct WatchState {
    subscription: Option<Subscription>,
    disposed: bool,
}

/// Watches the device directory for attached and removed serial devices
pub struct DeviceWatcher {
    directory: Arc<dyn DeviceDirectory>,
    config: WatcherConfig,
    listeners: Arc<ListenerRegistry<WatcherEvent>>,
    state: Mutex<WatchState>,
}

impl DeviceWatcher {
    /// Create a stopped watcher over the given directory
    pub fn new(
        directory: Arc<dyn DeviceDirectory>,
        config: WatcherConfig,
    ) -> Result<Self, DetectError> {
        config.validate()?;
        Ok(Self {
            directory,
            config,
            listeners: Arc::new(ListenerRegistry::new()),
            state: Mutex::new(WatchState::default()),
        })
    }

    /// Create a stopped watcher over the OS serial port enumeration
    pub fn system(config: WatcherConfig) -> Result<Self, DetectError> {
        Self::new(Arc::new(SystemDirectory), config)
    }

    /// The watcher's configuration
    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Start watching
    ///
    /// Devices already present when this is called are the baseline and do
    /// not produce events.
    pub fn start(&self) -> Result<(), DetectError> {
        let mut state = self.lock_state();
        if state.disposed {
            return Err(DetectError::Disposed("device watcher"));
        }
        if state.subscription.is_some() {
            return Err(DetectError::AlreadyWatching);
        }

        let baseline = match self.directory.devices() {
            Ok(devices) => Some(devices),
            Err(e) => {
                warn!("Initial device scan failed, deferring baseline: {}", e);
                None
            }
        };

        let (control_tx, control_rx) = mpsc::channel();
        let active = Arc::new(AtomicBool::new(true));
        let poller = Poller {
            directory: self.directory.clone(),
            listeners: self.listeners.clone(),
            active: active.clone(),
            known: baseline,
            interval: self.config.poll_interval(),
        };

        let thread = thread::Builder::new()
            .name("hotcom-watcher".to_string())
            .spawn(move || poller.run(control_rx))?;

        state.subscription = Some(Subscription {
            control: control_tx,
            active,
            thread,
        });
        info!(
            "Watching for serial devices every {}s",
            self.config.poll_interval_secs
        );
        Ok(())
    }

    /// Stop watching; a no-op when not watching
    pub fn stop(&self) -> Result<(), DetectError> {
        let subscription = {
            let mut state = self.lock_state();
            if state.disposed {
                return Err(DetectError::Disposed("device watcher"));
            }
            state.subscription.take()
        };

        if let Some(subscription) = subscription {
            subscription.shutdown();
            info!("Stopped watching for serial devices");
        }
        Ok(())
    }

    /// Scan the directory now and wait until resulting events are delivered
    ///
    /// A no-op when not watching, or when called from a watcher listener.
    pub fn poll_now(&self) -> Result<(), DetectError> {
        let control = {
            let state = self.lock_state();
            if state.disposed {
                return Err(DetectError::Disposed("device watcher"));
            }
            match &state.subscription {
                Some(s) if !s.is_current_thread() => s.control.clone(),
                _ => return Ok(()),
            }
        };

        let (ack_tx, ack_rx) = mpsc::channel();
        if control.send(Control::Poll(ack_tx)).is_ok() {
            // Err means the thread stopped before scanning
            let _ = ack_rx.recv();
        }
        Ok(())
    }

    /// Release the subscription and detach all listeners; idempotent
    pub fn dispose(&self) {
        let subscription = {
            let mut state = self.lock_state();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.subscription.take()
        };

        if let Some(subscription) = subscription {
            subscription.shutdown();
        }
        self.listeners.clear();
        debug!("Device watcher disposed");
    }

    /// Check if the watcher is started
    pub fn is_watching(&self) -> bool {
        self.lock_state().subscription.is_some()
    }

    /// Check if the watcher has been disposed
    pub fn is_disposed(&self) -> bool {
        self.lock_state().disposed
    }

    /// Register a listener, invoked on the notification thread
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&WatcherEvent) + Send + Sync + 'static,
    {
        self.listeners.add(listener)
    }

    /// Remove a listener; returns false if it was not registered
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Receive events through an async channel
    pub fn event_stream(&self) -> (ListenerId, async_mpsc::UnboundedReceiver<WatcherEvent>) {
        self.listeners.channel()
    }

    fn lock_state(&self) -> MutexGuard<'_, WatchState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for DeviceWatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for DeviceWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceWatcher")
            .field("config", &self.config)
            .field("listeners", &self.listeners)
            .field("watching", &self.is_watching())
            .finish()
    }
}

/// State owned by the notification thread
struct Poller {
    directory: Arc<dyn DeviceDirectory>,
    listeners: Arc<ListenerRegistry<WatcherEvent>>,
    active: Arc<AtomicBool>,
    known: Option<Vec<DeviceRecord>>,
    interval: Duration,
}

impl Poller {
    fn run(mut self, control: Receiver<Control>) {
        loop {
            match control.recv_timeout(self.interval) {
                Ok(Control::Poll(ack)) => {
                    self.scan();
                    let _ = ack.send(());
                }
                Err(RecvTimeoutError::Timeout) => self.scan(),
                Ok(Control::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            }
            if !self.active.load(Ordering::SeqCst) {
                break;
            }
        }
        trace!("Device notification thread exiting");
    }

    fn scan(&mut self) {
        let current = match self.directory.devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Device scan failed: {}", e);
                return;
            }
        };

        let Some(known) = self.known.replace(current.clone()) else {
            debug!("Device baseline established ({} devices)", current.len());
            return;
        };

        for event in diff(&known, &current) {
            if !self.active.load(Ordering::SeqCst) {
                return;
            }
            let device = event.device();
            trace!(
                "{} {} ({:?}) -> {:?}",
                if event.is_appeared() { "Appeared" } else { "Disappeared" },
                device.device_id,
                device.display_name,
                device.port_label
            );
            self.listeners.emit(&event);
        }
    }
}

/// Removals from `before` followed by additions in `after`, keyed by device id
fn diff(before: &[DeviceRecord], after: &[DeviceRecord]) -> Vec<WatcherEvent> {
    let before_ids: HashSet<&str> = before.iter().map(|d| d.device_id.as_str()).collect();
    let after_ids: HashSet<&str> = after.iter().map(|d| d.device_id.as_str()).collect();

    let removed = before
        .iter()
        .filter(|d| !after_ids.contains(d.device_id.as_str()))
        .map(|d| WatcherEvent::PortDisappeared(DeviceEvent::from(d)));
    let added = after
        .iter()
        .filter(|d| !before_ids.contains(d.device_id.as_str()))
        .map(|d| WatcherEvent::PortAppeared(DeviceEvent::from(d)));

    removed.chain(added).collect()
}
