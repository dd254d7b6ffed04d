//! Ordered delivery of controller events
//!
//! Transitions push their events onto a queue while the controller lock is
//! held, so the queue order is the transition order. Delivery happens after
//! the lock is released, by one thread at a time: whichever thread finds no
//! delivery in progress drains the queue, and every other thread hands its
//! events over to it. A listener that calls back into the controller
//! therefore never blocks, and its events are delivered after the event it
//! is handling has reached every listener.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use hotcom_detect::{ListenerId, ListenerRegistry};
use tokio::sync::mpsc;
use tracing::trace;

use crate::events::PortEvent;

#[derive(Default)]
struct Queue {
    pending: VecDeque<PortEvent>,
    /// Thread currently draining the queue
    deliverer: Option<ThreadId>,
    /// Detach listeners once the current drain finishes
    detach_when_idle: bool,
}

pub(crate) struct EventDispatcher {
    queue: Mutex<Queue>,
    idle: Condvar,
    listeners: ListenerRegistry<PortEvent>,
}

impl EventDispatcher {
    pub(crate) fn new() -> Self {
        Self {
            queue: Mutex::new(Queue::default()),
            idle: Condvar::new(),
            listeners: ListenerRegistry::new(),
        }
    }

    /// Queue events for delivery; call with the controller lock held
    pub(crate) fn enqueue(&self, events: impl IntoIterator<Item = PortEvent>) {
        self.lock().pending.extend(events);
    }

    /// Drain the queue on this thread unless a delivery is already running
    pub(crate) fn deliver(&self) {
        {
            let mut queue = self.lock();
            if let Some(deliverer) = queue.deliverer {
                trace!("Handing {} events to {:?}", queue.pending.len(), deliverer);
                return;
            }
            queue.deliverer = Some(thread::current().id());
        }

        loop {
            let next = {
                let mut queue = self.lock();
                match queue.pending.pop_front() {
                    Some(event) => event,
                    None => {
                        queue.deliverer = None;
                        if queue.detach_when_idle {
                            queue.detach_when_idle = false;
                            self.listeners.clear();
                        }
                        self.idle.notify_all();
                        return;
                    }
                }
            };
            self.listeners.emit(&next);
        }
    }

    /// Deliver everything queued, then detach all listeners
    ///
    /// Blocks until a delivery running on another thread has finished. When
    /// called from a listener, detaching is deferred to the end of the
    /// running delivery instead.
    pub(crate) fn shutdown(&self) {
        self.deliver();

        let mut queue = self.lock();
        if queue.deliverer == Some(thread::current().id()) {
            queue.detach_when_idle = true;
            return;
        }
        while queue.deliverer.is_some() {
            queue = self.idle.wait(queue).unwrap_or_else(|e| e.into_inner());
        }
        queue.pending.clear();
        self.listeners.clear();
    }

    pub(crate) fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&PortEvent) + Send + Sync + 'static,
    {
        self.listeners.add(listener)
    }

    pub(crate) fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub(crate) fn channel(&self) -> (ListenerId, mpsc::UnboundedReceiver<PortEvent>) {
        self.listeners.channel()
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::sync::Arc;

    fn opened(port: &str) -> PortEvent {
        PortEvent::Opened {
            port_name: port.to_string(),
        }
    }

    fn closed(port: &str) -> PortEvent {
        PortEvent::Closed {
            port_name: port.to_string(),
        }
    }

    #[test]
    fn test_deliver_in_queue_order() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        dispatcher.subscribe(move |e| sink.lock().unwrap().push(e.clone()));

        dispatcher.enqueue([opened("COM3"), closed("COM3")]);
        dispatcher.deliver();

        assert_eq!(*seen.lock().unwrap(), vec![opened("COM3"), closed("COM3")]);
    }

    #[test]
    fn test_reentrant_events_follow_current_event() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let inner = Arc::downgrade(&dispatcher);
        dispatcher.subscribe(move |e| {
            if let (PortEvent::Opened { .. }, Some(d)) = (e, inner.upgrade()) {
                d.enqueue([closed("COM3")]);
                d.deliver();
            }
        });
        let sink = seen.clone();
        dispatcher.subscribe(move |e| sink.lock().unwrap().push(e.clone()));

        dispatcher.enqueue([opened("COM3")]);
        dispatcher.deliver();

        // The second listener sees Opened before the Closed queued by the first
        assert_eq!(*seen.lock().unwrap(), vec![opened("COM3"), closed("COM3")]);
    }

    #[test]
    fn test_other_thread_hands_off_to_deliverer() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (entered_tx, entered_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);

        let sink = seen.clone();
        dispatcher.subscribe(move |e| {
            if matches!(e, PortEvent::Opened { .. }) {
                entered_tx.send(()).unwrap();
                release_rx.lock().unwrap().recv().unwrap();
            }
            sink.lock().unwrap().push(e.clone());
        });

        let deliverer = {
            let dispatcher = dispatcher.clone();
            thread::spawn(move || {
                dispatcher.enqueue([opened("COM3")]);
                dispatcher.deliver();
            })
        };
        entered_rx.recv().unwrap();

        // Returns immediately; the blocked thread delivers it
        dispatcher.enqueue([closed("COM3")]);
        dispatcher.deliver();
        assert!(seen.lock().unwrap().is_empty());

        release_tx.send(()).unwrap();
        deliverer.join().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![opened("COM3"), closed("COM3")]);
    }

    #[test]
    fn test_shutdown_from_listener_detaches_after_drain() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let inner = Arc::downgrade(&dispatcher);
        dispatcher.subscribe(move |e| {
            if let (PortEvent::Opened { .. }, Some(d)) = (e, inner.upgrade()) {
                d.enqueue([closed("COM3")]);
                d.shutdown();
            }
        });
        let sink = seen.clone();
        dispatcher.subscribe(move |e| sink.lock().unwrap().push(e.clone()));

        dispatcher.enqueue([opened("COM3")]);
        dispatcher.deliver();
        assert_eq!(*seen.lock().unwrap(), vec![opened("COM3"), closed("COM3")]);

        dispatcher.enqueue([opened("COM4")]);
        dispatcher.deliver();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
