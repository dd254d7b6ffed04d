//! Listener registries for event fan-out
//!
//! Each registration gets its own [`ListenerId`], so the same closure can be
//! registered twice and removed independently.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

/// Handle identifying one listener registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Get the raw handle value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Returns false once the listener should be dropped
type Listener<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Ordered set of listeners for one event type
pub struct ListenerRegistry<E> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener<E>)>>,
}

impl<E> ListenerRegistry<E> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener; listeners run in registration order
    pub fn add<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.insert(Arc::new(move |event: &E| {
            listener(event);
            true
        }))
    }

    fn insert(&self, listener: Listener<E>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, listener));
        id
    }

    /// Remove a listener by handle; returns false if it was not registered
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Detach every listener
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if no listeners are registered
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Invoke every listener synchronously on the calling thread
    ///
    /// The listener list is snapshotted first, so listeners may register or
    /// remove listeners (including themselves) while being invoked.
    pub fn emit(&self, event: &E) {
        let snapshot = self.lock().clone();
        let mut dropped = Vec::new();
        for (id, listener) in snapshot {
            if !listener(event) {
                dropped.push(id);
            }
        }
        if !dropped.is_empty() {
            self.lock().retain(|(id, _)| !dropped.contains(id));
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(ListenerId, Listener<E>)>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<E: Clone + Send + 'static> ListenerRegistry<E> {
    /// Register a listener that forwards every event into an async channel
    ///
    /// The forwarding listener stays registered until removed with the
    /// returned id, until the registry is cleared, or until the first event
    /// emitted after the receiver is dropped.
    pub fn channel(&self) -> (ListenerId, mpsc::UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.insert(Arc::new(move |event: &E| tx.send(event.clone()).is_ok()));
        (id, rx)
    }
}

impl<E> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for ListenerRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_in_registration_order() {
        let registry = ListenerRegistry::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b"] {
            let seen = seen.clone();
            registry.add(move |n: &u32| seen.lock().unwrap().push(format!("{tag}{n}")));
        }
        registry.emit(&1);

        assert_eq!(*seen.lock().unwrap(), vec!["a1", "b1"]);
    }

    #[test]
    fn test_duplicate_listeners_removed_by_handle() {
        let registry = ListenerRegistry::<u32>::new();
        let count = Arc::new(AtomicU64::new(0));

        let make = |count: Arc<AtomicU64>| {
            move |_: &u32| {
                count.fetch_add(1, Ordering::SeqCst);
            }
        };
        let first = registry.add(make(count.clone()));
        let second = registry.add(make(count.clone()));
        assert_ne!(first, second);
        assert!(second.as_u64() > first.as_u64());

        assert!(registry.remove(first));
        assert!(!registry.remove(first));
        registry.emit(&0);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_listener_can_unsubscribe_itself() {
        let registry = Arc::new(ListenerRegistry::<u32>::new());
        let id_slot = Arc::new(Mutex::new(None::<ListenerId>));

        let id = {
            let inner = registry.clone();
            let id_slot = id_slot.clone();
            registry.add(move |_: &u32| {
                if let Some(id) = *id_slot.lock().unwrap() {
                    inner.remove(id);
                }
            })
        };
        *id_slot.lock().unwrap() = Some(id);

        registry.emit(&0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_channel_forwards_events() {
        let registry = ListenerRegistry::<u32>::new();
        let (id, mut rx) = registry.channel();

        registry.emit(&7);
        assert_eq!(rx.recv().await, Some(7));

        registry.remove(id);
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_channel_listener_dropped_with_receiver() {
        let registry = ListenerRegistry::<u32>::new();
        let (_id, rx) = registry.channel();
        let (_kept, _rx) = registry.channel();
        assert_eq!(registry.len(), 2);

        drop(rx);
        registry.emit(&1);

        assert_eq!(registry.len(), 1);
    }
}
