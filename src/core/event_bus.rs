//! In-process publish/subscribe keyed by event name.
//!
//! Delivery is synchronous: `emit` returns only after every listener that was
//! subscribed when it started has run. A listener that returns an error or
//! panics is logged and skipped; the remaining listeners still run.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::Result;
use tracing::{error, warn};

/// Default fan-out bound before a warning is logged
pub const DEFAULT_MAX_LISTENERS: usize = 10;

/// A subscriber. Identity is the `Arc` allocation, so keep a clone around to
/// pass to `off` later.
pub type Listener<T> = Arc<dyn Fn(&T) -> Result<()> + Send + Sync>;

/// Generic event bus carrying payloads of type `T`
pub struct EventBus<T> {
    listeners: RwLock<HashMap<String, Vec<Listener<T>>>>,

    /// 0 disables the bound
    max_listeners: usize,

    /// Event names that already triggered the overflow warning
    warned: Mutex<HashSet<String>>,
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventBus<T> {
    pub fn new() -> Self {
        Self::with_max_listeners(DEFAULT_MAX_LISTENERS)
    }

    pub fn with_max_listeners(max_listeners: usize) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            max_listeners,
            warned: Mutex::new(HashSet::new()),
        }
    }

    pub fn max_listeners(&self) -> usize {
        self.max_listeners
    }

    /// Deliver `data` to every listener of `event`, in subscription order.
    ///
    /// Returns whether at least one listener was subscribed.
    pub fn emit(&self, event: &str, data: &T) -> bool {
        // Snapshot so listeners may subscribe/unsubscribe while being called
        let snapshot: Vec<Listener<T>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .cloned()
            .unwrap_or_default();

        if snapshot.is_empty() {
            return false;
        }

        for (index, listener) in snapshot.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(data))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(event, listener = index, error = %e, "Event listener failed");
                }
                Err(payload) => {
                    error!(
                        event,
                        listener = index,
                        panic = %panic_message(payload.as_ref()),
                        "Event listener panicked"
                    );
                }
            }
        }

        true
    }

    /// Subscribe `listener` to `event`. Duplicates are allowed.
    pub fn on(&self, event: &str, listener: Listener<T>) -> &Self {
        let count = {
            let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
            let entry = listeners.entry(event.to_string()).or_default();
            entry.push(listener);
            entry.len()
        };

        if self.max_listeners > 0 && count > self.max_listeners {
            let first_time = self
                .warned
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(event.to_string());
            if first_time {
                warn!(
                    event,
                    count,
                    max = self.max_listeners,
                    "Possible listener leak: more listeners than max_listeners"
                );
            }
        }

        self
    }

    /// Remove one registration of `listener` from `event`. No-op if absent.
    pub fn off(&self, event: &str, listener: &Listener<T>) -> &Self {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(entry) = listeners.get_mut(event) {
            if let Some(pos) = entry.iter().position(|l| Arc::ptr_eq(l, listener)) {
                entry.remove(pos);
            }
            if entry.is_empty() {
                listeners.remove(event);
            }
        }

        self
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Whether this exact `listener` is subscribed to `event`
    pub fn contains(&self, event: &str, listener: &Listener<T>) -> bool {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .is_some_and(|entry| entry.iter().any(|l| Arc::ptr_eq(l, listener)))
    }

    /// Names with at least one listener
    pub fn event_names(&self) -> Vec<String> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn remove_all_listeners(&self) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.warned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop() -> Listener<u32> {
        Arc::new(|_: &u32| -> Result<()> { Ok(()) })
    }

    fn recorder(log: Arc<Mutex<Vec<String>>>, tag: &'static str) -> Listener<u32> {
        Arc::new(move |n: &u32| -> Result<()> {
            log.lock().unwrap().push(format!("{}:{}", tag, n));
            Ok(())
        })
    }

    #[test]
    fn test_emit_without_listeners_returns_false() {
        let bus: EventBus<u32> = EventBus::new();
        assert!(!bus.emit("nobody", &1));
    }

    #[test]
    fn test_emit_delivers_in_subscription_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.on("tick", recorder(log.clone(), "a"))
            .on("tick", recorder(log.clone(), "b"))
            .on("other", recorder(log.clone(), "c"));

        assert!(bus.emit("tick", &7));
        assert_eq!(*log.lock().unwrap(), vec!["a:7", "b:7"]);
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let failing: Listener<u32> = Arc::new(|_: &u32| -> Result<()> { anyhow::bail!("boom") });
        let panicking: Listener<u32> =
            Arc::new(|_: &u32| -> Result<()> { panic!("listener panic") });
        let counter = hits.clone();
        let counting: Listener<u32> = Arc::new(move |_: &u32| -> Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.on("e", failing).on("e", panicking).on("e", counting);

        assert!(bus.emit("e", &0));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_removes_exactly_one_registration() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let listener: Listener<u32> = Arc::new(move |_: &u32| -> Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.on("e", listener.clone()).on("e", listener.clone());
        assert_eq!(bus.listener_count("e"), 2);

        bus.off("e", &listener);
        assert_eq!(bus.listener_count("e"), 1);

        bus.emit("e", &0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_contains_matches_by_identity() {
        let bus = EventBus::new();
        let listener = noop();

        bus.on("e", listener.clone());

        assert!(bus.contains("e", &listener));
        assert!(!bus.contains("other", &listener));
        assert!(!bus.contains("e", &noop()));

        bus.off("e", &listener);
        assert!(!bus.contains("e", &listener));
    }

    #[test]
    fn test_off_unknown_listener_is_noop() {
        let bus = EventBus::new();
        let registered = noop();
        let stranger = noop();

        bus.on("e", registered);
        bus.off("e", &stranger).off("missing", &stranger);

        assert_eq!(bus.listener_count("e"), 1);
    }

    #[test]
    fn test_listener_may_subscribe_during_emit() {
        let bus = Arc::new(EventBus::new());
        let inner_bus = bus.clone();
        let subscribing: Listener<u32> = Arc::new(move |_: &u32| -> Result<()> {
            inner_bus.on("e", noop());
            Ok(())
        });

        bus.on("e", subscribing);
        assert!(bus.emit("e", &0));
        assert_eq!(bus.listener_count("e"), 2);
    }

    #[test]
    fn test_max_listeners_is_a_soft_bound() {
        let bus: EventBus<u32> = EventBus::with_max_listeners(1);
        bus.on("e", noop()).on("e", noop());

        assert_eq!(bus.listener_count("e"), 2);
        assert_eq!(bus.max_listeners(), 1);
    }

    #[test]
    fn test_remove_all_listeners() {
        let bus: EventBus<u32> = EventBus::new();
        bus.on("a", noop()).on("b", noop());
        assert_eq!(bus.event_names().len(), 2);

        bus.remove_all_listeners();
        assert_eq!(bus.listener_count("a"), 0);
        assert!(bus.event_names().is_empty());
    }
}
