//! Challenge lifecycle bus: the generic [`EventBus`] fixed to the four
//! `challenge.*` event names, with typed emit/subscribe helpers.
//!
//! One instance is built per process and shared by `Arc` between the CRUD
//! layer (producer of created/updated/deleted) and the orchestration
//! bootstrap (consumer of those three, producer of started).

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::{
    ChallengeCreated, ChallengeDeleted, ChallengeEvent, ChallengeStarted, ChallengeUpdated,
    CHALLENGE_CREATED, CHALLENGE_DELETED, CHALLENGE_STARTED, CHALLENGE_UPDATED,
};

use super::event_bus::{EventBus, Listener};

/// Listener for one concrete challenge event payload
pub type TypedListener<E> = Arc<dyn Fn(&E) -> Result<()> + Send + Sync>;

/// Maps a typed listener to the generic listener installed on its behalf
struct Adapter {
    event: &'static str,
    key: usize,
    wrapped: Listener<ChallengeEvent>,
}

pub struct ChallengeEventBus {
    bus: EventBus<ChallengeEvent>,
    adapters: Mutex<Vec<Adapter>>,
}

impl Default for ChallengeEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChallengeEventBus {
    pub fn new() -> Self {
        Self::with_bus(EventBus::new())
    }

    pub fn with_max_listeners(max_listeners: usize) -> Self {
        Self::with_bus(EventBus::with_max_listeners(max_listeners))
    }

    fn with_bus(bus: EventBus<ChallengeEvent>) -> Self {
        Self {
            bus,
            adapters: Mutex::new(Vec::new()),
        }
    }

    /// The underlying generic bus, for untyped subscribers.
    ///
    /// Typed listeners removed through it are forgotten on the next typed
    /// subscribe or unsubscribe.
    pub fn inner(&self) -> &EventBus<ChallengeEvent> {
        &self.bus
    }

    /// Publish an already-built event under its own name
    pub fn publish(&self, event: &ChallengeEvent) -> bool {
        debug!(event = event.name(), challenge_id = event.challenge_id(), "Publishing");
        self.bus.emit(event.name(), event)
    }

    pub fn emit_challenge_created(&self, challenge_id: &str, start_time: DateTime<Utc>) -> bool {
        self.publish(&ChallengeEvent::Created(ChallengeCreated {
            challenge_id: challenge_id.to_string(),
            start_time,
        }))
    }

    pub fn emit_challenge_updated(
        &self,
        challenge_id: &str,
        start_time: DateTime<Utc>,
        previous_start_time: Option<DateTime<Utc>>,
    ) -> bool {
        self.publish(&ChallengeEvent::Updated(ChallengeUpdated {
            challenge_id: challenge_id.to_string(),
            start_time,
            previous_start_time,
        }))
    }

    pub fn emit_challenge_deleted(&self, challenge_id: &str) -> bool {
        self.publish(&ChallengeEvent::Deleted(ChallengeDeleted {
            challenge_id: challenge_id.to_string(),
        }))
    }

    pub fn emit_challenge_started(&self, challenge_id: &str, start_time: DateTime<Utc>) -> bool {
        self.publish(&ChallengeEvent::Started(ChallengeStarted {
            challenge_id: challenge_id.to_string(),
            start_time,
        }))
    }

    pub fn on_challenge_created(&self, listener: TypedListener<ChallengeCreated>) -> &Self {
        self.subscribe(CHALLENGE_CREATED, listener, as_created)
    }

    pub fn on_challenge_updated(&self, listener: TypedListener<ChallengeUpdated>) -> &Self {
        self.subscribe(CHALLENGE_UPDATED, listener, as_updated)
    }

    pub fn on_challenge_deleted(&self, listener: TypedListener<ChallengeDeleted>) -> &Self {
        self.subscribe(CHALLENGE_DELETED, listener, as_deleted)
    }

    pub fn on_challenge_started(&self, listener: TypedListener<ChallengeStarted>) -> &Self {
        self.subscribe(CHALLENGE_STARTED, listener, as_started)
    }

    pub fn off_challenge_created(&self, listener: &TypedListener<ChallengeCreated>) -> &Self {
        self.unsubscribe(CHALLENGE_CREATED, listener)
    }

    pub fn off_challenge_updated(&self, listener: &TypedListener<ChallengeUpdated>) -> &Self {
        self.unsubscribe(CHALLENGE_UPDATED, listener)
    }

    pub fn off_challenge_deleted(&self, listener: &TypedListener<ChallengeDeleted>) -> &Self {
        self.unsubscribe(CHALLENGE_DELETED, listener)
    }

    pub fn off_challenge_started(&self, listener: &TypedListener<ChallengeStarted>) -> &Self {
        self.unsubscribe(CHALLENGE_STARTED, listener)
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.bus.listener_count(event)
    }

    /// Drop every listener, typed or not. Tests call this between cases.
    pub fn remove_all_listeners(&self) {
        self.adapters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.bus.remove_all_listeners();
    }

    fn subscribe<E: 'static>(
        &self,
        event: &'static str,
        listener: TypedListener<E>,
        project: fn(&ChallengeEvent) -> Option<&E>,
    ) -> &Self {
        let key = listener_key(&listener);
        let wrapped: Listener<ChallengeEvent> =
            Arc::new(move |payload: &ChallengeEvent| -> Result<()> {
                match project(payload) {
                    Some(typed) => listener(typed),
                    None => Ok(()),
                }
            });

        {
            let mut adapters = self.adapters.lock().unwrap_or_else(PoisonError::into_inner);
            self.prune_stale(&mut adapters);
            adapters.push(Adapter {
                event,
                key,
                wrapped: wrapped.clone(),
            });
        }
        self.bus.on(event, wrapped);
        self
    }

    fn unsubscribe<E: 'static>(&self, event: &'static str, listener: &TypedListener<E>) -> &Self {
        let key = listener_key(listener);
        let wrapped = {
            let mut adapters = self.adapters.lock().unwrap_or_else(PoisonError::into_inner);
            self.prune_stale(&mut adapters);
            adapters
                .iter()
                .position(|a| a.event == event && a.key == key)
                .map(|pos| adapters.remove(pos).wrapped)
        };

        if let Some(wrapped) = wrapped {
            self.bus.off(event, &wrapped);
        }
        self
    }

    /// Drop adapters whose wrapped listener was removed behind our back
    fn prune_stale(&self, adapters: &mut Vec<Adapter>) {
        let before = adapters.len();
        adapters.retain(|a| self.bus.contains(a.event, &a.wrapped));

        let pruned = before - adapters.len();
        if pruned > 0 {
            debug!(pruned, "Dropped adapters for listeners removed from the inner bus");
        }
    }
}

/// Allocation address of a typed listener. Stable while the adapter holds a
/// clone of it.
fn listener_key<E: 'static>(listener: &TypedListener<E>) -> usize {
    Arc::as_ptr(listener) as *const () as usize
}

fn as_created(event: &ChallengeEvent) -> Option<&ChallengeCreated> {
    match event {
        ChallengeEvent::Created(e) => Some(e),
        _ => None,
    }
}

fn as_updated(event: &ChallengeEvent) -> Option<&ChallengeUpdated> {
    match event {
        ChallengeEvent::Updated(e) => Some(e),
        _ => None,
    }
}

fn as_deleted(event: &ChallengeEvent) -> Option<&ChallengeDeleted> {
    match event {
        ChallengeEvent::Deleted(e) => Some(e),
        _ => None,
    }
}

fn as_started(event: &ChallengeEvent) -> Option<&ChallengeStarted> {
    match event {
        ChallengeEvent::Started(e) => Some(e),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_listener_receives_payload() {
        let bus = ChallengeEventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        bus.on_challenge_created(Arc::new(move |e: &ChallengeCreated| -> Result<()> {
            sink.lock().unwrap().push(e.challenge_id.clone());
            Ok(())
        }));

        assert!(bus.emit_challenge_created("c1", Utc::now()));
        assert!(!bus.emit_challenge_deleted("c1"));
        assert_eq!(*seen.lock().unwrap(), vec!["c1".to_string()]);
    }

    #[test]
    fn test_typed_off_removes_wrapped_listener() {
        let bus = ChallengeEventBus::new();
        let listener: TypedListener<ChallengeStarted> =
            Arc::new(|_: &ChallengeStarted| -> Result<()> { Ok(()) });

        bus.on_challenge_started(listener.clone())
            .on_challenge_started(listener.clone());
        assert_eq!(bus.listener_count(CHALLENGE_STARTED), 2);

        bus.off_challenge_started(&listener);
        assert_eq!(bus.listener_count(CHALLENGE_STARTED), 1);

        bus.off_challenge_started(&listener).off_challenge_started(&listener);
        assert_eq!(bus.listener_count(CHALLENGE_STARTED), 0);
    }

    #[test]
    fn test_off_with_wrong_event_is_noop() {
        let bus = ChallengeEventBus::new();
        let listener: TypedListener<ChallengeDeleted> =
            Arc::new(|_: &ChallengeDeleted| -> Result<()> { Ok(()) });

        bus.on_challenge_deleted(listener.clone());
        bus.unsubscribe(CHALLENGE_CREATED, &listener);

        assert_eq!(bus.listener_count(CHALLENGE_DELETED), 1);
    }

    #[test]
    fn test_remove_all_listeners_clears_typed_and_untyped() {
        let bus = ChallengeEventBus::new();
        bus.on_challenge_updated(Arc::new(|_: &ChallengeUpdated| -> Result<()> { Ok(()) }));
        bus.inner().on(
            CHALLENGE_UPDATED,
            Arc::new(|_: &ChallengeEvent| -> Result<()> { Ok(()) }),
        );
        assert_eq!(bus.listener_count(CHALLENGE_UPDATED), 2);

        bus.remove_all_listeners();
        assert_eq!(bus.listener_count(CHALLENGE_UPDATED), 0);
        assert!(!bus.emit_challenge_updated("c1", Utc::now(), None));
    }

    #[test]
    fn test_clearing_inner_bus_releases_typed_listeners() {
        let bus = ChallengeEventBus::new();
        let listener: TypedListener<ChallengeCreated> =
            Arc::new(|_: &ChallengeCreated| -> Result<()> { Ok(()) });

        bus.on_challenge_created(listener.clone());
        assert_eq!(Arc::strong_count(&listener), 2);

        bus.inner().remove_all_listeners();
        bus.on_challenge_deleted(Arc::new(|_: &ChallengeDeleted| -> Result<()> { Ok(()) }));

        assert_eq!(bus.adapters.lock().unwrap().len(), 1);
        assert_eq!(Arc::strong_count(&listener), 1);
    }

    #[test]
    fn test_off_after_inner_removal_is_noop() {
        let bus = ChallengeEventBus::new();
        let listener: TypedListener<ChallengeStarted> =
            Arc::new(|_: &ChallengeStarted| -> Result<()> { Ok(()) });

        bus.on_challenge_started(listener.clone());
        bus.inner().remove_all_listeners();
        bus.off_challenge_started(&listener);

        assert!(bus.adapters.lock().unwrap().is_empty());
        assert_eq!(bus.listener_count(CHALLENGE_STARTED), 0);
    }
}
