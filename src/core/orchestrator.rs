//! Challenge orchestrator.
//!
//! Composes the registry (what challenges exist and when they start) with
//! the dispatcher (which of them have a live timer), and supplies the default
//! notifier that publishes `challenge.started` when a timer fires.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::adapters::ChallengeSource;
use crate::domain::OrchestratorEntry;

use super::challenge_bus::ChallengeEventBus;
use super::clock::{Clock, SystemClock};
use super::dispatcher::{ChallengeDispatcher, FireCallback};
use super::registry::{ChallengeRegistry, RegistryError};

/// Outcome of a full load-and-schedule pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    /// Challenges read from the store
    pub loaded: usize,

    /// Challenges that got a new timer
    pub scheduled: usize,
}

impl LoadSummary {
    /// Loaded challenges that were already due and fired during the load
    pub fn past_due(&self) -> usize {
        self.loaded.saturating_sub(self.scheduled)
    }
}

#[derive(Debug, Default)]
struct Armed {
    scheduled: usize,
    fired: usize,
}

/// Main challenge orchestrator
pub struct Orchestrator {
    registry: ChallengeRegistry,
    dispatcher: ChallengeDispatcher,
    clock: Arc<dyn Clock>,

    /// Where the default notifier publishes; logs only when unset
    event_bus: Option<Arc<ChallengeEventBus>>,
}

impl Orchestrator {
    /// Create an orchestrator on the system clock with no event bus
    pub fn new(source: Arc<dyn ChallengeSource>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            registry: ChallengeRegistry::new(source),
            dispatcher: ChallengeDispatcher::new(clock.clone()),
            clock,
            event_bus: None,
        }
    }

    /// Replace the clock. Call before anything is scheduled.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.dispatcher = ChallengeDispatcher::new(clock.clone());
        self.clock = clock;
        self
    }

    /// Publish `challenge.started` on `bus` when a timer fires
    pub fn with_event_bus(mut self, bus: Arc<ChallengeEventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn event_bus(&self) -> Option<&Arc<ChallengeEventBus>> {
        self.event_bus.as_ref()
    }

    /// Built-in notifier: publish `challenge.started`, or log if no bus
    pub fn default_callback(&self) -> FireCallback {
        let bus = self.event_bus.clone();
        Arc::new(move |challenge_id: &str, start_time: DateTime<Utc>| match &bus {
            Some(bus) => {
                let delivered = bus.emit_challenge_started(challenge_id, start_time);
                debug!(challenge_id, delivered, "Published challenge.started");
            }
            None => {
                info!(challenge_id, %start_time, "Challenge started");
            }
        })
    }

    /// Record a start time. Does not touch scheduling.
    pub fn upsert(&self, challenge_id: &str, start_time: DateTime<Utc>) {
        self.registry.upsert(challenge_id, start_time);
    }

    /// Arm a timer for the challenge (or fire now if due).
    ///
    /// Returns `false` if one is already armed.
    pub fn register_scheduled_callback(
        &self,
        challenge_id: &str,
        start_time: DateTime<Utc>,
        callback: Option<FireCallback>,
    ) -> bool {
        let callback = callback.unwrap_or_else(|| self.default_callback());
        self.dispatcher.register(challenge_id, start_time, callback)
    }

    pub fn cancel_scheduled_callback(&self, challenge_id: &str) -> bool {
        self.dispatcher.cancel(challenge_id)
    }

    /// Cancel any timer and drop the registry entry.
    ///
    /// Returns whether the registry knew the challenge.
    pub fn remove(&self, challenge_id: &str) -> bool {
        self.dispatcher.cancel(challenge_id);
        self.registry.remove(challenge_id)
    }

    /// Cancel every timer, then reload the registry from the store.
    ///
    /// On a store failure the timers stay cleared and the registry keeps its
    /// previous contents; the error is returned to the caller.
    #[instrument(skip(self))]
    pub async fn reset_registry(&self) -> Result<usize, RegistryError> {
        self.dispatcher.clear();
        self.registry.load_all().await
    }

    /// Arm timers for every registry entry that is strictly in the future
    /// and not already scheduled. Returns how many were newly armed.
    pub fn schedule_all_future_challenges(&self, callback: Option<FireCallback>) -> usize {
        let callback = callback.unwrap_or_else(|| self.default_callback());
        self.arm_registry(&callback, |_| false).scheduled
    }

    /// Startup load: `reset_registry`, then fire every loaded challenge that
    /// is already due and arm timers for the rest.
    ///
    /// `scheduled` counts armed timers only; `past_due()` is what fired.
    #[instrument(skip(self, callback))]
    pub async fn load_and_schedule_all(
        &self,
        callback: Option<FireCallback>,
    ) -> Result<LoadSummary, RegistryError> {
        let callback = callback.unwrap_or_else(|| self.default_callback());
        let loaded = self.reset_registry().await?;
        let armed = self.arm_registry(&callback, |_| true);

        debug!(fired = armed.fired, scheduled = armed.scheduled, "Registry armed");
        Ok(LoadSummary {
            loaded,
            scheduled: armed.scheduled,
        })
    }

    /// Periodic reload for a running process.
    ///
    /// Unlike [`load_and_schedule_all`](Self::load_and_schedule_all), only
    /// challenges whose timer was live before the reload fire when found due
    /// afterwards, so history is not replayed on every pass. A store failure
    /// re-arms from the registry it kept and is then returned.
    #[instrument(skip(self, callback))]
    pub async fn resync(
        &self,
        callback: Option<FireCallback>,
    ) -> Result<LoadSummary, RegistryError> {
        let callback = callback.unwrap_or_else(|| self.default_callback());
        let pending: HashSet<String> = self
            .dispatcher
            .drain()
            .into_iter()
            .map(|entry| entry.challenge_id)
            .collect();

        let loaded = self.registry.load_all().await;
        let armed = self.arm_registry(&callback, |challenge_id| pending.contains(challenge_id));

        if armed.fired > 0 {
            info!(fired = armed.fired, "Fired challenges that came due during reload");
        }

        Ok(LoadSummary {
            loaded: loaded?,
            scheduled: armed.scheduled,
        })
    }

    /// One pass over the registry against a single "now": future entries
    /// get a timer, due entries fire if `fire_due` accepts them.
    fn arm_registry(&self, callback: &FireCallback, fire_due: impl Fn(&str) -> bool) -> Armed {
        let now = self.clock.now();
        let mut armed = Armed::default();

        for entry in self.registry.list_all() {
            if self.dispatcher.has(&entry.challenge_id) {
                continue;
            }

            if entry.is_future(now) {
                if self.register_scheduled_callback(
                    &entry.challenge_id,
                    entry.start_time,
                    Some(callback.clone()),
                ) {
                    armed.scheduled += 1;
                }
            } else if fire_due(&entry.challenge_id) {
                self.register_scheduled_callback(
                    &entry.challenge_id,
                    entry.start_time,
                    Some(callback.clone()),
                );
                armed.fired += 1;
            }
        }

        armed
    }

    /// Registry entries annotated with whether a timer is live for each
    pub fn list_entries(&self) -> Vec<OrchestratorEntry> {
        self.registry
            .list_all()
            .into_iter()
            .map(|entry| OrchestratorEntry {
                is_scheduled: self.dispatcher.is_scheduled(&entry.challenge_id),
                challenge_id: entry.challenge_id,
                start_time: entry.start_time,
            })
            .collect()
    }

    pub fn is_registered(&self, challenge_id: &str) -> bool {
        self.registry.has(challenge_id)
    }

    pub fn is_scheduled(&self, challenge_id: &str) -> bool {
        self.dispatcher.is_scheduled(challenge_id)
    }

    /// Start time currently held by the registry
    pub fn registered_start_time(&self, challenge_id: &str) -> Option<DateTime<Utc>> {
        self.registry.get(challenge_id)
    }

    /// Start time the live timer was armed with, if any
    pub fn scheduled_start_time(&self, challenge_id: &str) -> Option<DateTime<Utc>> {
        self.dispatcher.get_scheduled(challenge_id)
    }

    pub fn get_registry_size(&self) -> usize {
        self.registry.size()
    }

    pub fn get_scheduled_challenges_count(&self) -> usize {
        self.dispatcher.size()
    }

    /// Registry entries whose start time is strictly after now
    pub fn get_future_challenges_count(&self) -> usize {
        let now = self.clock.now();
        self.registry
            .list_all()
            .iter()
            .filter(|entry| entry.is_future(now))
            .count()
    }

    /// Full teardown of timers and registry
    pub fn clear(&self) {
        self.dispatcher.clear();
        self.registry.clear();
    }
}
