//! Challenge dispatcher: one pending one-shot timer per challenge id.
//!
//! A future start time arms a tokio task that sleeps until the deadline,
//! invokes the callback, then removes its own registration. A start time at
//! or before "now" invokes the callback synchronously and stores nothing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::domain::ScheduledEntry;

use super::clock::{Clock, SystemClock};

/// Invoked with `(challenge_id, start_time)` when a challenge is due
pub type FireCallback = Arc<dyn Fn(&str, DateTime<Utc>) + Send + Sync>;

type TimerMap = Arc<Mutex<HashMap<String, Registration>>>;

/// Owning handle to a pending timer task
struct CancelHandle {
    task: JoinHandle<()>,
}

impl CancelHandle {
    fn cancel(self) {
        self.task.abort();
    }
}

/// A live timer, owned by the dispatcher
struct Registration {
    start_time: DateTime<Utc>,

    /// Distinguishes this registration from a later one for the same id
    generation: u64,
    handle: CancelHandle,
}

pub struct ChallengeDispatcher {
    timers: TimerMap,
    clock: Arc<dyn Clock>,
    next_generation: AtomicU64,
}

impl Default for ChallengeDispatcher {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl ChallengeDispatcher {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            timers: Arc::new(Mutex::new(HashMap::new())),
            clock,
            next_generation: AtomicU64::new(0),
        }
    }

    /// Arm a timer for `challenge_id`, or fire now if it is already due.
    ///
    /// Returns `false` without touching anything if a timer is already
    /// registered for the id, or if no tokio runtime is available to host
    /// the timer.
    pub fn register(
        &self,
        challenge_id: &str,
        start_time: DateTime<Utc>,
        callback: FireCallback,
    ) -> bool {
        let mut timers = lock(&self.timers);

        if timers.contains_key(challenge_id) {
            debug!(challenge_id, "Timer already registered, rejecting duplicate");
            return false;
        }

        let now = self.clock.now();
        if start_time <= now {
            drop(timers);
            debug!(challenge_id, %start_time, "Challenge already due, firing immediately");
            callback(challenge_id, start_time);
            return true;
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(challenge_id, error = %e, "No async runtime to host challenge timer");
                return false;
            }
        };

        let delay = (start_time - now).to_std().unwrap_or(Duration::ZERO);
        let deadline = Instant::now() + delay;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let id = challenge_id.to_string();
        let task_timers = Arc::clone(&self.timers);

        // The map lock is held until the registration is inserted, so the
        // task cannot observe the map before its own entry exists.
        let task = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            fire(&task_timers, &id, generation, start_time, callback.as_ref());
        });

        timers.insert(
            challenge_id.to_string(),
            Registration {
                start_time,
                generation,
                handle: CancelHandle { task },
            },
        );

        debug!(challenge_id, %start_time, delay_ms = delay.as_millis() as u64, "Timer armed");
        true
    }

    /// Cancel the pending timer for `challenge_id`.
    ///
    /// Returns `false` if none is registered, including after it has fired.
    pub fn cancel(&self, challenge_id: &str) -> bool {
        let removed = lock(&self.timers).remove(challenge_id);

        match removed {
            Some(registration) => {
                registration.handle.cancel();
                debug!(challenge_id, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    pub fn has(&self, challenge_id: &str) -> bool {
        lock(&self.timers).contains_key(challenge_id)
    }

    /// Same as [`has`](Self::has)
    pub fn is_scheduled(&self, challenge_id: &str) -> bool {
        self.has(challenge_id)
    }

    pub fn get_scheduled(&self, challenge_id: &str) -> Option<DateTime<Utc>> {
        lock(&self.timers).get(challenge_id).map(|r| r.start_time)
    }

    pub fn size(&self) -> usize {
        lock(&self.timers).len()
    }

    pub fn list_all(&self) -> Vec<ScheduledEntry> {
        lock(&self.timers)
            .iter()
            .map(|(id, r)| ScheduledEntry {
                challenge_id: id.clone(),
                start_time: r.start_time,
            })
            .collect()
    }

    /// Cancel every pending timer and forget all registrations
    pub fn clear(&self) {
        self.drain();
    }

    /// Cancel every pending timer, returning what each was armed with
    pub fn drain(&self) -> Vec<ScheduledEntry> {
        let drained: Vec<(String, Registration)> = lock(&self.timers).drain().collect();

        let cancelled: Vec<ScheduledEntry> = drained
            .into_iter()
            .map(|(challenge_id, registration)| {
                registration.handle.cancel();
                ScheduledEntry {
                    challenge_id,
                    start_time: registration.start_time,
                }
            })
            .collect();

        if !cancelled.is_empty() {
            debug!(cancelled = cancelled.len(), "Cleared pending timers");
        }
        cancelled
    }
}

impl Drop for ChallengeDispatcher {
    fn drop(&mut self) {
        self.clear();
    }
}

fn lock(timers: &TimerMap) -> MutexGuard<'_, HashMap<String, Registration>> {
    timers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a fired registration once the callback returns or unwinds
struct Deregister<'a> {
    timers: &'a TimerMap,
    challenge_id: &'a str,
    generation: u64,
}

impl Drop for Deregister<'_> {
    fn drop(&mut self) {
        let mut timers = lock(self.timers);
        if is_current(&timers, self.challenge_id, self.generation) {
            timers.remove(self.challenge_id);
        }
    }
}

fn is_current(
    timers: &HashMap<String, Registration>,
    challenge_id: &str,
    generation: u64,
) -> bool {
    timers
        .get(challenge_id)
        .is_some_and(|r| r.generation == generation)
}

fn fire(
    timers: &TimerMap,
    challenge_id: &str,
    generation: u64,
    start_time: DateTime<Utc>,
    callback: &(dyn Fn(&str, DateTime<Utc>) + Send + Sync),
) {
    // Cancelled (or cancelled and re-registered) while the deadline elapsed
    if !is_current(&lock(timers), challenge_id, generation) {
        return;
    }

    let _deregister = Deregister {
        timers,
        challenge_id,
        generation,
    };

    debug!(challenge_id, %start_time, "Timer fired");
    callback(challenge_id, start_time);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::AtomicUsize;

    fn counting_callback() -> (FireCallback, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let callback: FireCallback = Arc::new(move |_: &str, _: DateTime<Utc>| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (callback, hits)
    }

    #[test]
    fn test_due_challenge_fires_without_runtime() {
        let now = Utc::now();
        let dispatcher = ChallengeDispatcher::new(Arc::new(ManualClock::new(now)));
        let (callback, hits) = counting_callback();

        assert!(dispatcher.register("c1", now, callback));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.size(), 0);
        assert!(!dispatcher.cancel("c1"));
    }

    #[test]
    fn test_future_challenge_without_runtime_is_rejected() {
        let now = Utc::now();
        let dispatcher = ChallengeDispatcher::new(Arc::new(ManualClock::new(now)));
        let (callback, hits) = counting_callback();

        assert!(!dispatcher.register("c1", now + ChronoDuration::seconds(5), callback));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!dispatcher.has("c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_register_is_rejected() {
        let now = Utc::now();
        let dispatcher = ChallengeDispatcher::new(Arc::new(ManualClock::new(now)));
        let (first, _) = counting_callback();
        let (second, _) = counting_callback();
        let start = now + ChronoDuration::seconds(10);

        assert!(dispatcher.register("c1", start, first));
        assert!(!dispatcher.register("c1", now + ChronoDuration::seconds(20), second));

        assert_eq!(dispatcher.size(), 1);
        assert_eq!(dispatcher.get_scheduled("c1"), Some(start));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cancels_all_timers() {
        let now = Utc::now();
        let dispatcher = ChallengeDispatcher::new(Arc::new(ManualClock::new(now)));
        let (callback, hits) = counting_callback();

        dispatcher.register("c1", now + ChronoDuration::seconds(1), callback.clone());
        dispatcher.register("c2", now + ChronoDuration::seconds(2), callback);
        assert_eq!(dispatcher.list_all().len(), 2);

        dispatcher.clear();
        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        tokio::task::yield_now().await;

        assert_eq!(dispatcher.size(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_reports_what_was_armed() {
        let now = Utc::now();
        let dispatcher = ChallengeDispatcher::new(Arc::new(ManualClock::new(now)));
        let (callback, hits) = counting_callback();
        let start = now + ChronoDuration::seconds(3);

        dispatcher.register("c1", start, callback);

        let drained = dispatcher.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].challenge_id, "c1");
        assert_eq!(drained[0].start_time, start);
        assert!(dispatcher.drain().is_empty());

        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
