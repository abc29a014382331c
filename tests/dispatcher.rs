//! Dispatcher Integration Tests
//!
//! Timer arming, firing, self-removal and cancellation on virtual time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hunt_orchestrator::core::{ChallengeDispatcher, FireCallback, ManualClock};

type Calls = Arc<Mutex<Vec<(String, DateTime<Utc>)>>>;

fn spy() -> (FireCallback, Calls) {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let sink = calls.clone();
    let callback: FireCallback = Arc::new(move |id: &str, start: DateTime<Utc>| {
        sink.lock().unwrap().push((id.to_string(), start));
    });
    (callback, calls)
}

fn dispatcher_at(now: DateTime<Utc>) -> (ChallengeDispatcher, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(now));
    (ChallengeDispatcher::new(clock.clone()), clock)
}

/// Let spawned timer tasks run after a time jump
async fn settle() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
}

async fn advance(clock: &ManualClock, millis: u64) {
    clock.advance(ChronoDuration::milliseconds(millis as i64));
    tokio::time::advance(Duration::from_millis(millis)).await;
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn test_future_challenge_fires_once_and_self_removes() {
    let now = Utc::now();
    let (dispatcher, clock) = dispatcher_at(now);
    let (callback, calls) = spy();
    let start = now + ChronoDuration::milliseconds(5000);

    assert!(dispatcher.register("c1", start, callback));
    assert!(dispatcher.has("c1"));
    assert!(calls.lock().unwrap().is_empty());

    advance(&clock, 5000).await;

    assert_eq!(*calls.lock().unwrap(), vec![("c1".to_string(), start)]);
    assert!(!dispatcher.has("c1"));
    assert!(!dispatcher.is_scheduled("c1"));

    // Nothing left to fire
    advance(&clock, 60_000).await;
    assert_eq!(calls.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_past_challenge_fires_synchronously() {
    let now = Utc::now();
    let (dispatcher, _clock) = dispatcher_at(now);
    let (callback, calls) = spy();
    let start = now - ChronoDuration::milliseconds(1000);

    assert!(dispatcher.register("c1", start, callback));

    assert_eq!(*calls.lock().unwrap(), vec![("c1".to_string(), start)]);
    assert_eq!(dispatcher.size(), 0);
    assert!(!dispatcher.is_scheduled("c1"));
    assert!(!dispatcher.cancel("c1"));
}

#[tokio::test(start_paused = true)]
async fn test_start_time_equal_to_now_is_due() {
    let now = Utc::now();
    let (dispatcher, _clock) = dispatcher_at(now);
    let (callback, calls) = spy();

    assert!(dispatcher.register("c1", now, callback));
    assert_eq!(calls.lock().unwrap().len(), 1);
    assert!(!dispatcher.has("c1"));
}

#[tokio::test(start_paused = true)]
async fn test_only_elapsed_timers_fire() {
    let now = Utc::now();
    let (dispatcher, clock) = dispatcher_at(now);
    let (callback, calls) = spy();

    dispatcher.register("c1", now + ChronoDuration::seconds(1), callback.clone());
    dispatcher.register("c2", now + ChronoDuration::seconds(10), callback);

    advance(&clock, 1500).await;

    let fired: Vec<String> = calls.lock().unwrap().iter().map(|(id, _)| id.clone()).collect();
    assert_eq!(fired, vec!["c1".to_string()]);
    assert_eq!(dispatcher.size(), 1);
    assert!(dispatcher.has("c2"));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_prevents_callback() {
    let now = Utc::now();
    let (dispatcher, clock) = dispatcher_at(now);
    let (callback, calls) = spy();

    dispatcher.register("c1", now + ChronoDuration::seconds(5), callback);
    assert!(dispatcher.cancel("c1"));
    assert!(!dispatcher.cancel("c1"));

    advance(&clock, 10_000).await;

    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(dispatcher.size(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_fire_returns_false() {
    let now = Utc::now();
    let (dispatcher, clock) = dispatcher_at(now);
    let (callback, _calls) = spy();

    dispatcher.register("c1", now + ChronoDuration::seconds(1), callback);
    advance(&clock, 1000).await;

    assert!(!dispatcher.cancel("c1"));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_duplicate_register_keeps_one_timer() {
    let now = Utc::now();
    let (dispatcher, clock) = dispatcher_at(now);
    let (callback, calls) = spy();

    for offset in 1..=5 {
        let accepted =
            dispatcher.register("c1", now + ChronoDuration::seconds(offset), callback.clone());
        assert_eq!(accepted, offset == 1);
    }
    assert_eq!(dispatcher.size(), 1);

    advance(&clock, 10_000).await;
    assert_eq!(calls.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reregister_after_cancel_uses_new_time() {
    let now = Utc::now();
    let (dispatcher, clock) = dispatcher_at(now);
    let (callback, calls) = spy();
    let later = now + ChronoDuration::seconds(5);

    dispatcher.register("c1", now + ChronoDuration::seconds(2), callback.clone());
    dispatcher.cancel("c1");
    assert!(dispatcher.register("c1", later, callback));

    advance(&clock, 3000).await;
    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(dispatcher.get_scheduled("c1"), Some(later));

    advance(&clock, 2000).await;
    assert_eq!(*calls.lock().unwrap(), vec![("c1".to_string(), later)]);
    assert!(!dispatcher.has("c1"));
}

#[tokio::test(start_paused = true)]
async fn test_list_all_projects_id_and_time() {
    let now = Utc::now();
    let (dispatcher, _clock) = dispatcher_at(now);
    let (callback, _calls) = spy();
    let start = now + ChronoDuration::minutes(1);

    dispatcher.register("c1", start, callback);

    let listed = dispatcher.list_all();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].challenge_id, "c1");
    assert_eq!(listed[0].start_time, start);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_callback_still_deregisters() {
    let now = Utc::now();
    let (dispatcher, clock) = dispatcher_at(now);
    let callback: FireCallback = Arc::new(|_: &str, _: DateTime<Utc>| panic!("notifier failed"));

    dispatcher.register("c1", now + ChronoDuration::seconds(1), callback);
    advance(&clock, 1000).await;

    assert!(!dispatcher.has("c1"));
}
