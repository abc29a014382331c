//! Orchestration bootstrap: wires challenge lifecycle events to the
//! orchestrator and performs the startup load-and-schedule.
//!
//! Per challenge:
//! - created: record the start time and arm a timer (fires now if due)
//! - updated: as created if unknown; reschedule if the start time moved
//!   relative to the registry; otherwise nothing
//! - deleted: cancel the timer and drop the registry entry
//!
//! Listeners hold weak references, so the bus never keeps the orchestrator
//! alive and dropping either side simply turns the listeners into no-ops.

use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::domain::{ChallengeCreated, ChallengeDeleted, ChallengeStarted, ChallengeUpdated};

use super::challenge_bus::{ChallengeEventBus, TypedListener};
use super::dispatcher::FireCallback;
use super::orchestrator::{LoadSummary, Orchestrator};

/// The listeners installed by [`subscribe`], kept so they can be removed
pub struct Subscriptions {
    created: TypedListener<ChallengeCreated>,
    updated: TypedListener<ChallengeUpdated>,
    deleted: TypedListener<ChallengeDeleted>,
    started: TypedListener<ChallengeStarted>,
}

impl Subscriptions {
    /// Remove exactly the listeners this value installed
    pub fn detach(&self, bus: &ChallengeEventBus) {
        bus.off_challenge_created(&self.created)
            .off_challenge_updated(&self.updated)
            .off_challenge_deleted(&self.deleted)
            .off_challenge_started(&self.started);
    }
}

/// Fire callback that publishes `challenge.started` on `bus`
pub fn started_publisher(bus: &Arc<ChallengeEventBus>) -> FireCallback {
    let bus = Arc::downgrade(bus);
    Arc::new(move |challenge_id: &str, start_time: DateTime<Utc>| {
        match bus.upgrade() {
            Some(bus) => {
                bus.emit_challenge_started(challenge_id, start_time);
            }
            None => warn!(challenge_id, "Event bus dropped, challenge.started not published"),
        }
    })
}

/// Apply a `challenge.created` event
pub fn handle_created(orchestrator: &Orchestrator, event: &ChallengeCreated, notify: &FireCallback) {
    // A repeated create for a known challenge is an update in disguise
    if orchestrator.is_registered(&event.challenge_id) {
        reschedule_if_moved(orchestrator, &event.challenge_id, event.start_time, notify);
        return;
    }

    schedule_new(orchestrator, &event.challenge_id, event.start_time, notify);
}

/// Apply a `challenge.updated` event.
///
/// Compares against the registry rather than `previous_start_time`, so
/// missed or replayed updates converge on the latest start time.
pub fn handle_updated(orchestrator: &Orchestrator, event: &ChallengeUpdated, notify: &FireCallback) {
    if !orchestrator.is_registered(&event.challenge_id) {
        debug!(challenge_id = %event.challenge_id, "Update for unknown challenge, treating as create");
        schedule_new(orchestrator, &event.challenge_id, event.start_time, notify);
        return;
    }

    if let Some(previous) = event.previous_start_time {
        if orchestrator.registered_start_time(&event.challenge_id) != Some(previous) {
            debug!(
                challenge_id = %event.challenge_id,
                %previous,
                "Registry disagrees with event's previous start time"
            );
        }
    }

    reschedule_if_moved(orchestrator, &event.challenge_id, event.start_time, notify);
}

/// Apply a `challenge.deleted` event: cancel the timer and prune the entry
pub fn handle_deleted(orchestrator: &Orchestrator, event: &ChallengeDeleted) {
    let cancelled = orchestrator.cancel_scheduled_callback(&event.challenge_id);
    let known = orchestrator.remove(&event.challenge_id);
    info!(challenge_id = %event.challenge_id, known, cancelled, "Challenge deleted");
}

fn schedule_new(
    orchestrator: &Orchestrator,
    challenge_id: &str,
    start_time: DateTime<Utc>,
    notify: &FireCallback,
) {
    orchestrator.upsert(challenge_id, start_time);
    let registered =
        orchestrator.register_scheduled_callback(challenge_id, start_time, Some(notify.clone()));
    info!(
        challenge_id,
        %start_time,
        registered,
        scheduled = orchestrator.is_scheduled(challenge_id),
        "Challenge registered"
    );
}

fn reschedule_if_moved(
    orchestrator: &Orchestrator,
    challenge_id: &str,
    start_time: DateTime<Utc>,
    notify: &FireCallback,
) {
    if orchestrator.registered_start_time(challenge_id) == Some(start_time) {
        debug!(challenge_id, "Start time unchanged, nothing to do");
        return;
    }

    orchestrator.cancel_scheduled_callback(challenge_id);
    orchestrator.upsert(challenge_id, start_time);
    let registered =
        orchestrator.register_scheduled_callback(challenge_id, start_time, Some(notify.clone()));
    info!(challenge_id, %start_time, registered, "Challenge rescheduled");
}

/// Install the lifecycle listeners on `bus`
pub fn subscribe(orchestrator: &Arc<Orchestrator>, bus: &Arc<ChallengeEventBus>) -> Subscriptions {
    let notify = started_publisher(bus);

    let created: TypedListener<ChallengeCreated> = {
        let orchestrator = Arc::downgrade(orchestrator);
        let notify = notify.clone();
        Arc::new(move |event: &ChallengeCreated| -> Result<()> {
            if let Some(orchestrator) = live(&orchestrator) {
                handle_created(&orchestrator, event, &notify);
            }
            Ok(())
        })
    };

    let updated: TypedListener<ChallengeUpdated> = {
        let orchestrator = Arc::downgrade(orchestrator);
        let notify = notify.clone();
        Arc::new(move |event: &ChallengeUpdated| -> Result<()> {
            if let Some(orchestrator) = live(&orchestrator) {
                handle_updated(&orchestrator, event, &notify);
            }
            Ok(())
        })
    };

    let deleted: TypedListener<ChallengeDeleted> = {
        let orchestrator = Arc::downgrade(orchestrator);
        Arc::new(move |event: &ChallengeDeleted| -> Result<()> {
            if let Some(orchestrator) = live(&orchestrator) {
                handle_deleted(&orchestrator, event);
            }
            Ok(())
        })
    };

    let started: TypedListener<ChallengeStarted> =
        Arc::new(|event: &ChallengeStarted| -> Result<()> {
            info!(
                challenge_id = %event.challenge_id,
                start_time = %event.start_time,
                "Challenge started"
            );
            Ok(())
        });

    bus.on_challenge_created(created.clone())
        .on_challenge_updated(updated.clone())
        .on_challenge_deleted(deleted.clone())
        .on_challenge_started(started.clone());

    Subscriptions {
        created,
        updated,
        deleted,
        started,
    }
}

fn live(orchestrator: &Weak<Orchestrator>) -> Option<Arc<Orchestrator>> {
    let upgraded = orchestrator.upgrade();
    if upgraded.is_none() {
        debug!("Orchestrator dropped, ignoring challenge event");
    }
    upgraded
}

/// Subscribe, load every active challenge, fire the due ones and arm timers
/// for the rest.
///
/// A store failure detaches the listeners again and is returned: running
/// with an unknown schedule is not safe.
#[instrument(skip_all)]
pub async fn start(
    orchestrator: &Arc<Orchestrator>,
    bus: &Arc<ChallengeEventBus>,
) -> Result<(Subscriptions, LoadSummary)> {
    let subscriptions = subscribe(orchestrator, bus);

    let summary = match orchestrator
        .load_and_schedule_all(Some(started_publisher(bus)))
        .await
    {
        Ok(summary) => summary,
        Err(e) => {
            subscriptions.detach(bus);
            return Err(e).context("Failed to load challenges at startup");
        }
    };

    info!(
        loaded = summary.loaded,
        scheduled = summary.scheduled,
        past_due = summary.past_due(),
        "Challenge orchestration started"
    );

    Ok((subscriptions, summary))
}
