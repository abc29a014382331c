//! Challenge lifecycle events.
//!
//! Events are ephemeral: they exist only for the duration of a synchronous
//! publish on the event bus and are never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event name for a newly committed challenge
pub const CHALLENGE_CREATED: &str = "challenge.created";

/// Event name for a committed change to an existing challenge
pub const CHALLENGE_UPDATED: &str = "challenge.updated";

/// Event name for a committed challenge deletion
pub const CHALLENGE_DELETED: &str = "challenge.deleted";

/// Event name published when a challenge's start time arrives
pub const CHALLENGE_STARTED: &str = "challenge.started";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeCreated {
    pub challenge_id: String,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeUpdated {
    pub challenge_id: String,
    pub start_time: DateTime<Utc>,

    /// Start time before the update, when the CRUD layer knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeDeleted {
    pub challenge_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeStarted {
    pub challenge_id: String,
    pub start_time: DateTime<Utc>,
}

/// Any challenge lifecycle event, tagged by its bus name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ChallengeEvent {
    #[serde(rename = "challenge.created")]
    Created(ChallengeCreated),

    #[serde(rename = "challenge.updated")]
    Updated(ChallengeUpdated),

    #[serde(rename = "challenge.deleted")]
    Deleted(ChallengeDeleted),

    #[serde(rename = "challenge.started")]
    Started(ChallengeStarted),
}

impl ChallengeEvent {
    /// Bus name this event is published under
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created(_) => CHALLENGE_CREATED,
            Self::Updated(_) => CHALLENGE_UPDATED,
            Self::Deleted(_) => CHALLENGE_DELETED,
            Self::Started(_) => CHALLENGE_STARTED,
        }
    }

    pub fn challenge_id(&self) -> &str {
        match self {
            Self::Created(e) => &e.challenge_id,
            Self::Updated(e) => &e.challenge_id,
            Self::Deleted(e) => &e.challenge_id,
            Self::Started(e) => &e.challenge_id,
        }
    }
}
