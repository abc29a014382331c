//! Domain types for the challenge orchestrator.
//!
//! This module contains the core data structures:
//! - Challenge: Registry entries and scheduled-timer projections
//! - Events: Challenge lifecycle events carried by the event bus

pub mod challenge;
pub mod events;

// Re-export commonly used types
pub use challenge::{OrchestratorEntry, RegistryEntry, ScheduledEntry};
pub use events::{
    ChallengeCreated, ChallengeDeleted, ChallengeEvent, ChallengeStarted, ChallengeUpdated,
    CHALLENGE_CREATED, CHALLENGE_DELETED, CHALLENGE_STARTED, CHALLENGE_UPDATED,
};
