//! Core orchestration logic.
//!
//! This module contains:
//! - EventBus / ChallengeEventBus: Synchronous in-process pub/sub
//! - ChallengeRegistry: Challenge id to start time, reloadable from the store
//! - ChallengeDispatcher: One-shot timers per challenge
//! - Orchestrator: Registry + dispatcher composition
//! - bootstrap: Event wiring and startup load

pub mod bootstrap;
pub mod challenge_bus;
pub mod clock;
pub mod dispatcher;
pub mod event_bus;
pub mod orchestrator;
pub mod registry;

// Re-export commonly used types
pub use bootstrap::Subscriptions;
pub use challenge_bus::{ChallengeEventBus, TypedListener};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{ChallengeDispatcher, FireCallback};
pub use event_bus::{EventBus, Listener, DEFAULT_MAX_LISTENERS};
pub use orchestrator::{LoadSummary, Orchestrator};
pub use registry::{ChallengeRegistry, RegistryError};
