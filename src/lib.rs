//! hunt-orchestrator - Challenge orchestration for the scavenger hunt backend
//!
//! Keeps an in-memory schedule of "announce challenge X when its start time
//! arrives" in step with a store whose challenges can be created, postponed
//! or cancelled at any moment.
//!
//! # Architecture
//!
//! - The CRUD layer publishes `challenge.created/updated/deleted` on the
//!   [`ChallengeEventBus`] after each commit
//! - The bootstrap listeners translate those into [`Orchestrator`] calls
//! - The orchestrator keeps the registry (start times) and dispatcher
//!   (timers) consistent
//! - A firing timer publishes `challenge.started` for downstream consumers
//!
//! # Modules
//!
//! - `adapters`: Challenge store sources (file, in-memory)
//! - `core`: Event bus, registry, dispatcher, orchestrator, bootstrap
//! - `domain`: Data structures (RegistryEntry, ChallengeEvent)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the scheduler against a challenge file
//! hunt serve --challenges challenges.yaml
//!
//! # Preview what would be scheduled
//! hunt schedule --challenges challenges.yaml
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{ChallengeSource, FileSource, MemorySource, SourceError};
pub use crate::core::{
    ChallengeDispatcher, ChallengeEventBus, ChallengeRegistry, LoadSummary, Orchestrator,
};
pub use domain::{ChallengeEvent, RegistryEntry};
