//! Adapter interfaces for the challenge store.
//!
//! The persistent store is external. The orchestrator only needs the bulk
//! read of "all currently active challenges", used at boot and on reload.

pub mod file;
pub mod memory;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::RegistryEntry;

// Re-export the concrete sources
pub use file::FileSource;
pub use memory::MemorySource;

/// Errors returned by a challenge source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to read challenge file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse challenge file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Challenge store unavailable: {0}")]
    Unavailable(String),
}

/// Read-only view of the challenge store
#[async_trait]
pub trait ChallengeSource: Send + Sync {
    /// Human-readable source name
    fn name(&self) -> &str;

    /// Every currently active challenge with its start time.
    ///
    /// Complete set, no pagination. Superseded rows are never returned.
    async fn list_active_challenges(&self) -> Result<Vec<RegistryEntry>, SourceError>;
}
