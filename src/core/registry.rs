//! Challenge registry: in-memory map of challenge id to start time.
//!
//! A volatile cache of the challenge store. Individual entries are written by
//! `upsert`; the whole set is replaced by `load_all`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, instrument};

use crate::adapters::{ChallengeSource, SourceError};
use crate::domain::RegistryEntry;

/// Errors raised by registry reloads
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to load active challenges from {source_name}: {source}")]
    Load {
        source_name: String,
        #[source]
        source: SourceError,
    },
}

pub struct ChallengeRegistry {
    entries: RwLock<HashMap<String, DateTime<Utc>>>,
    source: Arc<dyn ChallengeSource>,
}

impl ChallengeRegistry {
    pub fn new(source: Arc<dyn ChallengeSource>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            source,
        }
    }

    /// Insert or overwrite the start time for `challenge_id`. Last write wins.
    pub fn upsert(&self, challenge_id: &str, start_time: DateTime<Utc>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(challenge_id.to_string(), start_time);
    }

    /// Drop the entry for `challenge_id`, returning whether one existed
    pub fn remove(&self, challenge_id: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(challenge_id)
            .is_some()
    }

    /// Replace the whole registry with the source's active set.
    ///
    /// Stage-then-swap: the source is read first and the map replaced in one
    /// step, so readers never observe an empty registry mid-reload. On error
    /// the previous contents are left untouched.
    #[instrument(skip(self), fields(source = self.source.name()))]
    pub async fn load_all(&self) -> Result<usize, RegistryError> {
        let rows = self
            .source
            .list_active_challenges()
            .await
            .map_err(|source| RegistryError::Load {
                source_name: self.source.name().to_string(),
                source,
            })?;

        let staged: HashMap<String, DateTime<Utc>> = rows
            .into_iter()
            .map(|row| (row.challenge_id, row.start_time))
            .collect();
        let loaded = staged.len();

        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = staged;

        info!(loaded, "Challenge registry loaded");
        Ok(loaded)
    }

    /// Unconditional resync: clear, then reload from the source.
    ///
    /// Unlike `load_all`, a failed read leaves the registry empty.
    pub async fn flush_all(&self) -> Result<usize, RegistryError> {
        self.clear();
        self.load_all().await
    }

    /// Snapshot of every entry, in no particular order
    pub fn list_all(&self) -> Vec<RegistryEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, start_time)| RegistryEntry::new(id.clone(), *start_time))
            .collect()
    }

    pub fn has(&self, challenge_id: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(challenge_id)
    }

    pub fn get(&self, challenge_id: &str) -> Option<DateTime<Utc>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(challenge_id)
            .copied()
    }

    pub fn size(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
