//! In-process challenge source.
//!
//! Used by embedders that already hold the challenge list, and by tests to
//! script reloads and store failures.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::RegistryEntry;

use super::{ChallengeSource, SourceError};

#[derive(Debug, Default)]
pub struct MemorySource {
    entries: Mutex<Vec<RegistryEntry>>,
    fail_next: AtomicBool,
    reads: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Vec<RegistryEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            ..Self::default()
        }
    }

    /// Replace the whole active set
    pub fn set(&self, entries: Vec<RegistryEntry>) {
        *self.entries.lock().unwrap_or_else(PoisonError::into_inner) = entries;
    }

    pub fn push(&self, challenge_id: impl Into<String>, start_time: DateTime<Utc>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RegistryEntry::new(challenge_id, start_time));
    }

    /// Make the next read fail with `SourceError::Unavailable`
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Number of successful and failed reads so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChallengeSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_active_challenges(&self) -> Result<Vec<RegistryEntry>, SourceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SourceError::Unavailable("scripted failure".to_string()));
        }

        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}
