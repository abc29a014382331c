//! File-backed challenge source.
//!
//! Reads a JSON or YAML list of challenge rows on every reload:
//!
//! ```yaml
//! - challenge_id: harbor-riddle
//!   start_time: 2026-10-19T18:00:00Z
//! - challenge_id: old-mill
//!   start_time: 2026-10-18T09:00:00Z
//!   valid_until: 2026-10-18T12:00:00Z   # superseded, skipped
//! ```
//!
//! The format is picked from the extension (`.yaml`/`.yml` vs anything else).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::fs;
use tracing::debug;

use crate::domain::RegistryEntry;

use super::{ChallengeSource, SourceError};

/// One row as stored in the file
#[derive(Debug, Clone, Deserialize)]
struct ChallengeRow {
    #[serde(alias = "id")]
    challenge_id: String,
    start_time: DateTime<Utc>,

    /// Set on rows that have been superseded or deleted
    #[serde(default)]
    valid_until: Option<DateTime<Utc>>,
}

pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_yaml(&self) -> bool {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
            .unwrap_or(false)
    }

    fn parse(&self, content: &str) -> Result<Vec<ChallengeRow>, SourceError> {
        let parsed: Result<Vec<ChallengeRow>, String> = if self.is_yaml() {
            serde_yaml::from_str(content).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(content).map_err(|e| e.to_string())
        };

        parsed.map_err(|message| SourceError::Parse {
            path: self.path.clone(),
            message,
        })
    }
}

#[async_trait]
impl ChallengeSource for FileSource {
    fn name(&self) -> &str {
        "file"
    }

    async fn list_active_challenges(&self) -> Result<Vec<RegistryEntry>, SourceError> {
        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|source| SourceError::Io {
                path: self.path.clone(),
                source,
            })?;

        let rows = self.parse(&content)?;
        let total = rows.len();

        let active: Vec<RegistryEntry> = rows
            .into_iter()
            .filter(|row| row.valid_until.is_none())
            .map(|row| RegistryEntry::new(row.challenge_id, row.start_time))
            .collect();

        debug!(
            path = %self.path.display(),
            total,
            active = active.len(),
            "Read challenge file"
        );

        Ok(active)
    }
}
