//! Configuration for the hunt orchestrator.
//!
//! Configuration sources (highest priority first):
//! 1. Command-line flags (`--challenges`)
//! 2. Environment variables (HUNT_CHALLENGES, HUNT_LOG)
//! 3. Config file (`--config`, or .hunt/config.yaml found from the current
//!    directory upward)
//! 4. Defaults (~/.hunt/challenges.json, 10 listeners per event, `info`)
//!
//! Paths in the config file are relative to the config file's directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::DEFAULT_MAX_LISTENERS;

const DEFAULT_LOG_FILTER: &str = "info";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub challenges_file: Option<String>,
    #[serde(default)]
    pub event_bus: Option<EventBusConfig>,
    #[serde(default)]
    pub log_filter: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventBusConfig {
    /// Listener count per event before a leak warning (0 = unbounded)
    pub max_listeners: Option<usize>,
}

/// Environment overrides, captured once so resolution stays testable
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub challenges: Option<String>,
    pub log: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            challenges: std::env::var("HUNT_CHALLENGES").ok(),
            log: std::env::var("HUNT_LOG").ok(),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Challenge file read by the file source on every reload
    pub challenges_file: PathBuf,
    /// Event bus fan-out bound
    pub max_listeners: usize,
    /// `tracing` filter used when RUST_LOG is unset
    pub log_filter: String,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    /// Apply a command-line challenge file override
    pub fn with_challenges_file(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.challenges_file = path;
        }
        self
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file_from(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".hunt").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn default_challenges_file() -> Result<PathBuf> {
    Ok(dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".hunt")
        .join("challenges.json"))
}

/// Merge a parsed config file (if any) with environment overrides
fn resolve(
    config: Option<(PathBuf, ConfigFile)>,
    env: &EnvOverrides,
) -> Result<ResolvedConfig> {
    let (config_file, file) = match config {
        Some((path, file)) => (Some(path), Some(file)),
        None => (None, None),
    };

    let base_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."));

    let challenges_file = if let Some(ref env_path) = env.challenges {
        PathBuf::from(env_path)
    } else if let Some(ref path) = file.as_ref().and_then(|f| f.challenges_file.clone()) {
        resolve_path(base_dir, path)
    } else {
        default_challenges_file()?
    };

    let max_listeners = file
        .as_ref()
        .and_then(|f| f.event_bus.as_ref())
        .and_then(|b| b.max_listeners)
        .unwrap_or(DEFAULT_MAX_LISTENERS);

    let log_filter = env
        .log
        .clone()
        .or_else(|| file.as_ref().and_then(|f| f.log_filter.clone()))
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    Ok(ResolvedConfig {
        challenges_file,
        max_listeners,
        log_filter,
        config_file,
    })
}

/// Load configuration from all sources.
///
/// An explicit path must exist; otherwise the search is best-effort.
pub fn load_config(explicit: Option<&Path>) -> Result<ResolvedConfig> {
    let config_path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => std::env::current_dir()
            .ok()
            .and_then(|cwd| find_config_file_from(&cwd)),
    };

    let config = match config_path {
        Some(path) => {
            let file = load_config_file(&path)?;
            Some((path, file))
        }
        None => None,
    };

    resolve(config, &EnvOverrides::from_env())
}
