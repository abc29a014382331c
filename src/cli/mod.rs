//! Command-line interface for the hunt orchestrator.
//!
//! Provides commands for running the challenge scheduler, previewing the
//! schedule a challenge file would produce, and showing configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use crate::adapters::{ChallengeSource, FileSource};
use crate::config::{self, ResolvedConfig};
use crate::core::{bootstrap, ChallengeEventBus, ChallengeRegistry, Orchestrator, TypedListener};
use crate::domain::{ChallengeEvent, ChallengeStarted, RegistryEntry};

/// hunt - Challenge orchestration for the scavenger hunt backend
#[derive(Parser, Debug)]
#[command(name = "hunt")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to .hunt/config.yaml in this or a parent directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the challenge scheduler until interrupted
    Serve {
        /// Challenge file (JSON or YAML)
        #[arg(long, env = "HUNT_CHALLENGES")]
        challenges: Option<PathBuf>,

        /// Re-read the challenge file every N seconds (0 = never)
        #[arg(long, default_value = "0")]
        reload_interval: u64,
    },

    /// Show the schedule a challenge file would produce, without arming timers
    Schedule {
        /// Challenge file (JSON or YAML)
        #[arg(long, env = "HUNT_CHALLENGES")]
        challenges: Option<PathBuf>,

        /// Print entries as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Resolve configuration, applying this invocation's overrides
    pub fn load_config(&self) -> Result<ResolvedConfig> {
        let resolved = config::load_config(self.config.as_deref())?;

        let override_path = match &self.command {
            Commands::Serve { challenges, .. } | Commands::Schedule { challenges, .. } => {
                challenges.clone()
            }
            Commands::Config => None,
        };

        Ok(resolved.with_challenges_file(override_path))
    }

    pub async fn execute(self, config: ResolvedConfig) -> Result<()> {
        match self.command {
            Commands::Serve {
                reload_interval, ..
            } => serve(&config, reload_interval).await,
            Commands::Schedule { json, .. } => show_schedule(&config, json).await,
            Commands::Config => show_config(&config),
        }
    }
}

/// Run bootstrap, then wait for Ctrl-C (optionally resyncing periodically)
async fn serve(config: &ResolvedConfig, reload_interval: u64) -> Result<()> {
    let bus = Arc::new(ChallengeEventBus::with_max_listeners(config.max_listeners));
    let source: Arc<dyn ChallengeSource> = Arc::new(FileSource::new(&config.challenges_file));
    let orchestrator = Arc::new(Orchestrator::new(source).with_event_bus(bus.clone()));

    let printer: TypedListener<ChallengeStarted> =
        Arc::new(|event: &ChallengeStarted| -> Result<()> {
            let json = serde_json::to_string(&ChallengeEvent::Started(event.clone()))
                .context("Failed to serialize challenge.started")?;
            println!("{}", json);
            Ok(())
        });
    bus.on_challenge_started(printer.clone());

    info!(file = %config.challenges_file.display(), "Starting challenge scheduler");
    let (subscriptions, summary) = bootstrap::start(&orchestrator, &bus).await?;

    println!(
        "Loaded {} challenges: {} scheduled, {} past due and fired",
        summary.loaded,
        summary.scheduled,
        summary.past_due()
    );

    let mut reload = (reload_interval > 0).then(|| {
        let period = Duration::from_secs(reload_interval);
        tokio::time::interval_at(tokio::time::Instant::now() + period, period)
    });

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for shutdown signal")?;
                break;
            }
            _ = tick(&mut reload) => {
                match orchestrator.resync(Some(bootstrap::started_publisher(&bus))).await {
                    Ok(summary) => info!(
                        loaded = summary.loaded,
                        scheduled = summary.scheduled,
                        "Challenge file reloaded"
                    ),
                    Err(e) => error!(error = %e, "Reload failed, kept previous registry"),
                }
            }
        }
    }

    info!(
        pending = orchestrator.get_scheduled_challenges_count(),
        "Shutting down, cancelling pending timers"
    );
    subscriptions.detach(&bus);
    bus.off_challenge_started(&printer);
    orchestrator.clear();

    Ok(())
}

/// Wait for the next reload tick, or forever if reloading is disabled
async fn tick(reload: &mut Option<tokio::time::Interval>) {
    match reload {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Load the challenge file and print each entry with its status
async fn show_schedule(config: &ResolvedConfig, json: bool) -> Result<()> {
    let source = Arc::new(FileSource::new(&config.challenges_file));
    let registry = ChallengeRegistry::new(source);
    registry
        .load_all()
        .await
        .context("Failed to load challenges")?;

    let now = Utc::now();
    let mut entries = registry.list_all();
    entries.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then_with(|| a.challenge_id.cmp(&b.challenge_id))
    });

    if json {
        for entry in &entries {
            println!("{}", serde_json::to_string(entry)?);
        }
        return Ok(());
    }

    if entries.is_empty() {
        println!("No active challenges in {}", config.challenges_file.display());
        return Ok(());
    }

    println!("{:<24} {:<26} STATUS", "CHALLENGE", "START");
    println!("{}", "-".repeat(70));

    for entry in &entries {
        println!(
            "{:<24} {:<26} {}",
            truncate(&entry.challenge_id, 24),
            entry.start_time.format("%Y-%m-%d %H:%M:%S UTC"),
            describe_status(entry, now)
        );
    }

    let future = entries.iter().filter(|e| e.is_future(now)).count();
    println!();
    println!(
        "{} challenges, {} would be scheduled, {} past due",
        entries.len(),
        future,
        entries.len() - future
    );

    Ok(())
}

fn describe_status(entry: &RegistryEntry, now: DateTime<Utc>) -> String {
    if !entry.is_future(now) {
        return "due".to_string();
    }

    let remaining = entry.start_time - now;
    let hours = remaining.num_hours();
    let minutes = remaining.num_minutes() % 60;
    let seconds = remaining.num_seconds() % 60;

    if hours > 0 {
        format!("in {}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("in {}m {}s", minutes, seconds)
    } else {
        format!("in {}s", seconds)
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn show_config(config: &ResolvedConfig) -> Result<()> {
    println!("Hunt Orchestrator Configuration");
    println!();
    println!(
        "Config file:     {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("Challenges file: {}", config.challenges_file.display());
    println!("Max listeners:   {}", config.max_listeners);
    println!("Log filter:      {}", config.log_filter);

    Ok(())
}
