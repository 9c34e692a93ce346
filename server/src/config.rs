//! Command-line configuration for the paint-board server

use crate::error::ConfigError;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Collaborative pixel canvas server", long_about = None)]
pub struct Config {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,

    /// UDP port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    pub port: u16,

    /// Use fixed, well-known tokens ("M" master, "A" per zone)
    #[arg(short = 'D', long)]
    pub debug: bool,

    /// Directory receiving zone snapshots (defaults to a fresh temp dir)
    #[arg(short = 'W', long)]
    pub work_dir: Option<PathBuf>,

    /// Challenges granted to each client address
    #[arg(short = 'c', long, default_value_t = 3)]
    pub max_challenges: i32,

    /// Tick duration in milliseconds
    #[arg(short = 'd', long, default_value_t = 1000)]
    pub tick_duration: u64,

    /// Memory limit in mebibytes
    #[arg(short = 'm', long, default_value_t = 1024)]
    pub memory_limit: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: shared::DEFAULT_PORT,
            debug: false,
            work_dir: None,
            max_challenges: 3,
            tick_duration: 1000,
            memory_limit: 1024,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_duration == 0 {
            return Err(ConfigError::ZeroTickDuration);
        }
        if self.max_challenges <= 0 {
            return Err(ConfigError::NonPositiveChallenges(self.max_challenges));
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_duration)
    }

    pub fn memory_limit_bytes(&self) -> u64 {
        self.memory_limit.saturating_mul(1024 * 1024)
    }

    /// Creates the snapshot directory. A requested directory that already
    /// exists is emptied; without one a new temp directory is made.
    pub fn prepare_work_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.work_dir {
            Some(dir) => {
                reset_dir(dir).map_err(|source| ConfigError::WorkDir {
                    path: dir.clone(),
                    source,
                })?;
                Ok(dir.clone())
            }
            None => tempfile::Builder::new()
                .prefix("paint-board-")
                .tempdir()
                .map(|dir| dir.into_path())
                .map_err(|source| ConfigError::WorkDir {
                    path: std::env::temp_dir(),
                    source,
                }),
        }
    }
}

fn reset_dir(dir: &Path) -> std::io::Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)
}
