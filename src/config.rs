//! Run configuration: input locations, output root, and transformation knobs.
//!
//! Configuration is resolved from two layers, CLI arguments and an optional TOML
//! file. Values present in the file override the CLI.
//!
//! ```toml
//! song_data = "data/song_data"
//! log_data = "data/log_data/**/*.json"
//! output = "lake"
//! max_drop_rate = 0.01
//! duration_tolerance = 0.5
//! ```

use crate::error::EtlError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_DROP_RATE: f64 = 0.05;
pub const DEFAULT_DURATION_TOLERANCE: f64 = 0.5;
pub const DEFAULT_SONG_PLAY_PAGE: &str = "NextSong";
pub const DEFAULT_MAX_ROWS_PER_FILE: usize = 1_000_000;
pub const DEFAULT_ERROR_SAMPLES: usize = 20;

/// Fully resolved settings for one pipeline run.
#[derive(Debug, Clone)]
pub struct EtlConfig {
    /// Song catalog location: file, directory, or glob pattern.
    pub song_data: String,
    /// Event log location: file, directory, or glob pattern.
    pub log_data: String,
    /// Root directory receiving the five table directories.
    pub output: PathBuf,
    /// Fraction of dropped records per source above which the read fails.
    pub max_drop_rate: f64,
    /// Max absolute difference (seconds) between log `length` and catalog `duration`.
    pub duration_tolerance: f64,
    /// `page` value marking a song-play action.
    pub song_play_page: String,
    /// Build the users table from song-play events only.
    pub users_from_song_plays_only: bool,
    pub max_rows_per_file: usize,
    /// Size of the worker pool.
    pub workers: usize,
    /// Inclusive lower bound on event `ts` (epoch ms).
    pub window_start_ms: Option<i64>,
    /// Exclusive upper bound on event `ts` (epoch ms).
    pub window_end_ms: Option<i64>,
    /// How many parse errors to keep per source for reporting.
    pub error_samples: usize,
}

impl EtlConfig {
    /// Build a config with default knobs for the given locations.
    pub fn new(
        song_data: impl Into<String>,
        log_data: impl Into<String>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            song_data: song_data.into(),
            log_data: log_data.into(),
            output: output.into(),
            max_drop_rate: DEFAULT_MAX_DROP_RATE,
            duration_tolerance: DEFAULT_DURATION_TOLERANCE,
            song_play_page: DEFAULT_SONG_PLAY_PAGE.to_string(),
            users_from_song_plays_only: true,
            max_rows_per_file: DEFAULT_MAX_ROWS_PER_FILE,
            workers: num_cpus::get(),
            window_start_ms: None,
            window_end_ms: None,
            error_samples: DEFAULT_ERROR_SAMPLES,
        }
    }

    /// Resolve configuration from CLI arguments and an optional TOML file.
    /// File values override CLI values where present.
    ///
    /// # Errors
    /// Returns [`EtlError::Config`] if a location is missing from both layers
    /// or the resolved values are inconsistent.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let song_data = file
            .song_data
            .or_else(|| cli.song_data.clone())
            .ok_or_else(|| EtlError::Config("song_data must be set via --song-data or config file".into()))?;
        let log_data = file
            .log_data
            .or_else(|| cli.log_data.clone())
            .ok_or_else(|| EtlError::Config("log_data must be set via --log-data or config file".into()))?;
        let output = file
            .output
            .map(PathBuf::from)
            .or_else(|| cli.output.clone())
            .ok_or_else(|| EtlError::Config("output must be set via --output or config file".into()))?;

        let mut cfg = Self::new(song_data, log_data, output);
        if let Some(v) = file.max_drop_rate.or(cli.max_drop_rate) {
            cfg.max_drop_rate = v;
        }
        if let Some(v) = file.duration_tolerance.or(cli.duration_tolerance) {
            cfg.duration_tolerance = v;
        }
        if let Some(v) = file.workers.or(cli.workers) {
            cfg.workers = v;
        }
        if let Some(v) = file.song_play_page {
            cfg.song_play_page = v;
        }
        if let Some(v) = file.users_from_song_plays_only {
            cfg.users_from_song_plays_only = v;
        }
        if let Some(v) = file.max_rows_per_file {
            cfg.max_rows_per_file = v;
        }
        if let Some(v) = file.error_samples {
            cfg.error_samples = v;
        }
        cfg.window_start_ms = file.window_start_ms;
        cfg.window_end_ms = file.window_end_ms;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Check value ranges.
    ///
    /// # Errors
    /// Returns [`EtlError::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<(), EtlError> {
        if !(0.0..=1.0).contains(&self.max_drop_rate) {
            return Err(EtlError::Config(format!(
                "max_drop_rate must be within [0, 1], got {}",
                self.max_drop_rate
            )));
        }
        if !self.duration_tolerance.is_finite() || self.duration_tolerance < 0.0 {
            return Err(EtlError::Config(format!(
                "duration_tolerance must be a non-negative number, got {}",
                self.duration_tolerance
            )));
        }
        if self.max_rows_per_file == 0 {
            return Err(EtlError::Config("max_rows_per_file must be > 0".into()));
        }
        if self.workers == 0 {
            return Err(EtlError::Config("workers must be > 0".into()));
        }
        if self.song_play_page.is_empty() {
            return Err(EtlError::Config("song_play_page must not be empty".into()));
        }
        if let (Some(start), Some(end)) = (self.window_start_ms, self.window_end_ms)
            && start >= end
        {
            return Err(EtlError::Config(format!(
                "event window is empty: start {start} >= end {end}"
            )));
        }
        Ok(())
    }
}

/// CLI arguments that take part in config resolution.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub song_data: Option<String>,
    pub log_data: Option<String>,
    pub output: Option<PathBuf>,
    pub max_drop_rate: Option<f64>,
    pub duration_tolerance: Option<f64>,
    pub workers: Option<usize>,
}

/// TOML file layer. Every field is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub song_data: Option<String>,
    pub log_data: Option<String>,
    pub output: Option<String>,
    pub max_drop_rate: Option<f64>,
    pub duration_tolerance: Option<f64>,
    pub song_play_page: Option<String>,
    pub users_from_song_plays_only: Option<bool>,
    pub max_rows_per_file: Option<usize>,
    pub workers: Option<usize>,
    pub window_start_ms: Option<i64>,
    pub window_end_ms: Option<i64>,
    pub error_samples: Option<usize>,
}

impl FileConfig {
    /// Read and parse a TOML config file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid TOML for this schema.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parse config file {}", path.display()))
    }
}
