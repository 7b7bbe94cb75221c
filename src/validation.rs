//! Record-level validation and bad-record accounting.
//!
//! Raw inputs are messy: a truncated line, a missing `ts`, an empty `song_id`.
//! Such records are dropped one at a time instead of failing the read:
//!
//! - [`Validate`] defines semantic checks run after deserialization.
//! - [`ErrorCollector`] counts dropped records and keeps a bounded sample of
//!   [`RecordError`]s (file and line) for the run report.
//! - [`DropPolicy`] turns the counts into [`EtlError::DataCorruption`] once the
//!   drop rate of a source exceeds the configured limit.

use crate::error::EtlError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Result type for validation operations.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Trait for records that carry semantic checks beyond their serde shape.
pub trait Validate {
    /// Validate this instance and return a list of errors if invalid.
    fn validate(&self) -> ValidationResult;
}

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    /// The field that failed validation, if any.
    pub field: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn field<S: Into<String>, M: Into<String>>(field: S, message: M) -> Self {
        Self { field: Some(field.into()), message: message.into() }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "[{field}] {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Why one record was dropped, with its location in the input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordError {
    pub file: PathBuf,
    /// 1-based line number.
    pub line: u64,
    pub reason: String,
}

impl RecordError {
    pub fn new(file: &Path, line: u64, reason: impl Into<String>) -> Self {
        Self { file: file.to_path_buf(), line, reason: reason.into() }
    }

    /// Build from failed semantic checks.
    pub fn invalid(file: &Path, line: u64, errors: &[ValidationError]) -> Self {
        Self::new(file, line, format_errors(errors))
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.file.display(), self.line, self.reason)
    }
}

/// Counts dropped records and keeps the first `sample_limit` of them.
#[derive(Debug, Clone, Default)]
pub struct ErrorCollector {
    samples: Vec<RecordError>,
    dropped: u64,
    sample_limit: usize,
}

impl ErrorCollector {
    #[must_use]
    pub fn new(sample_limit: usize) -> Self {
        Self { samples: Vec::new(), dropped: 0, sample_limit }
    }

    pub fn add(&mut self, error: RecordError) {
        self.dropped += 1;
        if self.samples.len() < self.sample_limit {
            self.samples.push(error);
        }
    }

    /// Fold another collector in, keeping sample order (self first).
    pub fn merge(&mut self, other: Self) {
        self.dropped += other.dropped;
        let room = self.sample_limit.saturating_sub(self.samples.len());
        self.samples.extend(other.samples.into_iter().take(room));
    }

    /// Total number of dropped records (not just sampled ones).
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    #[must_use]
    pub fn samples(&self) -> &[RecordError] {
        &self.samples
    }
}

impl fmt::Display for ErrorCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErrorCollector({} dropped, {} sampled)", self.dropped, self.samples.len())
    }
}

/// Escalation rule for dropped records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DropPolicy {
    /// Largest tolerated `dropped / total` ratio.
    pub max_drop_rate: f64,
}

impl DropPolicy {
    #[must_use]
    pub fn new(max_drop_rate: f64) -> Self {
        Self { max_drop_rate }
    }

    /// Fail with [`EtlError::DataCorruption`] if the drop rate is too high.
    ///
    /// `total` counts every record seen, dropped ones included. A source with
    /// no records never fails.
    ///
    /// # Errors
    /// Returns [`EtlError::DataCorruption`] when `dropped / total > max_drop_rate`.
    pub fn check(&self, source_name: &str, dropped: u64, total: u64) -> Result<(), EtlError> {
        if total == 0 {
            return Ok(());
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = dropped as f64 / total as f64;
        if rate > self.max_drop_rate {
            return Err(EtlError::DataCorruption {
                source_name: source_name.to_string(),
                dropped,
                total,
                max_drop_rate: self.max_drop_rate,
            });
        }
        Ok(())
    }
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}
