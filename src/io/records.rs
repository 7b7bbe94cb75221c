//! Typed record readers for the raw catalog and event sources.
//!
//! This module provides:
//! - **Lazy reading**: [`RecordReader`] yields [`Sequenced`] rows file by file.
//! - **Bulk reading**: [`read_records`], and [`read_records_par`] which parses
//!   files in parallel (feature `parallel-io`) with identical output.
//! - **Bad-record tolerance**: a record that fails to parse, misses a required
//!   field, or fails [`Validate`] is dropped and counted. The read only fails
//!   with [`EtlError::DataCorruption`](crate::error::EtlError::DataCorruption)
//!   when the drop rate exceeds [`ReadOptions::max_drop_rate`].
//!
//! # Notes
//! - Files hold one JSON document per line; empty lines are skipped. A file
//!   holding a single pretty-printed document is read as one record.
//! - Files are visited in sorted path order and lines in file order. Sequence
//!   numbers follow that order and do not depend on parallelism.

use crate::io::compression::open_input;
use crate::io::glob::expand_location;
use crate::model::Sequenced;
use crate::validation::{DropPolicy, ErrorCollector, RecordError, Validate};
use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Knobs shared by all readers.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    pub max_drop_rate: f64,
    /// How many dropped records to keep as samples.
    pub error_samples: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            max_drop_rate: crate::config::DEFAULT_MAX_DROP_RATE,
            error_samples: crate::config::DEFAULT_ERROR_SAMPLES,
        }
    }
}

/// Outcome of reading one source.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReadStats {
    pub source: String,
    pub files: usize,
    /// Records seen, dropped ones included.
    pub total: u64,
    pub dropped: u64,
    pub error_samples: Vec<RecordError>,
}

impl ReadStats {
    /// Records that made it through.
    #[must_use]
    pub fn accepted(&self) -> u64 {
        self.total - self.dropped
    }
}

/// Parsed content of one file, before sequence numbers are assigned.
struct FileRecords<T> {
    rows: Vec<T>,
    total: u64,
    errors: ErrorCollector,
}

fn parse_line<T: DeserializeOwned + Validate>(
    path: &Path,
    line_no: u64,
    line: &[u8],
) -> Result<T, RecordError> {
    let record: T = serde_json::from_slice(line)
        .map_err(|e| RecordError::new(path, line_no, format!("parse: {e}")))?;
    record.validate().map_err(|errs| RecordError::invalid(path, line_no, &errs))?;
    Ok(record)
}

fn parse_file<T: DeserializeOwned + Validate>(
    path: &Path,
    error_samples: usize,
) -> Result<FileRecords<T>> {
    let mut bytes = Vec::new();
    open_input(path)?
        .read_to_end(&mut bytes)
        .with_context(|| format!("read {}", path.display()))?;

    let lines: Vec<(u64, &[u8])> = bytes
        .split(|b| *b == b'\n')
        .enumerate()
        .map(|(i, l)| (i as u64 + 1, l))
        .filter(|(_, l)| !l.trim_ascii().is_empty())
        .collect();

    let mut out = FileRecords { rows: Vec::new(), total: 0, errors: ErrorCollector::new(error_samples) };

    // A multi-line document: the first line is an incomplete JSON value but
    // the whole file is exactly one.
    if lines.len() > 1 {
        let first_is_partial = serde_json::from_slice::<serde_json::Value>(lines[0].1)
            .is_err_and(|e| e.is_eof());
        if first_is_partial && serde_json::from_slice::<serde_json::Value>(&bytes).is_ok() {
            out.total = 1;
            match parse_line::<T>(path, lines[0].0, &bytes) {
                Ok(row) => out.rows.push(row),
                Err(e) => out.errors.add(e),
            }
            return Ok(out);
        }
    }

    for (line_no, line) in lines {
        out.total += 1;
        match parse_line::<T>(path, line_no, line) {
            Ok(row) => out.rows.push(row),
            Err(e) => {
                debug!(error = %e, "dropping record");
                out.errors.add(e);
            }
        }
    }
    Ok(out)
}

/// Lazy reader over every record file of one location.
///
/// Each item is a sequenced row or a file-level I/O error. Call
/// [`finish`](RecordReader::finish) after draining to apply the drop policy.
pub struct RecordReader<T> {
    source: String,
    files: Vec<PathBuf>,
    next_file: usize,
    buffered: std::vec::IntoIter<T>,
    next_seq: u64,
    total: u64,
    errors: ErrorCollector,
    options: ReadOptions,
}

impl<T: DeserializeOwned + Validate> RecordReader<T> {
    /// Resolve `location` and prepare to read it.
    ///
    /// # Errors
    /// Returns an error if the location cannot be resolved.
    pub fn open(source: impl Into<String>, location: &str, options: ReadOptions) -> Result<Self> {
        let source = source.into();
        let files = expand_location(location)
            .with_context(|| format!("resolve {source} location {location}"))?;
        debug!(source = %source, files = files.len(), "resolved input location");
        Ok(Self {
            source,
            files,
            next_file: 0,
            buffered: Vec::new().into_iter(),
            next_seq: 0,
            total: 0,
            errors: ErrorCollector::new(options.error_samples),
            options,
        })
    }

    /// Apply the drop policy and return the read statistics.
    ///
    /// # Errors
    /// Returns [`EtlError::DataCorruption`](crate::error::EtlError::DataCorruption)
    /// if too many records were dropped.
    pub fn finish(self) -> Result<ReadStats> {
        let stats = ReadStats {
            source: self.source,
            files: self.files.len(),
            total: self.total,
            dropped: self.errors.dropped(),
            error_samples: self.errors.samples().to_vec(),
        };
        check_stats(&stats, self.options)?;
        Ok(stats)
    }
}

impl<T: DeserializeOwned + Validate> Iterator for RecordReader<T> {
    type Item = Result<Sequenced<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffered.next() {
                let seq = self.next_seq;
                self.next_seq += 1;
                return Some(Ok(Sequenced::new(seq, record)));
            }
            let path = self.files.get(self.next_file)?;
            self.next_file += 1;
            match parse_file::<T>(path, self.options.error_samples) {
                Ok(parsed) => {
                    self.total += parsed.total;
                    self.errors.merge(parsed.errors);
                    self.buffered = parsed.rows.into_iter();
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

fn check_stats(stats: &ReadStats, options: ReadOptions) -> Result<()> {
    if stats.dropped > 0 {
        warn!(
            source = %stats.source,
            dropped = stats.dropped,
            total = stats.total,
            "dropped malformed records"
        );
    }
    DropPolicy::new(options.max_drop_rate).check(&stats.source, stats.dropped, stats.total)?;
    Ok(())
}

/// Read every record of `location` sequentially.
///
/// # Errors
/// Returns an error on file-level I/O failure or when the drop rate is exceeded.
pub fn read_records<T: DeserializeOwned + Validate>(
    source: &str,
    location: &str,
    options: ReadOptions,
) -> Result<(Vec<Sequenced<T>>, ReadStats)> {
    let mut reader = RecordReader::<T>::open(source, location, options)?;
    let rows = reader.by_ref().collect::<Result<Vec<_>>>()?;
    let stats = reader.finish()?;
    Ok((rows, stats))
}

/// Read every record of `location`, parsing files in parallel.
///
/// Output order and sequence numbers match [`read_records`].
///
/// # Errors
/// Returns an error on file-level I/O failure or when the drop rate is exceeded.
#[cfg(feature = "parallel-io")]
pub fn read_records_par<T: DeserializeOwned + Validate + Send>(
    source: &str,
    location: &str,
    options: ReadOptions,
) -> Result<(Vec<Sequenced<T>>, ReadStats)> {
    use rayon::prelude::*;

    let files = expand_location(location)
        .with_context(|| format!("resolve {source} location {location}"))?;
    let parsed: Vec<FileRecords<T>> = files
        .par_iter()
        .map(|p| parse_file::<T>(p, options.error_samples))
        .collect::<Result<_>>()?;

    let mut rows = Vec::with_capacity(parsed.iter().map(|f| f.rows.len()).sum());
    let mut total = 0;
    let mut errors = ErrorCollector::new(options.error_samples);
    for file in parsed {
        total += file.total;
        errors.merge(file.errors);
        rows.extend(file.rows);
    }
    let rows: Vec<Sequenced<T>> = rows
        .into_iter()
        .enumerate()
        .map(|(i, r)| Sequenced::new(i as u64, r))
        .collect();

    let stats = ReadStats {
        source: source.to_string(),
        files: files.len(),
        total,
        dropped: errors.dropped(),
        error_samples: errors.samples().to_vec(),
    };
    check_stats(&stats, options)?;
    Ok((rows, stats))
}
