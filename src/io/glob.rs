//! Resolve an input location into the list of record files to read.
//!
//! A location is one of:
//! - a **glob pattern** such as `data/log_data/*/*/*.json` (any of `*`, `?`, `[`),
//! - a **directory**, walked recursively for record files (`.json`, `.jsonl`,
//!   optionally with a compression suffix such as `.json.gz`),
//! - a **single file**.
//!
//! Results are sorted lexicographically; this order is the "input order" used by
//! deterministic tie-breaks downstream.

use crate::io::compression::is_record_file;
use anyhow::{Context, Result, bail};
use glob::{Pattern, glob};
use std::path::{Path, PathBuf};

/// Expand a glob pattern into a sorted vector of matching file paths.
///
/// Directories matched by the pattern are skipped. Zero matches yield an empty
/// vector, not an error.
///
/// # Errors
/// Returns an error if the pattern is invalid or a matched entry cannot be read.
pub fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;

    let mut result = Vec::new();
    for entry in paths {
        let path =
            entry.with_context(|| format!("error reading glob entry for pattern: {pattern}"))?;
        if path.is_file() {
            result.push(path);
        }
    }
    result.sort();
    Ok(result)
}

fn is_pattern(location: &str) -> bool {
    location.contains(['*', '?', '['])
}

/// Resolve `location` to a sorted list of files.
///
/// # Errors
/// Returns an error if the location is neither a pattern nor an existing
/// path, or if the directory walk fails.
pub fn expand_location(location: &str) -> Result<Vec<PathBuf>> {
    if is_pattern(location) {
        return expand_glob(location);
    }
    let path = Path::new(location);
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if path.is_dir() {
        let dir = path
            .to_str()
            .with_context(|| format!("non UTF-8 directory path: {}", path.display()))?;
        let pattern = Path::new(&Pattern::escape(dir)).join("**").join("*");
        let mut files = expand_glob(&pattern.to_string_lossy())?;
        files.retain(|p| is_record_file(p));
        return Ok(files);
    }
    bail!("input location does not exist: {location}")
}
