//! Fixtures for tests of the ETL stages.
//!
//! - [`catalog_record`] / [`event_record`] build raw records with sensible
//!   defaults; adjust fields with struct update syntax.
//! - [`song_play`] builds a `NextSong` event.
//! - [`sequenced`] tags records with their input position.
//! - [`write_jsonl_fixture`] writes records or raw lines to a JSONL file.
//!
//! ```
//! use sparkify_lake::testing::*;
//!
//! let song = catalog_record("S1", "Test", "A1", "Art", 200.0);
//! let play = song_play("U1", "free", 1_541_000_000_000, "Test", "Art", 200.05);
//! assert_eq!(play.page, "NextSong");
//! assert_eq!(song.artist_name, "Art");
//! ```

use crate::model::{CatalogRecord, EventRecord, Sequenced};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{File, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::Path;

/// A catalog item with the given identity and no artist location.
#[must_use]
pub fn catalog_record(song_id: &str, title: &str, artist_id: &str, artist_name: &str, duration: f64) -> CatalogRecord {
    CatalogRecord {
        song_id: song_id.to_string(),
        title: title.to_string(),
        artist_id: artist_id.to_string(),
        artist_name: artist_name.to_string(),
        artist_location: None,
        artist_latitude: None,
        artist_longitude: None,
        year: 2018,
        duration,
    }
}

/// An event of any page type for `user_id`.
#[must_use]
pub fn event_record(user_id: &str, level: &str, ts: i64, page: &str) -> EventRecord {
    EventRecord {
        ts,
        user_id: (!user_id.is_empty()).then(|| user_id.to_string()),
        first_name: Some("First".to_string()),
        last_name: Some("Last".to_string()),
        gender: Some("F".to_string()),
        level: Some(level.to_string()),
        song: None,
        artist: None,
        session_id: 1,
        location: Some("San Francisco, CA".to_string()),
        user_agent: Some("Mozilla/5.0".to_string()),
        page: page.to_string(),
        length: None,
    }
}

/// A `NextSong` event playing `title` by `artist`.
#[must_use]
pub fn song_play(user_id: &str, level: &str, ts: i64, title: &str, artist: &str, length: f64) -> EventRecord {
    EventRecord {
        song: Some(title.to_string()),
        artist: Some(artist.to_string()),
        length: Some(length),
        ..event_record(user_id, level, ts, crate::config::DEFAULT_SONG_PLAY_PAGE)
    }
}

/// Tag records with sequence numbers in vector order.
#[must_use]
pub fn sequenced<T>(records: Vec<T>) -> Vec<Sequenced<T>> {
    records
        .into_iter()
        .enumerate()
        .map(|(i, r)| Sequenced::new(i as u64, r))
        .collect()
}

/// Write serializable records to `path`, one JSON document per line.
/// Parent directories are created as needed.
///
/// # Errors
/// Returns an error if the file cannot be created or written.
pub fn write_jsonl_fixture<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let lines = records
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()
        .context("serialize fixture records")?;
    write_lines_fixture(path, &lines)
}

/// Write raw text lines to `path` (for malformed-input tests).
///
/// # Errors
/// Returns an error if the file cannot be created or written.
pub fn write_lines_fixture<S: AsRef<str>>(path: &Path, lines: &[S]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        create_dir_all(parent).with_context(|| format!("mkdir -p {}", parent.display()))?;
    }
    let mut w = BufWriter::new(File::create(path).with_context(|| format!("create {}", path.display()))?);
    for line in lines {
        w.write_all(line.as_ref().as_bytes())?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    Ok(())
}
