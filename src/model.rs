//! Raw input records and the star-schema rows derived from them.
//!
//! Raw records ([`CatalogRecord`], [`EventRecord`]) mirror the JSON shapes of the
//! song catalog and the activity log. Unknown JSON keys are ignored; a missing
//! required key fails deserialization of that record only.
//!
//! Output rows ([`SongRow`], [`ArtistRow`], [`UserRow`], [`TimeRow`],
//! [`SongplayRow`]) are the columns written to Parquet, in column order.

use crate::validation::{Validate, ValidationError, ValidationResult};
use chrono::DateTime;
use serde::{Deserialize, Deserializer, Serialize};

/// A row tagged with its position in the input (file order, then line order).
///
/// The sequence number is the deterministic tie-breaker for every
/// "first seen" / "latest wins" reduction.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequenced<T> {
    pub seq: u64,
    pub record: T,
}

impl<T> Sequenced<T> {
    pub fn new(seq: u64, record: T) -> Self {
        Self { seq, record }
    }
}

/// One song/artist item of the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub song_id: String,
    pub title: String,
    pub artist_id: String,
    pub artist_name: String,
    #[serde(default)]
    pub artist_location: Option<String>,
    #[serde(default)]
    pub artist_latitude: Option<f64>,
    #[serde(default)]
    pub artist_longitude: Option<f64>,
    pub year: i32,
    pub duration: f64,
}

impl Validate for CatalogRecord {
    fn validate(&self) -> ValidationResult {
        let mut errors = Vec::new();
        if self.song_id.trim().is_empty() {
            errors.push(ValidationError::field("song_id", "must not be empty"));
        }
        if self.artist_id.trim().is_empty() {
            errors.push(ValidationError::field("artist_id", "must not be empty"));
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            errors.push(ValidationError::field("duration", "must be a non-negative number"));
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// One logged user action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Epoch milliseconds.
    pub ts: i64,
    #[serde(rename = "userId", default, deserialize_with = "de_opt_id")]
    pub user_id: Option<String>,
    #[serde(rename = "firstName", default)]
    pub first_name: Option<String>,
    #[serde(rename = "lastName", default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    /// Subscription tier (`free` / `paid`).
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub song: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: i64,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(rename = "userAgent", default)]
    pub user_agent: Option<String>,
    /// Action type, e.g. `NextSong`, `Home`, `Logout`.
    pub page: String,
    /// Playback duration in seconds.
    #[serde(default)]
    pub length: Option<f64>,
}

impl Validate for EventRecord {
    fn validate(&self) -> ValidationResult {
        let mut errors = Vec::new();
        if self.ts < 0 {
            errors.push(ValidationError::field("ts", "must not be negative"));
        } else if DateTime::from_timestamp_millis(self.ts).is_none() {
            errors.push(ValidationError::field("ts", "out of the representable date range"));
        }
        if self.page.is_empty() {
            errors.push(ValidationError::field("page", "must not be empty"));
        }
        if let Some(len) = self.length
            && !len.is_finite()
        {
            errors.push(ValidationError::field("length", "must be finite"));
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Accepts a string or integer id; blank strings and null become `None`.
fn de_opt_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match Option::<RawId>::deserialize(d)? {
        Some(RawId::Text(s)) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Some(RawId::Number(n)) => Some(n.to_string()),
        None => None,
    })
}

/// `songs` dimension row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongRow {
    pub song_id: String,
    pub title: String,
    pub artist_id: String,
    pub year: i32,
    pub duration: f64,
}

/// `artists` dimension row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistRow {
    pub artist_id: String,
    pub name: String,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// `users` dimension row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserRow {
    pub user_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub level: Option<String>,
}

/// `time` dimension row. `start_time` is epoch milliseconds (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeRow {
    pub start_time: i64,
    pub hour: i32,
    pub day: i32,
    pub week: i32,
    pub month: i32,
    pub year: i32,
    /// 1 = Sunday ... 7 = Saturday.
    pub weekday: i32,
}

/// `songplays` fact row.
///
/// `song_id`/`artist_id` are `None` when no catalog entry matched the event.
/// `year`/`month` are derived from `start_time` and are the partition columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SongplayRow {
    pub songplay_id: i64,
    pub start_time: i64,
    pub user_id: Option<String>,
    pub level: Option<String>,
    pub song_id: Option<String>,
    pub artist_id: Option<String>,
    pub session_id: i64,
    pub location: Option<String>,
    pub user_agent: Option<String>,
    pub year: i32,
    pub month: i32,
}
