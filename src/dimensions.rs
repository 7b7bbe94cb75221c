//! Dimension builders: `songs`, `artists`, `users` and `time`.
//!
//! Every builder is a pure function of its input rows. Duplicate keys are
//! resolved with the rules in [`crate::reduce`]:
//!
//! | table     | key          | survivor                                        |
//! |-----------|--------------|-------------------------------------------------|
//! | `songs`   | `song_id`    | first seen in input order                       |
//! | `artists` | `artist_id`  | first seen in input order                       |
//! | `users`   | `user_id`    | latest `ts`, ties to the later input row         |
//! | `time`    | `start_time` | derived from `ts` alone, so duplicates are equal |
//!
//! Output rows are sorted by key. Empty input gives an empty table.

use crate::config::EtlConfig;
use crate::model::{ArtistRow, CatalogRecord, EventRecord, Sequenced, SongRow, TimeRow, UserRow};
use crate::reduce::{KeepFirst, KeepLatest, reduce_by_key};
use chrono::{DateTime, Datelike, Timelike};
use rayon::prelude::*;

/// Which events take part in the event-derived tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventScope {
    /// `page` value of a song-play action.
    pub song_play_page: String,
    pub window_start_ms: Option<i64>,
    pub window_end_ms: Option<i64>,
}

impl Default for EventScope {
    fn default() -> Self {
        Self {
            song_play_page: crate::config::DEFAULT_SONG_PLAY_PAGE.to_string(),
            window_start_ms: None,
            window_end_ms: None,
        }
    }
}

impl EventScope {
    #[must_use]
    pub fn from_config(config: &EtlConfig) -> Self {
        Self {
            song_play_page: config.song_play_page.clone(),
            window_start_ms: config.window_start_ms,
            window_end_ms: config.window_end_ms,
        }
    }

    /// `[start, end)` window check on epoch milliseconds. Timestamps chrono
    /// cannot represent are never in the window.
    #[must_use]
    pub fn in_window(&self, ts: i64) -> bool {
        DateTime::from_timestamp_millis(ts).is_some()
            && self.window_start_ms.is_none_or(|s| ts >= s)
            && self.window_end_ms.is_none_or(|e| ts < e)
    }

    #[must_use]
    pub fn is_song_play(&self, event: &EventRecord) -> bool {
        event.page == self.song_play_page && self.in_window(event.ts)
    }
}

/// `songs`: one row per `song_id`, first seen wins.
#[must_use]
pub fn build_songs(catalog: &[Sequenced<CatalogRecord>]) -> Vec<SongRow> {
    let projected: Vec<Sequenced<SongRow>> = catalog
        .par_iter()
        .map(|r| {
            Sequenced::new(
                r.seq,
                SongRow {
                    song_id: r.record.song_id.clone(),
                    title: r.record.title.clone(),
                    artist_id: r.record.artist_id.clone(),
                    year: r.record.year,
                    duration: r.record.duration,
                },
            )
        })
        .collect();

    reduce_by_key(projected, |s: &SongRow| s.song_id.clone(), &KeepFirst)
        .into_iter()
        .map(|(_, row)| row.record)
        .collect()
}

/// `artists`: one row per `artist_id`, first seen wins.
#[must_use]
pub fn build_artists(catalog: &[Sequenced<CatalogRecord>]) -> Vec<ArtistRow> {
    let projected: Vec<Sequenced<ArtistRow>> = catalog
        .par_iter()
        .map(|r| {
            Sequenced::new(
                r.seq,
                ArtistRow {
                    artist_id: r.record.artist_id.clone(),
                    name: r.record.artist_name.clone(),
                    location: r.record.artist_location.clone().filter(|l| !l.is_empty()),
                    latitude: r.record.artist_latitude,
                    longitude: r.record.artist_longitude,
                },
            )
        })
        .collect();

    reduce_by_key(projected, |a: &ArtistRow| a.artist_id.clone(), &KeepFirst)
        .into_iter()
        .map(|(_, row)| row.record)
        .collect()
}

/// `users`: latest observed state per `user_id`.
///
/// Events without a user id are skipped. With `song_plays_only`, only
/// song-play events count; otherwise every event inside the window does.
#[must_use]
pub fn build_users(
    events: &[Sequenced<EventRecord>],
    scope: &EventScope,
    song_plays_only: bool,
) -> Vec<UserRow> {
    let candidates: Vec<Sequenced<(i64, UserRow)>> = events
        .par_iter()
        .filter(|e| {
            if song_plays_only {
                scope.is_song_play(&e.record)
            } else {
                scope.in_window(e.record.ts)
            }
        })
        .filter_map(|e| {
            let user_id = e.record.user_id.clone()?;
            Some(Sequenced::new(
                e.seq,
                (
                    e.record.ts,
                    UserRow {
                        user_id,
                        first_name: e.record.first_name.clone(),
                        last_name: e.record.last_name.clone(),
                        gender: e.record.gender.clone(),
                        level: e.record.level.clone(),
                    },
                ),
            ))
        })
        .collect();

    let latest = KeepLatest(|(ts, _): &(i64, UserRow)| *ts);
    reduce_by_key(candidates, |(_, u): &(i64, UserRow)| u.user_id.clone(), &latest)
        .into_iter()
        .map(|(_, row)| row.record.1)
        .collect()
}

/// Calendar breakdown of an epoch-millisecond timestamp in UTC.
///
/// `week` is the ISO week of year; `weekday` counts 1 = Sunday to 7 = Saturday.
/// Returns `None` when the timestamp is out of chrono's range.
#[must_use]
pub fn time_row(ts_ms: i64) -> Option<TimeRow> {
    let dt = DateTime::from_timestamp_millis(ts_ms)?;
    Some(TimeRow {
        start_time: ts_ms,
        hour: dt.hour() as i32,
        day: dt.day() as i32,
        week: dt.iso_week().week() as i32,
        month: dt.month() as i32,
        year: dt.year(),
        weekday: dt.weekday().number_from_sunday() as i32,
    })
}

/// `time`: one row per distinct song-play timestamp.
#[must_use]
pub fn build_time(events: &[Sequenced<EventRecord>], scope: &EventScope) -> Vec<TimeRow> {
    let mut stamps: Vec<i64> = events
        .par_iter()
        .filter(|e| scope.is_song_play(&e.record))
        .map(|e| e.record.ts)
        .collect();
    stamps.par_sort_unstable();
    stamps.dedup();
    stamps.into_iter().filter_map(time_row).collect()
}
