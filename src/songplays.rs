//! Fact builder: the `songplays` table.
//!
//! Only song-play events take part. Each one is looked up in a [`CatalogIndex`]
//! built once from the `songs` and `artists` dimensions and shared read-only by
//! all workers:
//!
//! - title and artist name must be equal,
//! - `|catalog duration - event length|` must be within the tolerance,
//! - no match keeps the row with null `song_id` / `artist_id`,
//! - several matches pick the lowest `song_id` (then `artist_id`) and count
//!   as an ambiguity.
//!
//! `songplay_id` is partition-local: rows are grouped by their `(year, month)`
//! output partition, partitions are numbered in key order, and rows inside a
//! partition are numbered by `(start_time, input sequence)`. The id is
//! `(partition_index << 33) + offset`, so it is dense and strictly increasing
//! within a partition. It is an opaque row identifier, not a global sequence
//! that stays stable across runs.

use crate::dimensions::{EventScope, time_row};
use crate::model::{ArtistRow, EventRecord, Sequenced, SongRow, SongplayRow, TimeRow};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Bit offset of the partition index inside `songplay_id`.
pub const PARTITION_SHIFT: u32 = 33;

/// A catalog candidate for the song/artist lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub song_id: String,
    pub artist_id: String,
    pub duration: f64,
}

/// Result of looking up one event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CatalogMatch<'a> {
    None,
    Unique(&'a CatalogEntry),
    /// Several candidates; `chosen` is the lowest `(song_id, artist_id)`.
    Ambiguous { chosen: &'a CatalogEntry, candidates: usize },
}

impl<'a> CatalogMatch<'a> {
    #[must_use]
    pub fn entry(&self) -> Option<&'a CatalogEntry> {
        match *self {
            Self::None => None,
            Self::Unique(e) | Self::Ambiguous { chosen: e, .. } => Some(e),
        }
    }
}

/// Broadcast lookup table: title → artist name → candidates sorted by id.
#[derive(Debug, Clone, Default)]
pub struct CatalogIndex {
    entries: HashMap<String, HashMap<String, Vec<CatalogEntry>>>,
    tolerance: f64,
}

impl CatalogIndex {
    /// Join `songs` to `artists` on `artist_id` and index by (title, name).
    /// Songs whose artist is missing from `artists` cannot be matched.
    #[must_use]
    pub fn build(songs: &[SongRow], artists: &[ArtistRow], tolerance: f64) -> Self {
        let names: HashMap<&str, &str> =
            artists.iter().map(|a| (a.artist_id.as_str(), a.name.as_str())).collect();

        let mut entries: HashMap<String, HashMap<String, Vec<CatalogEntry>>> = HashMap::new();
        for song in songs {
            let Some(name) = names.get(song.artist_id.as_str()) else {
                continue;
            };
            entries
                .entry(song.title.clone())
                .or_default()
                .entry((*name).to_string())
                .or_default()
                .push(CatalogEntry {
                    song_id: song.song_id.clone(),
                    artist_id: song.artist_id.clone(),
                    duration: song.duration,
                });
        }
        for by_artist in entries.values_mut() {
            for candidates in by_artist.values_mut() {
                candidates.sort_by(|a, b| {
                    (a.song_id.as_str(), a.artist_id.as_str())
                        .cmp(&(b.song_id.as_str(), b.artist_id.as_str()))
                });
            }
        }
        Self { entries, tolerance }
    }

    /// Find the catalog entry for a played song.
    #[must_use]
    pub fn lookup(&self, title: &str, artist: &str, length: f64) -> CatalogMatch<'_> {
        let Some(candidates) = self.entries.get(title).and_then(|m| m.get(artist)) else {
            return CatalogMatch::None;
        };
        let mut hits = candidates
            .iter()
            .filter(|c| (c.duration - length).abs() <= self.tolerance);
        let Some(first) = hits.next() else {
            return CatalogMatch::None;
        };
        match hits.count() {
            0 => CatalogMatch::Unique(first),
            more => CatalogMatch::Ambiguous { chosen: first, candidates: more + 1 },
        }
    }

    /// Look up an event; events without title, artist or length never match.
    #[must_use]
    pub fn lookup_event(&self, event: &EventRecord) -> CatalogMatch<'_> {
        match (&event.song, &event.artist, event.length) {
            (Some(title), Some(artist), Some(length)) => self.lookup(title, artist, length),
            _ => CatalogMatch::None,
        }
    }
}

/// Join outcome counts for the run report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JoinStats {
    pub song_plays: u64,
    pub matched: u64,
    pub unmatched: u64,
    /// Subset of `matched` resolved by the tie-break.
    pub ambiguous: u64,
    /// Song-play events skipped because `ts` has no calendar date.
    pub out_of_range: u64,
}

struct Joined {
    seq: u64,
    row: SongplayRow,
    matched: bool,
    ambiguous: bool,
}

fn join_event(event: &Sequenced<EventRecord>, time: TimeRow, index: &CatalogIndex) -> Joined {
    let e = &event.record;
    let found = index.lookup_event(e);
    if let CatalogMatch::Ambiguous { chosen, candidates } = found {
        debug!(
            song = e.song.as_deref().unwrap_or_default(),
            artist = e.artist.as_deref().unwrap_or_default(),
            candidates,
            chosen = %chosen.song_id,
            "ambiguous catalog match"
        );
    }
    let entry = found.entry();
    Joined {
        seq: event.seq,
        matched: entry.is_some(),
        ambiguous: matches!(found, CatalogMatch::Ambiguous { .. }),
        row: SongplayRow {
            songplay_id: 0,
            start_time: e.ts,
            user_id: e.user_id.clone(),
            level: e.level.clone(),
            song_id: entry.map(|c| c.song_id.clone()),
            artist_id: entry.map(|c| c.artist_id.clone()),
            session_id: e.session_id,
            location: e.location.clone(),
            user_agent: e.user_agent.clone(),
            year: time.year,
            month: time.month,
        },
    }
}

/// Build `songplays` from song-play events, ordered by partition then id.
#[must_use]
pub fn build_songplays(
    events: &[Sequenced<EventRecord>],
    index: &CatalogIndex,
    scope: &EventScope,
) -> (Vec<SongplayRow>, JoinStats) {
    let out_of_range = events
        .par_iter()
        .filter(|e| e.record.page == scope.song_play_page && time_row(e.record.ts).is_none())
        .count() as u64;
    if out_of_range > 0 {
        warn!(out_of_range, "song plays without a calendar date were skipped");
    }

    // In-scope events always have a calendar date.
    let joined: Vec<Joined> = events
        .par_iter()
        .filter(|e| scope.is_song_play(&e.record))
        .filter_map(|e| time_row(e.record.ts).map(|t| join_event(e, t, index)))
        .collect();

    let mut stats = JoinStats { out_of_range, ..JoinStats::default() };
    let mut partitions: BTreeMap<(i32, i32), Vec<Joined>> = BTreeMap::new();
    for j in joined {
        stats.song_plays += 1;
        if j.matched {
            stats.matched += 1;
        } else {
            stats.unmatched += 1;
        }
        if j.ambiguous {
            stats.ambiguous += 1;
        }
        partitions.entry((j.row.year, j.row.month)).or_default().push(j);
    }

    let mut out = Vec::with_capacity(stats.song_plays as usize);
    for (p, (_, mut rows)) in partitions.into_iter().enumerate() {
        rows.sort_by_key(|j| (j.row.start_time, j.seq));
        let base = (p as i64) << PARTITION_SHIFT;
        out.extend(rows.into_iter().enumerate().map(|(offset, mut j)| {
            j.row.songplay_id = base + offset as i64;
            j.row
        }));
    }
    (out, stats)
}
