//! Pipeline driver: read → build → write.
//!
//! [`transform`] is the pure core: typed input rows in, five tables out.
//! [`run`] wires it to the record readers and the partitioned writer, inside a
//! dedicated rayon pool sized by [`EtlConfig::workers`].
//!
//! Tables are published one at a time in the order `songs`, `artists`,
//! `users`, `time`, `songplays`. A write failure stops the run; tables that were
//! already published stay published.

use crate::config::EtlConfig;
use crate::dimensions::{EventScope, build_artists, build_songs, build_time, build_users};
use crate::error::EtlError;
use crate::io::records::{ReadOptions, ReadStats};
use crate::model::{ArtistRow, CatalogRecord, EventRecord, Sequenced, SongRow, SongplayRow, TimeRow, UserRow};
use crate::report::{FailedWrite, RunReport};
use crate::songplays::{CatalogIndex, JoinStats, build_songplays};
use crate::validation::Validate;
use crate::writer::TableWriter;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::time::Instant;
use tracing::{error, info, info_span};

pub const SONG_SOURCE: &str = "song_data";
pub const LOG_SOURCE: &str = "log_data";

/// The star schema produced by one run.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub songs: Vec<SongRow>,
    pub artists: Vec<ArtistRow>,
    pub users: Vec<UserRow>,
    pub time: Vec<TimeRow>,
    pub songplays: Vec<SongplayRow>,
    pub join: JoinStats,
}

/// Build every table from already-read input rows.
#[must_use]
pub fn transform(
    catalog: &[Sequenced<CatalogRecord>],
    events: &[Sequenced<EventRecord>],
    config: &EtlConfig,
) -> Tables {
    let scope = EventScope::from_config(config);

    let songs = build_songs(catalog);
    let artists = build_artists(catalog);
    let users = build_users(events, &scope, config.users_from_song_plays_only);
    let time = build_time(events, &scope);

    let index = CatalogIndex::build(&songs, &artists, config.duration_tolerance);
    let (songplays, join) = build_songplays(events, &index, &scope);

    Tables { songs, artists, users, time, songplays, join }
}

fn read_source<T: DeserializeOwned + Validate + Send>(
    source: &str,
    location: &str,
    options: ReadOptions,
) -> Result<(Vec<Sequenced<T>>, ReadStats)> {
    let _span = info_span!("read", source).entered();
    #[cfg(feature = "parallel-io")]
    let (rows, stats) = crate::io::records::read_records_par::<T>(source, location, options)?;
    #[cfg(not(feature = "parallel-io"))]
    let (rows, stats) = crate::io::records::read_records::<T>(source, location, options)?;
    info!(files = stats.files, records = stats.total, dropped = stats.dropped, "read source");
    Ok((rows, stats))
}

/// Run the whole pipeline, filling `report` as stages complete.
///
/// On error, `report` still describes everything done before the failure,
/// including [`RunReport::failed`] for a table write failure.
///
/// # Errors
/// Returns an error for invalid configuration, unreadable inputs,
/// [`EtlError::DataCorruption`], or [`EtlError::WriteFailure`].
pub fn run_with_report(config: &EtlConfig, report: &mut RunReport) -> Result<()> {
    config.validate()?;
    let started = Instant::now();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .build()
        .context("build worker pool")?;

    let result = pool.install(|| execute(config, report));
    report.set_elapsed(started.elapsed());
    result
}

/// Run the whole pipeline and return its report.
///
/// # Errors
/// See [`run_with_report`].
pub fn run(config: &EtlConfig) -> Result<RunReport> {
    let mut report = RunReport::default();
    run_with_report(config, &mut report)?;
    Ok(report)
}

fn execute(config: &EtlConfig, report: &mut RunReport) -> Result<()> {
    let options = ReadOptions { max_drop_rate: config.max_drop_rate, error_samples: config.error_samples };

    let (catalog, catalog_stats) = read_source::<CatalogRecord>(SONG_SOURCE, &config.song_data, options)?;
    report.sources.push(catalog_stats);
    let (events, event_stats) = read_source::<EventRecord>(LOG_SOURCE, &config.log_data, options)?;
    report.sources.push(event_stats);

    let tables = {
        let _span = info_span!("transform").entered();
        transform(&catalog, &events, config)
    };
    report.join = tables.join;
    info!(
        song_plays = tables.join.song_plays,
        matched = tables.join.matched,
        unmatched = tables.join.unmatched,
        ambiguous = tables.join.ambiguous,
        out_of_range = tables.join.out_of_range,
        "joined song plays against catalog"
    );

    let writer = TableWriter::new(&config.output, config.max_rows_per_file);
    let _span = info_span!("write", output = %config.output.display()).entered();
    let outcome = (|| -> Result<()> {
        report.tables.push(writer.write(&tables.songs)?);
        report.tables.push(writer.write(&tables.artists)?);
        report.tables.push(writer.write(&tables.users)?);
        report.tables.push(writer.write(&tables.time)?);
        report.tables.push(writer.write(&tables.songplays)?);
        Ok(())
    })();

    if let Err(e) = &outcome
        && let Some(EtlError::WriteFailure { table, partition, source }) = e.downcast_ref::<EtlError>()
    {
        let message = format!("{source:#}");
        error!(table = %table, partition = %partition, error = %message, "table write failed, stopping run");
        report.failed = Some(FailedWrite { table: table.clone(), partition: partition.clone(), error: message });
    }
    outcome
}
