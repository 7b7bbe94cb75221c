//! # sparkify-lake
//!
//! Batch ETL that turns a song catalog and a user activity log into a star
//! schema stored as partitioned Parquet tables:
//!
//! - `songs` partitioned by `year` and `artist_id`
//! - `artists` and `users`, unpartitioned
//! - `time` partitioned by `year` and `month`
//! - `songplays` partitioned by `year` and `month`
//!
//! Each input is a location (file, directory, or glob pattern) of JSON
//! records, optionally gzip or zstd compressed. Malformed records are dropped
//! and counted; a source whose drop rate exceeds the configured maximum fails
//! the run with [`EtlError::DataCorruption`]. Each table is staged next to its
//! destination and swapped in only once fully written, so readers never see a
//! half-written table.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sparkify_lake::{EtlConfig, run};
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let config = EtlConfig::new("data/song_data/*/*/*/*.json", "data/log_data", "out");
//! let report = run(&config)?;
//! report.print();
//! # Ok(())
//! # }
//! ```
//!
//! The pure transformation is available separately as [`transform`], and
//! published tables can be loaded back with [`read_table`].

pub mod config;
pub mod dimensions;
pub mod error;
pub mod io;
pub mod model;
pub mod observability;
pub mod pipeline;
pub mod reduce;
pub mod report;
pub mod songplays;
pub mod testing;
pub mod validation;
pub mod writer;

pub use config::{CliConfig, EtlConfig, FileConfig};
pub use dimensions::{EventScope, build_artists, build_songs, build_time, build_users, time_row};
pub use error::EtlError;
pub use io::records::{ReadOptions, ReadStats, RecordReader, read_records};
pub use model::{
    ArtistRow, CatalogRecord, EventRecord, Sequenced, SongRow, SongplayRow, TimeRow, UserRow,
};
pub use observability::{LogFormat, init_logging};
pub use pipeline::{Tables, run, run_with_report, transform};
pub use reduce::{KeepFirst, KeepLatest, ReduceFn, reduce_by_key};
pub use report::{FailedWrite, RunReport};
pub use songplays::{CatalogIndex, CatalogMatch, JoinStats, build_songplays};
pub use validation::{DropPolicy, RecordError, Validate, ValidationError};
pub use writer::{PartitionSpec, Table, TableWriter, WriteStats, read_table};

// Gated re-exports
#[cfg(feature = "parallel-io")]
pub use io::records::read_records_par;
