//! Domain errors surfaced by the ETL core.
//!
//! Most fallible functions return [`anyhow::Result`] with contextual messages.
//! The failures a caller may want to react to are raised as [`EtlError`] and can
//! be recovered from an [`anyhow::Error`] with `downcast_ref::<EtlError>()`.
//!
//! Per-record parse problems are *not* errors at this level: they are counted
//! and collected by [`crate::validation::ErrorCollector`] and only escalate to
//! [`EtlError::DataCorruption`] when the drop rate crosses the configured limit.

use thiserror::Error;

/// Errors that abort a read, a table write, or the whole run.
#[derive(Debug, Error)]
pub enum EtlError {
    /// Too many records of one input source failed to parse.
    #[error(
        "data corruption in {source_name}: dropped {dropped} of {total} records \
         (limit {max_drop_rate:.4})"
    )]
    DataCorruption {
        source_name: String,
        dropped: u64,
        total: u64,
        max_drop_rate: f64,
    },

    /// A partition of a table could not be written. Nothing of the table was published.
    #[error("failed to write table {table} (partition {partition})")]
    WriteFailure {
        table: String,
        partition: String,
        #[source]
        source: anyhow::Error,
    },

    /// Invalid or incomplete configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EtlError {
    /// Name of the table whose write failed, if this is a write failure.
    #[must_use]
    pub fn failed_table(&self) -> Option<&str> {
        match self {
            Self::WriteFailure { table, .. } => Some(table),
            _ => None,
        }
    }
}
