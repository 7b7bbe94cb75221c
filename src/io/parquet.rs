//! Parquet I/O primitives powered by Serde + Arrow + Parquet.
//!
//! - [`table_schema`] infers the Arrow schema of a row type with
//!   `serde_arrow` and marks epoch-millisecond columns as UTC timestamps.
//! - [`rows_to_batch`] / [`batch_to_rows`] convert between typed rows and
//!   `RecordBatch`es.
//! - [`write_batch`] writes one batch as one Parquet file.
//! - [`read_batches`] reads every batch of one Parquet file.
//!
//! The partitioned table layout lives in [`crate::writer`].

use anyhow::{Context, Result};
use arrow::datatypes::{DataType, Field, FieldRef, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_arrow::schema::{SchemaLike, TracingOptions};
use serde_arrow::{from_record_batch, to_record_batch};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Infer the Arrow fields of `T`, typing `timestamp_columns` as
/// `Timestamp(Millisecond, "UTC")`.
///
/// Works without sample data, so empty tables still get a full schema.
///
/// # Errors
/// Returns an error if `serde_arrow` cannot trace `T`.
pub fn table_schema<T: DeserializeOwned>(timestamp_columns: &[&str]) -> Result<Vec<FieldRef>> {
    let fields = Vec::<FieldRef>::from_type::<T>(TracingOptions::default())
        .context("infer Arrow schema from row type")?;
    Ok(fields
        .into_iter()
        .map(|f| {
            if timestamp_columns.contains(&f.name().as_str()) {
                Arc::new(Field::new(
                    f.name(),
                    DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
                    f.is_nullable(),
                ))
            } else {
                f
            }
        })
        .collect())
}

/// Convert rows to a `RecordBatch` (zero rows allowed).
///
/// # Errors
/// Returns an error if a row does not fit the schema.
pub fn rows_to_batch<T: Serialize>(fields: &[FieldRef], rows: &[T]) -> Result<RecordBatch> {
    to_record_batch(fields, &rows).context("convert rows to RecordBatch")
}

/// Convert a `RecordBatch` back to typed rows.
///
/// # Errors
/// Returns an error if the batch columns do not deserialize into `T`.
pub fn batch_to_rows<T: DeserializeOwned>(batch: &RecordBatch) -> Result<Vec<T>> {
    from_record_batch(batch).context("deserialize RecordBatch rows")
}

/// Build an Arrow schema from traced fields.
#[must_use]
pub fn schema_of(fields: &[FieldRef]) -> SchemaRef {
    Arc::new(Schema::new(fields.to_vec()))
}

/// Write one batch to a new Parquet file (snappy compressed).
///
/// # Errors
/// Returns an error if the file cannot be created or the batch cannot be written.
pub fn write_batch(path: &Path, batch: &RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let props = WriterProperties::builder().set_compression(Compression::SNAPPY).build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
        .with_context(|| format!("create ArrowWriter for {}", path.display()))?;
    writer
        .write(batch)
        .with_context(|| format!("write batch to {}", path.display()))?;
    writer.close().with_context(|| format!("close {}", path.display()))?;
    Ok(())
}

/// Read all batches of a Parquet file.
///
/// # Errors
/// Returns an error if the file cannot be opened or decoded.
pub fn read_batches(path: &Path) -> Result<Vec<RecordBatch>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("open ParquetRecordBatchReader for {}", path.display()))?
        .with_batch_size(64 * 1024)
        .build()
        .context("build ParquetRecordBatchReader")?;
    reader
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("read batches from {}", path.display()))
}

/// Read a single (unpartitioned) Parquet file into typed rows.
///
/// # Errors
/// Returns an error if the file cannot be read or converted to `T`.
pub fn read_parquet_vec<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for batch in read_batches(path.as_ref())? {
        out.extend(batch_to_rows::<T>(&batch)?);
    }
    Ok(out)
}
