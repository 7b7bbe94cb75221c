//! Partitioned Parquet writer with stage-then-publish semantics.
//!
//! A table is written as a Hive-style directory tree under the output root:
//!
//! ```text
//! <root>/songs/year=2018/artist_id=AR5KOSW1187FB35FF4/part-00000.parquet
//! <root>/artists/part-00000.parquet
//! ```
//!
//! Partition columns live in the directory names only; [`read_table`] puts them
//! back when reading. Values are percent-escaped (`/`, `=`, `%` and friends)
//! and nulls are written as [`NULL_PARTITION`].
//!
//! Every table is first written into a hidden staging directory inside the
//! root. Only when all partitions succeeded is the previous table directory
//! moved aside, the staging directory renamed into place, and the old copy
//! removed. Any failure drops the staging directory and leaves the previously
//! published table untouched.

use crate::error::EtlError;
use crate::io::glob::expand_glob;
use crate::io::parquet::{batch_to_rows, read_batches, rows_to_batch, schema_of, table_schema, write_batch};
use crate::model::{ArtistRow, SongRow, SongplayRow, TimeRow, UserRow};
use anyhow::{Context, Result, anyhow, bail};
use arrow::array::{Array, ArrayRef, AsArray, StringArray, UInt32Array, new_null_array};
use arrow::compute::{cast, take};
use arrow::datatypes::{DataType, FieldRef};
use arrow::record_batch::RecordBatch;
use glob::Pattern;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory value used for null partition keys.
pub const NULL_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// Ordered partition columns of a table. Empty means unpartitioned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionSpec {
    columns: Vec<String>,
}

impl PartitionSpec {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn by(columns: &[&str]) -> Self {
        Self { columns: columns.iter().map(|c| (*c).to_string()).collect() }
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn is_partitioned(&self) -> bool {
        !self.columns.is_empty()
    }
}

/// A row type that is written as one output table.
pub trait Table: Serialize + DeserializeOwned + Send + Sync {
    /// Directory name under the output root.
    const NAME: &'static str;
    /// Epoch-millisecond columns stored as UTC timestamps.
    const TIMESTAMP_COLUMNS: &'static [&'static str] = &[];

    fn partition_spec() -> PartitionSpec;
}

impl Table for SongRow {
    const NAME: &'static str = "songs";
    fn partition_spec() -> PartitionSpec {
        PartitionSpec::by(&["year", "artist_id"])
    }
}

impl Table for ArtistRow {
    const NAME: &'static str = "artists";
    fn partition_spec() -> PartitionSpec {
        PartitionSpec::none()
    }
}

impl Table for UserRow {
    const NAME: &'static str = "users";
    fn partition_spec() -> PartitionSpec {
        PartitionSpec::none()
    }
}

impl Table for TimeRow {
    const NAME: &'static str = "time";
    const TIMESTAMP_COLUMNS: &'static [&'static str] = &["start_time"];
    fn partition_spec() -> PartitionSpec {
        PartitionSpec::by(&["year", "month"])
    }
}

impl Table for SongplayRow {
    const NAME: &'static str = "songplays";
    const TIMESTAMP_COLUMNS: &'static [&'static str] = &["start_time"];
    fn partition_spec() -> PartitionSpec {
        PartitionSpec::by(&["year", "month"])
    }
}

/// What one published table contains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    pub table: String,
    pub rows: u64,
    pub partitions: usize,
    pub files: usize,
}

fn must_escape(c: char) -> bool {
    c.is_control() || matches!(c, '"' | '#' | '%' | '\'' | '*' | '/' | ':' | '=' | '?' | '\\' | '[' | ']' | '^' | '{')
}

/// Percent-escape a partition value for use as a directory name.
///
/// A real value spelled like [`NULL_PARTITION`] gets its first `_` escaped so
/// it does not read back as null.
#[must_use]
pub fn escape_partition_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    if value == NULL_PARTITION {
        out.push_str("%5F");
        chars.next();
    }
    for c in chars {
        if must_escape(c) {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{b:02X}"));
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Reverse [`escape_partition_value`].
///
/// # Errors
/// Returns an error on a malformed `%XX` sequence.
pub fn unescape_partition_value(value: &str) -> Result<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = value
                .get(i + 1..i + 3)
                .ok_or_else(|| anyhow!("truncated escape in partition value {value:?}"))?;
            let b = u8::from_str_radix(hex, 16)
                .with_context(|| format!("bad escape in partition value {value:?}"))?;
            out.push(b);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).with_context(|| format!("partition value {value:?} is not UTF-8"))
}

/// One partition of a table: its relative directory and its rows.
struct PartitionBatch {
    rel_dir: PathBuf,
    label: String,
    batch: RecordBatch,
}

fn partition_dir(columns: &[String], values: &[Option<String>]) -> (PathBuf, String) {
    let mut dir = PathBuf::new();
    let mut label = Vec::with_capacity(columns.len());
    for (col, value) in columns.iter().zip(values) {
        let segment = match value {
            Some(v) => format!("{col}={}", escape_partition_value(v)),
            None => format!("{col}={NULL_PARTITION}"),
        };
        label.push(segment.clone());
        dir.push(segment);
    }
    (dir, label.join("/"))
}

fn split_partitions(batch: &RecordBatch, spec: &PartitionSpec) -> Result<Vec<PartitionBatch>> {
    if !spec.is_partitioned() {
        return Ok(vec![PartitionBatch {
            rel_dir: PathBuf::new(),
            label: "<unpartitioned>".to_string(),
            batch: batch.clone(),
        }]);
    }

    let schema = batch.schema();
    let mut key_columns = Vec::with_capacity(spec.columns().len());
    for col in spec.columns() {
        let array = batch
            .column_by_name(col)
            .ok_or_else(|| anyhow!("partition column {col} not in table schema"))?;
        let text = cast(array, &DataType::Utf8).with_context(|| format!("render partition column {col}"))?;
        key_columns.push(text);
    }

    let mut groups: BTreeMap<Vec<Option<String>>, Vec<u32>> = BTreeMap::new();
    for row in 0..batch.num_rows() {
        let key = key_columns
            .iter()
            .map(|a| {
                let s = a.as_string::<i32>();
                s.is_valid(row).then(|| s.value(row).to_string())
            })
            .collect();
        groups.entry(key).or_default().push(u32::try_from(row)?);
    }

    let keep: Vec<usize> = schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, f)| !spec.columns().contains(f.name()))
        .map(|(i, _)| i)
        .collect();
    let data_schema = std::sync::Arc::new(schema.project(&keep)?);

    groups
        .into_iter()
        .map(|(key, rows)| {
            let indices = UInt32Array::from(rows);
            let columns = keep
                .iter()
                .map(|&i| take(batch.column(i).as_ref(), &indices, None))
                .collect::<Result<Vec<ArrayRef>, _>>()?;
            let (rel_dir, label) = partition_dir(spec.columns(), &key);
            let batch = RecordBatch::try_new(data_schema.clone(), columns)?;
            Ok::<_, anyhow::Error>(PartitionBatch { rel_dir, label, batch })
        })
        .collect()
}

/// Write one partition into the staging tree; returns the number of files.
fn write_partition(staging: &Path, part: &PartitionBatch, max_rows_per_file: usize) -> Result<usize> {
    let dir = staging.join(&part.rel_dir);
    fs::create_dir_all(&dir).with_context(|| format!("mkdir -p {}", dir.display()))?;
    let n = part.batch.num_rows();
    let files = n.div_ceil(max_rows_per_file).max(1);
    for i in 0..files {
        let offset = i * max_rows_per_file;
        let len = max_rows_per_file.min(n - offset);
        let path = dir.join(format!("part-{i:05}.parquet"));
        write_batch(&path, &part.batch.slice(offset, len))?;
    }
    debug!(partition = %part.label, rows = n, files, "wrote partition");
    Ok(files)
}

/// Writes tables under one output root.
#[derive(Debug, Clone)]
pub struct TableWriter {
    root: PathBuf,
    max_rows_per_file: usize,
}

impl TableWriter {
    pub fn new(root: impl Into<PathBuf>, max_rows_per_file: usize) -> Self {
        Self { root: root.into(), max_rows_per_file: max_rows_per_file.max(1) }
    }

    #[must_use]
    pub fn table_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Write a [`Table`] with its own name and partition spec.
    ///
    /// # Errors
    /// See [`TableWriter::write_with_spec`].
    pub fn write<T: Table>(&self, rows: &[T]) -> Result<WriteStats> {
        self.write_with_spec(T::NAME, rows, &T::partition_spec(), T::TIMESTAMP_COLUMNS)
    }

    /// Write `rows` as table `name`, replacing any previously published copy.
    ///
    /// # Errors
    /// Returns [`EtlError::WriteFailure`] naming the failed partition. In that
    /// case the previous copy of the table is left in place.
    pub fn write_with_spec<T: Serialize + DeserializeOwned + Sync>(
        &self,
        name: &str,
        rows: &[T],
        spec: &PartitionSpec,
        timestamp_columns: &[&str],
    ) -> Result<WriteStats> {
        let failure = |partition: &str, source: anyhow::Error| EtlError::WriteFailure {
            table: name.to_string(),
            partition: partition.to_string(),
            source,
        };

        fs::create_dir_all(&self.root)
            .with_context(|| format!("mkdir -p {}", self.root.display()))
            .map_err(|e| failure("<all>", e))?;

        let fields: Vec<FieldRef> = table_schema::<T>(timestamp_columns).map_err(|e| failure("<all>", e))?;
        let batch = rows_to_batch(&fields, rows).map_err(|e| failure("<all>", e))?;
        let partitions = split_partitions(&batch, spec).map_err(|e| failure("<all>", e))?;

        let staging = tempfile::Builder::new()
            .prefix(&format!(".{name}.staging-"))
            .tempdir_in(&self.root)
            .with_context(|| format!("create staging directory in {}", self.root.display()))
            .map_err(|e| failure("<all>", e))?;

        let max_rows = self.max_rows_per_file;
        let write_one = |part: &PartitionBatch| {
            write_partition(staging.path(), part, max_rows).map_err(|e| failure(&part.label, e))
        };

        #[cfg(feature = "parallel-io")]
        let files: Vec<usize> = {
            use rayon::prelude::*;
            partitions.par_iter().map(write_one).collect::<Result<_, EtlError>>()?
        };
        #[cfg(not(feature = "parallel-io"))]
        let files: Vec<usize> = partitions.iter().map(write_one).collect::<Result<_, EtlError>>()?;

        self.publish(name, staging.path()).map_err(|e| failure("<publish>", e))?;

        let stats = WriteStats {
            table: name.to_string(),
            rows: batch.num_rows() as u64,
            partitions: if spec.is_partitioned() { partitions.len() } else { 0 },
            files: files.iter().sum(),
        };
        info!(table = name, rows = stats.rows, partitions = stats.partitions, files = stats.files, "published table");
        Ok(stats)
    }

    /// Swap the staged tree in for the published one.
    fn publish(&self, name: &str, staged: &Path) -> Result<()> {
        let target = self.table_dir(name);
        let previous = self.root.join(format!(".{name}.previous"));
        if previous.exists() {
            fs::remove_dir_all(&previous).with_context(|| format!("remove stale {}", previous.display()))?;
        }

        let had_previous = target.exists();
        if had_previous {
            fs::rename(&target, &previous)
                .with_context(|| format!("move {} aside", target.display()))?;
        }
        if let Err(e) = fs::rename(staged, &target) {
            if had_previous && let Err(restore) = fs::rename(&previous, &target) {
                warn!(table = name, error = %restore, "could not restore previous table");
            }
            return Err(e).with_context(|| format!("publish {}", target.display()));
        }
        if had_previous && let Err(e) = fs::remove_dir_all(&previous) {
            warn!(table = name, error = %e, "could not remove previous table copy");
        }
        Ok(())
    }
}

/// Read a published [`Table`] back from `root`.
///
/// # Errors
/// See [`read_table_with_spec`].
pub fn read_table<T: Table>(root: &Path) -> Result<Vec<T>> {
    read_table_with_spec(&root.join(T::NAME), &T::partition_spec(), T::TIMESTAMP_COLUMNS)
}

fn partition_values(table_dir: &Path, file: &Path, spec: &PartitionSpec) -> Result<HashMap<String, Option<String>>> {
    let rel = file
        .parent()
        .and_then(|p| p.strip_prefix(table_dir).ok())
        .ok_or_else(|| anyhow!("{} is outside {}", file.display(), table_dir.display()))?;

    let mut values = HashMap::new();
    for component in rel.components() {
        let Component::Normal(segment) = component else { continue };
        let segment = segment.to_string_lossy();
        let (col, raw) = segment
            .split_once('=')
            .ok_or_else(|| anyhow!("unexpected directory {segment} in {}", table_dir.display()))?;
        let value = if raw == NULL_PARTITION { None } else { Some(unescape_partition_value(raw)?) };
        values.insert(col.to_string(), value);
    }
    if values.len() != spec.columns().len() || spec.columns().iter().any(|c| !values.contains_key(c)) {
        bail!("{} does not match partition columns {:?}", file.display(), spec.columns());
    }
    Ok(values)
}

/// Read a partitioned table directory, restoring partition columns.
///
/// Files are visited in sorted path order.
///
/// # Errors
/// Returns an error if a file cannot be read, a directory name does not match
/// the partition columns, or the rows do not deserialize into `T`.
pub fn read_table_with_spec<T: DeserializeOwned>(
    table_dir: &Path,
    spec: &PartitionSpec,
    timestamp_columns: &[&str],
) -> Result<Vec<T>> {
    let fields = table_schema::<T>(timestamp_columns)?;
    let schema = schema_of(&fields);
    let dir = table_dir
        .to_str()
        .with_context(|| format!("non UTF-8 table path: {}", table_dir.display()))?;
    let pattern = Path::new(&Pattern::escape(dir)).join("**").join("*.parquet");

    let mut out = Vec::new();
    for file in expand_glob(&pattern.to_string_lossy())? {
        let values = partition_values(table_dir, &file, spec)?;
        for batch in read_batches(&file)? {
            let n = batch.num_rows();
            let mut columns: Vec<ArrayRef> = Vec::with_capacity(fields.len());
            for field in &fields {
                let column = match values.get(field.name()) {
                    Some(None) => new_null_array(field.data_type(), n),
                    Some(Some(v)) => {
                        let text = StringArray::from(vec![v.as_str(); n]);
                        cast(&text, field.data_type())
                            .with_context(|| format!("restore partition column {}", field.name()))?
                    }
                    None => batch
                        .column_by_name(field.name())
                        .cloned()
                        .ok_or_else(|| anyhow!("column {} missing in {}", field.name(), file.display()))?,
                };
                columns.push(column);
            }
            let full = RecordBatch::try_new(schema.clone(), columns)
                .with_context(|| format!("rebuild rows of {}", file.display()))?;
            out.extend(batch_to_rows::<T>(&full)?);
        }
    }
    Ok(out)
}
