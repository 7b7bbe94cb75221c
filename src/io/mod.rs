//! Input decoding and columnar encoding.
//!
//! - [`glob`]: resolve a dataset location into concrete files.
//! - [`compression`]: transparent gzip/zstd decoding of record files.
//! - [`records`]: lenient, validating JSON record readers.
//! - [`parquet`]: Arrow schema tracing and Parquet file IO for output rows.

pub mod compression;
pub mod glob;
pub mod parquet;
pub mod records;
