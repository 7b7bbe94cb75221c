//! Transparent decompression of raw input files.
//!
//! Raw catalog and log dumps are often shipped compressed. [`open_input`]
//! detects the codec and wraps the file in a decoder so record readers only
//! ever see plain JSON text.
//!
//! Detection is extension first (`.gz`, `.zst`), then magic bytes, so a
//! compressed file with a plain `.json` name is still read correctly.
//!
//! Built-in codecs, each behind a feature flag:
//! - **Gzip** via `flate2` (feature `compression-gzip`)
//! - **Zstd** via `zstd` (feature `compression-zstd`)

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// A decompression codec for input files.
pub trait CompressionCodec: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lowercase extensions including the leading dot.
    fn extensions(&self) -> &'static [&'static str];

    fn magic_bytes(&self) -> &'static [u8];

    fn wrap_reader(&self, reader: Box<dyn Read>) -> std::io::Result<Box<dyn Read>>;
}

static CODECS: &[&dyn CompressionCodec] = &[
    #[cfg(feature = "compression-gzip")]
    &GzipCodec,
    #[cfg(feature = "compression-zstd")]
    &ZstdCodec,
];

fn codecs() -> &'static [&'static dyn CompressionCodec] {
    CODECS
}

/// Extensions (including compressed variants) accepted as record files.
#[must_use]
pub fn is_record_file(path: &Path) -> bool {
    let name = path.to_string_lossy().to_lowercase();
    let name = codecs()
        .iter()
        .flat_map(|c| c.extensions().iter())
        .find_map(|ext| name.strip_suffix(*ext))
        .unwrap_or(&name);
    name.ends_with(".json") || name.ends_with(".jsonl")
}

fn detect_from_extension(path: &Path) -> Option<&'static dyn CompressionCodec> {
    let name = path.to_string_lossy().to_lowercase();
    codecs()
        .iter()
        .copied()
        .find(|c| c.extensions().iter().any(|ext| name.ends_with(ext)))
}

fn detect_from_magic<R: BufRead>(reader: &mut R) -> Option<&'static dyn CompressionCodec> {
    let buf = reader.fill_buf().ok()?;
    if buf.is_empty() {
        return None;
    }
    codecs().iter().copied().find(|c| buf.starts_with(c.magic_bytes()))
}

/// Open `path` for reading, decompressing if a codec is detected.
///
/// # Errors
/// Returns an error if the file cannot be opened or the decoder cannot be set up.
pub fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;

    if let Some(codec) = detect_from_extension(path) {
        return codec
            .wrap_reader(Box::new(file))
            .with_context(|| format!("wrap {} with {} codec", path.display(), codec.name()));
    }

    let mut buffered = BufReader::new(file);
    if let Some(codec) = detect_from_magic(&mut buffered) {
        return codec
            .wrap_reader(Box::new(buffered))
            .with_context(|| format!("wrap {} with {} codec", path.display(), codec.name()));
    }
    Ok(Box::new(buffered))
}

#[cfg(feature = "compression-gzip")]
struct GzipCodec;

#[cfg(feature = "compression-gzip")]
impl CompressionCodec for GzipCodec {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".gz", ".gzip"]
    }

    fn magic_bytes(&self) -> &'static [u8] {
        &[0x1f, 0x8b]
    }

    fn wrap_reader(&self, reader: Box<dyn Read>) -> std::io::Result<Box<dyn Read>> {
        use flate2::read::MultiGzDecoder;
        Ok(Box::new(MultiGzDecoder::new(reader)))
    }
}

#[cfg(feature = "compression-zstd")]
struct ZstdCodec;

#[cfg(feature = "compression-zstd")]
impl CompressionCodec for ZstdCodec {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".zst", ".zstd"]
    }

    fn magic_bytes(&self) -> &'static [u8] {
        &[0x28, 0xb5, 0x2f, 0xfd]
    }

    fn wrap_reader(&self, reader: Box<dyn Read>) -> std::io::Result<Box<dyn Read>> {
        zstd::stream::read::Decoder::new(reader).map(|d| Box::new(d) as Box<dyn Read>)
    }
}
