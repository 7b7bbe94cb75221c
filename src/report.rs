//! Run report: what was read, dropped, joined and published.
//!
//! The driver fills a [`RunReport`] as stages complete. It can be printed in a
//! human-readable form or saved as JSON next to the output.

use crate::io::records::ReadStats;
use crate::songplays::JoinStats;
use crate::writer::WriteStats;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// A table whose write failed and stopped the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedWrite {
    pub table: String,
    pub partition: String,
    pub error: String,
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub sources: Vec<ReadStats>,
    pub join: JoinStats,
    /// Tables published in this run, in write order.
    pub tables: Vec<WriteStats>,
    pub failed: Option<FailedWrite>,
    pub elapsed_ms: u128,
}

impl RunReport {
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&WriteStats> {
        self.tables.iter().find(|t| t.table == name)
    }

    #[must_use]
    pub fn source(&self, name: &str) -> Option<&ReadStats> {
        self.sources.iter().find(|s| s.source == name)
    }

    pub(crate) fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed_ms = elapsed.as_millis();
    }

    /// Print the report to stdout.
    pub fn print(&self) {
        println!("\n============ ETL Run Report ============");
        println!("Execution Time: {:.3}s", self.elapsed_ms as f64 / 1000.0);
        println!("----------------------------------------");
        for s in &self.sources {
            println!("source {}: {} files, {} records, {} dropped", s.source, s.files, s.total, s.dropped);
            for e in &s.error_samples {
                println!("    {e}");
            }
        }
        println!(
            "songplays join: {} plays, {} matched, {} unmatched, {} ambiguous, {} out of range",
            self.join.song_plays,
            self.join.matched,
            self.join.unmatched,
            self.join.ambiguous,
            self.join.out_of_range
        );
        println!("----------------------------------------");
        for t in &self.tables {
            println!("table {}: {} rows, {} partitions, {} files", t.table, t.rows, t.partitions, t.files);
        }
        if let Some(f) = &self.failed {
            println!("FAILED table {} (partition {}): {}", f.table, f.partition, f.error);
        }
        println!("========================================\n");
    }

    /// Save the report as pretty JSON.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("serialize run report")?;
        let mut file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        file.write_all(json.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}
