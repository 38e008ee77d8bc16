//! Result persistence.
//!
//! The CSV sink appends one row per cycle and reopens the file for every
//! row, so a crash never loses completed cycles. Write failures are logged
//! and the monitor keeps going.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, error, info};

use super::collector::CycleResult;

/// Timestamp format of the first CSV column.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Receives every finalized cycle.
pub trait ResultSink {
    /// Persists one cycle. Must not fail the caller.
    fn emit(&mut self, row_label: &str, cycle: &CycleResult);
}

/// Appends cycles to a CSV file: `timestamp,region,<region names...>`.
pub struct CsvSink {
    path: PathBuf,
    region_names: Vec<String>,
    absent_marker: String,
    header_checked: bool,
}

impl CsvSink {
    pub fn new(path: PathBuf, region_names: Vec<String>, absent_marker: String) -> Self {
        Self {
            path,
            region_names,
            absent_marker,
            header_checked: false,
        }
    }

    pub fn header(&self) -> String {
        let mut columns = vec!["timestamp".to_string(), "region".to_string()];
        columns.extend(self.region_names.iter().cloned());
        columns.join(",")
    }

    /// Formats one data row without the trailing newline.
    pub fn format_row(&self, row_label: &str, cycle: &CycleResult) -> String {
        let mut fields = Vec::with_capacity(cycle.results.len() + 2);
        fields.push(cycle.timestamp.format(TIMESTAMP_FORMAT).to_string());
        fields.push(row_label.to_string());
        for value in cycle.values() {
            fields.push(match value {
                Some(v) => v.to_string(),
                None => self.absent_marker.clone(),
            });
        }
        fields.join(",")
    }

    /// Writes the header if the file is missing or empty.
    ///
    /// An existing file with content is left alone.
    fn ensure_header(&mut self) -> Result<()> {
        if self.header_checked {
            return Ok(());
        }

        let has_content = fs::metadata(&self.path)
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if !has_content {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).context("Failed to create CSV directory")?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .context("Failed to create CSV file")?;
            writeln!(file, "{}", self.header()).context("Failed to write CSV header")?;
            info!("Created {}", self.path.display());
        }

        self.header_checked = true;
        Ok(())
    }

    fn append(&mut self, row_label: &str, cycle: &CycleResult) -> Result<()> {
        self.ensure_header()?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open CSV for append")?;
        writeln!(file, "{}", self.format_row(row_label, cycle)).context("Failed to write CSV row")?;
        Ok(())
    }
}

impl ResultSink for CsvSink {
    fn emit(&mut self, row_label: &str, cycle: &CycleResult) {
        match self.append(row_label, cycle) {
            Ok(()) => debug!("cycle {} written to {}", cycle.cycle, self.path.display()),
            Err(e) => {
                // Retry the header check next time in case the file was removed.
                self.header_checked = false;
                error!(
                    "cycle {}: failed to write {}: {:#}",
                    cycle.cycle,
                    self.path.display(),
                    e
                );
            }
        }
    }
}
