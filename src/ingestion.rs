//! Chunked CSV ingestion.
//!
//! Streams delimited source files into the store in bounded batches so an
//! arbitrarily large file never has to fit in memory. The first batch of a
//! file replaces any existing table of the same name, later batches append.
//! The orchestrator walks a data directory and isolates failures at file
//! granularity: one bad file never blocks the rest.

use crate::error::{PipelineError, Result};
use crate::store::{ColumnAffinity, Store, WriteMode};
use chrono::{DateTime, Utc};
use csv::StringRecord;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, warn};

/// Outcome of ingesting one source file.
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    /// Source file name.
    pub file: String,
    /// Target table derived from the file name.
    pub table: String,
    /// Rows written before success or failure.
    pub rows_ingested: usize,
    /// Failure reason, if the file did not ingest cleanly.
    pub error: Option<String>,
}

impl FileOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Run report for one orchestrator pass over the data directory.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub started_at: DateTime<Utc>,
    pub duration_minutes: f64,
    pub files: Vec<FileOutcome>,
}

impl IngestionReport {
    pub fn failures(&self) -> usize {
        self.files.iter().filter(|f| !f.succeeded()).count()
    }
}

/// Stream one CSV file into the store in batches of at most `batch_size` rows.
///
/// Column names come from the file header; column affinities are inferred
/// once, from the first batch, and applied to every batch of the file. The
/// first write replaces any prior table of the same name, later writes
/// append. On a failed write the error propagates immediately and the table
/// keeps whatever prefix of the file was already written.
///
/// Returns the number of rows written.
pub fn ingest_csv_in_batches(
    store: &mut Store,
    file_path: &Path,
    table_name: &str,
    batch_size: usize,
) -> Result<usize> {
    let (rows, outcome) = stream_batches(store, file_path, table_name, batch_size);
    outcome.map(|()| rows)
}

/// Batch loop shared with the orchestrator, which needs the number of rows
/// already written even when the file fails midway (the table then holds
/// exactly that prefix of the file).
fn stream_batches(
    store: &mut Store,
    file_path: &Path,
    table_name: &str,
    batch_size: usize,
) -> (usize, Result<()>) {
    let mut total_rows = 0usize;
    let outcome = (|| -> Result<()> {
        if batch_size == 0 {
            return Err(PipelineError::Config(
                "batch_size must be at least 1".to_string(),
            ));
        }

        let mut reader = csv::Reader::from_path(file_path)?;
        let header: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();

        let mut records = reader.records();
        let mut affinities: Vec<ColumnAffinity> = Vec::new();
        let mut first_batch = true;

        loop {
            let mut batch: Vec<StringRecord> = Vec::with_capacity(batch_size);
            while batch.len() < batch_size {
                match records.next() {
                    Some(record) => batch.push(record?),
                    None => break,
                }
            }

            if batch.is_empty() {
                if first_batch {
                    // Header-only file: materialize the empty table so the
                    // target still mirrors the source exactly.
                    let affinities = vec![ColumnAffinity::Text; header.len()];
                    store.write_records(
                        table_name,
                        &header,
                        &affinities,
                        &[],
                        WriteMode::Replace,
                    )?;
                    warn!("File '{}' has no data rows", file_path.display());
                }
                break;
            }

            if first_batch {
                affinities = infer_affinities(&batch, header.len());
            }
            let mode = if first_batch {
                WriteMode::Replace
            } else {
                WriteMode::Append
            };

            store.write_records(table_name, &header, &affinities, &batch, mode)?;
            total_rows += batch.len();
            first_batch = false;
        }

        Ok(())
    })();
    (total_rows, outcome)
}

/// Infer a SQLite affinity per column from the rows of the first batch.
///
/// A column where every non-empty cell parses as an integer is INTEGER, a
/// column where every non-empty cell parses as a number is REAL, anything
/// else (including all-empty columns) is TEXT.
fn infer_affinities(records: &[StringRecord], width: usize) -> Vec<ColumnAffinity> {
    #[derive(Default)]
    struct CellStats {
        non_empty: usize,
        integers: usize,
        numerics: usize,
    }

    let mut stats: Vec<CellStats> = (0..width).map(|_| CellStats::default()).collect();
    for record in records {
        for (idx, cell) in record.iter().enumerate().take(width) {
            if cell.is_empty() {
                continue;
            }
            let s = &mut stats[idx];
            s.non_empty += 1;
            if cell.parse::<i64>().is_ok() {
                s.integers += 1;
                s.numerics += 1;
            } else if cell.parse::<f64>().is_ok() {
                s.numerics += 1;
            }
        }
    }

    stats
        .iter()
        .map(|s| {
            if s.non_empty == 0 {
                ColumnAffinity::Text
            } else if s.integers == s.non_empty {
                ColumnAffinity::Integer
            } else if s.numerics == s.non_empty {
                ColumnAffinity::Real
            } else {
                ColumnAffinity::Text
            }
        })
        .collect()
}

/// Ingest every CSV file in `data_dir`, one table per file.
///
/// A missing directory is a configuration error reported before any file is
/// touched. Per-file failures are logged and recorded in the report; the
/// remaining files still process. File order is whatever the directory
/// listing yields.
pub fn load_raw_data(
    store: &mut Store,
    data_dir: &Path,
    batch_size: usize,
) -> Result<IngestionReport> {
    if !data_dir.is_dir() {
        return Err(PipelineError::Config(format!(
            "data directory '{}' does not exist",
            data_dir.display()
        )));
    }

    info!("Loading raw CSV files from '{}'", data_dir.display());
    let started_at = Utc::now();
    let start = Instant::now();
    let mut outcomes = Vec::new();

    for entry in std::fs::read_dir(data_dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let table_name = path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        info!("Starting chunked ingestion for file: {}", file_name);
        match stream_batches(store, &path, &table_name, batch_size) {
            (rows, Ok(())) => {
                info!(
                    "Ingested {} rows from '{}' into table '{}'",
                    rows, file_name, table_name
                );
                outcomes.push(FileOutcome {
                    file: file_name,
                    table: table_name,
                    rows_ingested: rows,
                    error: None,
                });
            }
            (rows, Err(e)) => {
                error!(
                    "Failed to ingest file '{}' after {} rows: {}",
                    file_name, rows, e
                );
                outcomes.push(FileOutcome {
                    file: file_name,
                    table: table_name,
                    rows_ingested: rows,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let duration_minutes = start.elapsed().as_secs_f64() / 60.0;
    info!("Finished loading raw CSV files");
    info!("Total time taken: {:.2} minutes", duration_minutes);

    Ok(IngestionReport {
        started_at,
        duration_minutes,
        files: outcomes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[&str]) -> StringRecord {
        StringRecord::from(fields.to_vec())
    }

    #[test]
    fn affinity_all_integers() {
        let batch = vec![record(&["1", "2"]), record(&["3", ""])];
        let affinities = infer_affinities(&batch, 2);
        assert_eq!(
            affinities,
            vec![ColumnAffinity::Integer, ColumnAffinity::Integer]
        );
    }

    #[test]
    fn affinity_mixed_numeric_is_real() {
        let batch = vec![record(&["1"]), record(&["2.5"])];
        assert_eq!(infer_affinities(&batch, 1), vec![ColumnAffinity::Real]);
    }

    #[test]
    fn affinity_non_numeric_is_text() {
        let batch = vec![record(&["1"]), record(&["n/a"])];
        assert_eq!(infer_affinities(&batch, 1), vec![ColumnAffinity::Text]);
    }

    #[test]
    fn affinity_all_empty_is_text() {
        let batch = vec![record(&[""]), record(&[""])];
        assert_eq!(infer_affinities(&batch, 1), vec![ColumnAffinity::Text]);
    }

    #[test]
    fn zero_batch_size_is_a_config_error() {
        let mut store = Store::open_in_memory().unwrap();
        let err =
            ingest_csv_in_batches(&mut store, Path::new("does-not-matter.csv"), "t", 0)
                .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
