//! Tabular store adapter backed by SQLite.
//!
//! Every pipeline stage talks to the database through this adapter: the
//! ingestion engine writes raw CSV batches, the aggregator runs the summary
//! query, and the enrichment stage persists the final DataFrame. The
//! connection is passed explicitly into each stage, there is no process-wide
//! handle.

use crate::error::{PipelineError, Result};
use polars::prelude::*;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use tracing::debug;

/// How a table write treats pre-existing contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Drop any existing table of the same name before writing.
    Replace,
    /// Add rows to the existing table without touching prior rows.
    Append,
}

/// SQLite column affinity inferred for a CSV column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnAffinity {
    Integer,
    Real,
    Text,
}

impl ColumnAffinity {
    fn sql_type(self) -> &'static str {
        match self {
            ColumnAffinity::Integer => "INTEGER",
            ColumnAffinity::Real => "REAL",
            ColumnAffinity::Text => "TEXT",
        }
    }
}

/// Durable tabular store reached through a generic execute/query/write surface.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Ok(Self { conn })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Write one batch of CSV records under replace or append semantics.
    ///
    /// The whole batch goes through a single transaction. Empty cells are
    /// stored as NULL; non-empty cells are bound with the column's inferred
    /// affinity, falling back to text when a cell does not parse.
    pub fn write_records(
        &mut self,
        table: &str,
        header: &[String],
        affinities: &[ColumnAffinity],
        records: &[csv::StringRecord],
        mode: WriteMode,
    ) -> Result<()> {
        if header.is_empty() {
            return Err(PipelineError::Ingestion(format!(
                "table '{table}': cannot write records without a header"
            )));
        }

        let tx = self.conn.transaction()?;

        if mode == WriteMode::Replace {
            tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))?;
            let columns: Vec<String> = header
                .iter()
                .zip(affinities)
                .map(|(name, aff)| format!("{} {}", quote_ident(name), aff.sql_type()))
                .collect();
            tx.execute_batch(&format!(
                "CREATE TABLE {} ({})",
                quote_ident(table),
                columns.join(", ")
            ))?;
        }

        let placeholders: Vec<String> = (1..=header.len()).map(|i| format!("?{i}")).collect();
        let insert_sql = format!(
            "INSERT INTO {} VALUES ({})",
            quote_ident(table),
            placeholders.join(", ")
        );

        {
            let mut stmt = tx.prepare(&insert_sql)?;
            for record in records {
                if record.len() != header.len() {
                    return Err(PipelineError::Ingestion(format!(
                        "table '{table}': record has {} fields, header has {}",
                        record.len(),
                        header.len()
                    )));
                }
                let values = record
                    .iter()
                    .zip(affinities)
                    .map(|(cell, aff)| bind_cell(cell, *aff));
                stmt.execute(params_from_iter(values))?;
            }
        }

        tx.commit()?;
        debug!("Wrote {} rows into table '{}'", records.len(), table);
        Ok(())
    }

    /// Run a query and materialize the result as a polars DataFrame.
    ///
    /// Column types are promoted as values arrive: Int64 → Float64 → String.
    /// SQL NULLs become polars nulls.
    pub fn query_df(&self, sql: &str) -> Result<DataFrame> {
        let mut stmt = self.conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut columns: Vec<ColumnData> = names.iter().map(|_| ColumnData::new()).collect();

        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            for (idx, column) in columns.iter_mut().enumerate() {
                match row.get_ref(idx)? {
                    ValueRef::Null => column.push_null(),
                    ValueRef::Integer(v) => column.push_int(v),
                    ValueRef::Real(v) => column.push_real(v),
                    ValueRef::Text(bytes) => {
                        column.push_text(String::from_utf8_lossy(bytes).into_owned())
                    }
                    ValueRef::Blob(bytes) => {
                        column.push_text(String::from_utf8_lossy(bytes).into_owned())
                    }
                }
            }
        }

        let series: Vec<Series> = names
            .iter()
            .zip(columns)
            .map(|(name, data)| data.into_series(name))
            .collect();
        Ok(DataFrame::new(series)?)
    }

    /// Persist a DataFrame as a table. Drop, create and insert run inside one
    /// transaction, so a replace either completes fully or leaves the prior
    /// table untouched.
    pub fn write_df(&mut self, table: &str, df: &DataFrame, mode: WriteMode) -> Result<()> {
        let tx = self.conn.transaction()?;

        if mode == WriteMode::Replace {
            tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))?;
            let columns: Vec<String> = df
                .get_columns()
                .iter()
                .map(|s| format!("{} {}", quote_ident(s.name()), dtype_to_sql(s.dtype())))
                .collect();
            tx.execute_batch(&format!(
                "CREATE TABLE {} ({})",
                quote_ident(table),
                columns.join(", ")
            ))?;
        }

        let width = df.width();
        let placeholders: Vec<String> = (1..=width).map(|i| format!("?{i}")).collect();
        let insert_sql = format!(
            "INSERT INTO {} VALUES ({})",
            quote_ident(table),
            placeholders.join(", ")
        );

        {
            let mut stmt = tx.prepare(&insert_sql)?;
            let series = df.get_columns();
            for row in 0..df.height() {
                let mut values = Vec::with_capacity(width);
                for s in series {
                    values.push(any_value_to_sql(s.get(row)?));
                }
                stmt.execute(params_from_iter(values))?;
            }
        }

        tx.commit()?;
        debug!("Persisted {} rows into table '{}'", df.height(), table);
        Ok(())
    }

    /// Whether a table of this name exists in the store.
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Row count of a table.
    pub fn count_rows(&self, table: &str) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn bind_cell(cell: &str, affinity: ColumnAffinity) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    match affinity {
        ColumnAffinity::Integer => cell
            .parse::<i64>()
            .map(Value::Integer)
            .unwrap_or_else(|_| Value::Text(cell.to_string())),
        ColumnAffinity::Real => cell
            .parse::<f64>()
            .map(Value::Real)
            .unwrap_or_else(|_| Value::Text(cell.to_string())),
        ColumnAffinity::Text => Value::Text(cell.to_string()),
    }
}

fn dtype_to_sql(dtype: &DataType) -> &'static str {
    match dtype {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64
        | DataType::Boolean => "INTEGER",
        DataType::Float32 | DataType::Float64 => "REAL",
        _ => "TEXT",
    }
}

fn any_value_to_sql(value: AnyValue) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(v) => Value::Integer(v as i64),
        AnyValue::Int8(v) => Value::Integer(v as i64),
        AnyValue::Int16(v) => Value::Integer(v as i64),
        AnyValue::Int32(v) => Value::Integer(v as i64),
        AnyValue::Int64(v) => Value::Integer(v),
        AnyValue::UInt8(v) => Value::Integer(v as i64),
        AnyValue::UInt16(v) => Value::Integer(v as i64),
        AnyValue::UInt32(v) => Value::Integer(v as i64),
        AnyValue::UInt64(v) => Value::Integer(v as i64),
        AnyValue::Float32(v) => Value::Real(v as f64),
        AnyValue::Float64(v) => Value::Real(v),
        AnyValue::String(v) => Value::Text(v.to_string()),
        AnyValue::StringOwned(v) => Value::Text(v.to_string()),
        other => Value::Text(other.to_string()),
    }
}

/// Column accumulator for query results, promoting the type as values arrive.
enum ColumnData {
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl ColumnData {
    fn new() -> Self {
        ColumnData::Int(Vec::new())
    }

    fn push_null(&mut self) {
        match self {
            ColumnData::Int(v) => v.push(None),
            ColumnData::Float(v) => v.push(None),
            ColumnData::Text(v) => v.push(None),
        }
    }

    fn push_int(&mut self, value: i64) {
        match self {
            ColumnData::Int(v) => v.push(Some(value)),
            ColumnData::Float(v) => v.push(Some(value as f64)),
            ColumnData::Text(v) => v.push(Some(value.to_string())),
        }
    }

    fn push_real(&mut self, value: f64) {
        match self {
            ColumnData::Int(_) => {
                self.promote_to_float();
                self.push_real(value);
            }
            ColumnData::Float(v) => v.push(Some(value)),
            ColumnData::Text(v) => v.push(Some(value.to_string())),
        }
    }

    fn push_text(&mut self, value: String) {
        match self {
            ColumnData::Text(v) => v.push(Some(value)),
            _ => {
                self.promote_to_text();
                self.push_text(value);
            }
        }
    }

    fn promote_to_float(&mut self) {
        if let ColumnData::Int(values) = self {
            let promoted = values.iter().map(|v| v.map(|i| i as f64)).collect();
            *self = ColumnData::Float(promoted);
        }
    }

    fn promote_to_text(&mut self) {
        match self {
            ColumnData::Int(values) => {
                let promoted = values.iter().map(|v| v.map(|i| i.to_string())).collect();
                *self = ColumnData::Text(promoted);
            }
            ColumnData::Float(values) => {
                let promoted = values.iter().map(|v| v.map(|f| f.to_string())).collect();
                *self = ColumnData::Text(promoted);
            }
            ColumnData::Text(_) => {}
        }
    }

    fn into_series(self, name: &str) -> Series {
        match self {
            ColumnData::Int(values) => Series::new(name, values),
            ColumnData::Float(values) => Series::new(name, values),
            ColumnData::Text(values) => Series::new(name, values),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[&str]) -> csv::StringRecord {
        csv::StringRecord::from(fields.to_vec())
    }

    fn header(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn replace_then_append_accumulates_rows() {
        let mut store = Store::open_in_memory().unwrap();
        let cols = header(&["Brand", "Price"]);
        let affinities = [ColumnAffinity::Integer, ColumnAffinity::Real];

        store
            .write_records(
                "purchase_prices",
                &cols,
                &affinities,
                &[record(&["1", "9.99"]), record(&["2", "12.50"])],
                WriteMode::Replace,
            )
            .unwrap();
        store
            .write_records(
                "purchase_prices",
                &cols,
                &affinities,
                &[record(&["3", "7.25"])],
                WriteMode::Append,
            )
            .unwrap();

        assert_eq!(store.count_rows("purchase_prices").unwrap(), 3);
    }

    #[test]
    fn replace_discards_previous_contents() {
        let mut store = Store::open_in_memory().unwrap();
        let cols = header(&["Brand"]);
        let affinities = [ColumnAffinity::Integer];

        store
            .write_records(
                "sales",
                &cols,
                &affinities,
                &[record(&["1"]), record(&["2"])],
                WriteMode::Replace,
            )
            .unwrap();
        store
            .write_records(
                "sales",
                &cols,
                &affinities,
                &[record(&["3"])],
                WriteMode::Replace,
            )
            .unwrap();

        assert_eq!(store.count_rows("sales").unwrap(), 1);
    }

    #[test]
    fn empty_cells_become_nulls() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .write_records(
                "t",
                &header(&["a", "b"]),
                &[ColumnAffinity::Integer, ColumnAffinity::Text],
                &[record(&["1", ""]), record(&["", "x"])],
                WriteMode::Replace,
            )
            .unwrap();

        let df = store.query_df("SELECT * FROM t").unwrap();
        assert_eq!(df.column("a").unwrap().null_count(), 1);
        assert_eq!(df.column("b").unwrap().null_count(), 1);
    }

    #[test]
    fn query_df_promotes_mixed_int_and_real() {
        let store = Store::open_in_memory().unwrap();
        let df = store
            .query_df("SELECT 1 AS v UNION ALL SELECT 2.5")
            .unwrap();
        let v = df.column("v").unwrap();
        assert_eq!(v.dtype(), &DataType::Float64);
        assert_eq!(v.f64().unwrap().get(0).unwrap(), 1.0);
    }

    #[test]
    fn write_df_round_trips_through_query() {
        let mut store = Store::open_in_memory().unwrap();
        let df = df! [
            "VendorName" => ["A", "B"],
            "FreightCost" => [10.0, 20.0]
        ]
        .unwrap();

        store.write_df("summary", &df, WriteMode::Replace).unwrap();
        let back = store.query_df("SELECT * FROM summary").unwrap();
        assert_eq!(back.shape(), (2, 2));
        assert_eq!(
            back.column("FreightCost")
                .unwrap()
                .f64()
                .unwrap()
                .get(1)
                .unwrap(),
            20.0
        );
    }

    #[test]
    fn ragged_record_is_rejected() {
        let mut store = Store::open_in_memory().unwrap();
        let err = store
            .write_records(
                "t",
                &header(&["a", "b"]),
                &[ColumnAffinity::Text, ColumnAffinity::Text],
                &[record(&["only one"])],
                WriteMode::Replace,
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::Ingestion(_)));
    }
}
