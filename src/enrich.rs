//! Summary enrichment.
//!
//! Takes the raw vendor/brand summary and produces the final analytical
//! table: Volume coerced to float, nulls filled, vendor names trimmed, and
//! the derived profitability metrics computed with safe division. The order
//! of the steps matters: the metrics assume nulls are already zeros.

use crate::error::{PipelineError, Result};
use crate::store::{Store, WriteMode};
use crate::summary::{create_vendor_summary, SUMMARY_TABLE};
use polars::prelude::*;
use tracing::{debug, info};

/// Clean the raw summary and add the derived metric columns.
///
/// Derived metrics that divide by zero come out as ±infinity and are
/// normalized to zero. A 0/0 division yields NaN and is deliberately left
/// alone; only infinite values are replaced.
pub fn clean_summary(mut df: DataFrame) -> Result<DataFrame> {
    // Source data sometimes carries Volume as text. A value that does not
    // parse is a coercion failure, not missing data: the cast would turn it
    // into a fresh null, so any null the cast introduces is an error.
    let raw_volume = df.column("Volume")?;
    let volume = raw_volume.cast(&DataType::Float64)?;
    if volume.null_count() > raw_volume.null_count() {
        return Err(PipelineError::Enrichment(
            "Volume is not numeric-coercible".to_string(),
        ));
    }
    df.replace("Volume", volume)?;

    df = fill_missing(df)?;

    for name in ["VendorName", "Description"] {
        let column = df.column(name)?;
        let trimmed = if column.dtype() == &DataType::String {
            trim_column(column)?
        } else {
            // A zero-row summary types its text columns as integers; keep
            // the name columns as (empty) strings.
            column.cast(&DataType::String)?
        };
        df.replace(name, trimmed)?;
    }

    let sales_dollars = numeric_values(&df, "TotalSalesDollars")?;
    let purchase_dollars = numeric_values(&df, "TotalPurchaseDollars")?;
    let sales_quantity = numeric_values(&df, "TotalSalesQuantity")?;
    let purchase_quantity = numeric_values(&df, "TotalPurchaseQuantity")?;

    let gross_profit: Vec<f64> = sales_dollars
        .iter()
        .zip(&purchase_dollars)
        .map(|(s, p)| s - p)
        .collect();
    let profit_margin: Vec<f64> = gross_profit
        .iter()
        .zip(&sales_dollars)
        .map(|(g, s)| zero_if_infinite(g / s * 100.0))
        .collect();
    let stock_turnover: Vec<f64> = sales_quantity
        .iter()
        .zip(&purchase_quantity)
        .map(|(s, p)| zero_if_infinite(s / p))
        .collect();
    let sales_to_purchase: Vec<f64> = sales_dollars
        .iter()
        .zip(&purchase_dollars)
        .map(|(s, p)| zero_if_infinite(s / p))
        .collect();

    df.with_column(Series::new("GrossProfit", gross_profit))?;
    df.with_column(Series::new("ProfitMargin", profit_margin))?;
    df.with_column(Series::new("StockTurnover", stock_turnover))?;
    df.with_column(Series::new("SalesToPurchaseRatio", sales_to_purchase))?;

    Ok(df)
}

/// Run the full summary stage: aggregate the fact tables, clean the result
/// and persist it under the fixed summary table name.
///
/// The replace of the summary table happens last, inside one transaction, so
/// any failure up to that point leaves the previous summary untouched.
pub fn build_vendor_summary(store: &mut Store) -> Result<DataFrame> {
    let raw = create_vendor_summary(store)?;
    debug!("Raw summary head:\n{}", raw.head(Some(5)));

    info!("Cleaning data...");
    let clean = clean_summary(raw).map_err(|e| match e {
        PipelineError::Enrichment(_) => e,
        other => PipelineError::Enrichment(other.to_string()),
    })?;
    debug!("Clean summary head:\n{}", clean.head(Some(5)));

    info!("Persisting table '{}'...", SUMMARY_TABLE);
    store
        .write_df(SUMMARY_TABLE, &clean, WriteMode::Replace)
        .map_err(|e| PipelineError::Enrichment(e.to_string()))?;
    info!("Completed vendor summary");
    Ok(clean)
}

/// Fill nulls across the whole relation: numeric columns with zero, string
/// columns with the empty string. Only the nullable sales/freight aggregates
/// are expected to carry nulls in practice.
fn fill_missing(mut df: DataFrame) -> Result<DataFrame> {
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    for name in names {
        let column = df.column(&name)?;
        if column.null_count() == 0 {
            continue;
        }
        let filled = match column.dtype() {
            DataType::String => {
                let values = column.str()?;
                let mut out: StringChunked =
                    values.into_iter().map(|v| Some(v.unwrap_or(""))).collect();
                out.rename(&name);
                out.into_series()
            }
            dtype if dtype.is_numeric() => column.fill_null(FillNullStrategy::Zero)?,
            _ => column.clone(),
        };
        df.replace(&name, filled)?;
    }
    Ok(df)
}

fn trim_column(column: &Series) -> Result<Series> {
    let values = column.str()?;
    let mut trimmed: StringChunked = values.into_iter().map(|v| v.map(str::trim)).collect();
    trimmed.rename(column.name());
    Ok(trimmed.into_series())
}

fn numeric_values(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let values = df.column(name)?.cast(&DataType::Float64)?;
    Ok(values
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(0.0))
        .collect())
}

fn zero_if_infinite(value: f64) -> f64 {
    if value.is_infinite() {
        0.0
    } else {
        value
    }
}
