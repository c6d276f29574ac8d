//! Vendor summary aggregation.
//!
//! One fixed-shape query joins the ingested fact tables at (vendor, brand)
//! granularity: freight costs summed per vendor, purchase lines joined with
//! the price reference and summed per vendor/brand, sales summed per
//! vendor/brand. Purchase rows with a non-positive purchase price are
//! placeholder data and are excluded before aggregation.

use crate::error::{PipelineError, Result};
use crate::store::Store;
use polars::prelude::DataFrame;
use tracing::info;

/// Fixed name of the persisted enriched summary table.
pub const SUMMARY_TABLE: &str = "vendor_sales_summary";

const VENDOR_SUMMARY_SQL: &str = r#"
    WITH FreightSummary AS (
        SELECT
            VendorNumber,
            SUM(Freight) AS FreightCost
        FROM vendor_invoice
        GROUP BY VendorNumber
    ),
    PurchaseSummary AS (
        SELECT
            p.VendorNumber,
            p.VendorName,
            p.Brand,
            p.Description,
            p.PurchasePrice,
            pp.Volume,
            pp.Price AS ActualPrice,
            SUM(p.Quantity) AS TotalPurchaseQuantity,
            SUM(p.Dollars) AS TotalPurchaseDollars
        FROM purchases p
        JOIN purchase_prices pp
            ON p.Brand = pp.Brand
        WHERE p.PurchasePrice > 0
        GROUP BY
            p.VendorNumber, p.VendorName, p.Brand, p.Description, p.PurchasePrice, pp.Price, pp.Volume
    ),
    SalesSummary AS (
        SELECT
            VendorNo,
            Brand,
            SUM(SalesDollars) AS TotalSalesDollars,
            SUM(SalesPrice) AS TotalSalesPrice,
            SUM(SalesQuantity) AS TotalSalesQuantity,
            SUM(ExciseTax) AS TotalExciseTax
        FROM sales
        GROUP BY VendorNo, Brand
    )
    SELECT
        ps.VendorNumber,
        ps.VendorName,
        ps.Brand,
        ps.Description,
        ps.PurchasePrice,
        ps.ActualPrice,
        ps.Volume,
        ps.TotalPurchaseQuantity,
        ps.TotalPurchaseDollars,
        ss.TotalSalesQuantity,
        ss.TotalSalesDollars,
        ss.TotalSalesPrice,
        ss.TotalExciseTax,
        fs.FreightCost
    FROM PurchaseSummary ps
    LEFT JOIN SalesSummary ss
        ON ps.VendorNumber = ss.VendorNo
        AND ps.Brand = ss.Brand
    LEFT JOIN FreightSummary fs
        ON ps.VendorNumber = fs.VendorNumber
    ORDER BY ps.TotalPurchaseDollars DESC
"#;

/// Merge the purchase, sales and freight fact tables into the raw
/// vendor/brand summary, one row per (VendorNumber, Brand) pair seen in the
/// purchase data. Sales and freight aggregates are null where the left join
/// found no match; the enrichment stage fills them.
///
/// Fails hard when a fact table is missing, there is no partial result for
/// this stage.
pub fn create_vendor_summary(store: &Store) -> Result<DataFrame> {
    info!("Creating vendor summary...");
    let summary = store
        .query_df(VENDOR_SUMMARY_SQL)
        .map_err(|e| PipelineError::Aggregation(e.to_string()))?;
    info!("Vendor summary has {} vendor/brand rows", summary.height());
    Ok(summary)
}
