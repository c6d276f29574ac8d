//! Vendor performance pipeline: chunked CSV ingestion into a SQLite-backed
//! tabular store, followed by a vendor/brand sales and purchasing summary
//! with derived profitability metrics.

pub mod enrich;
pub mod error;
pub mod ingestion;
pub mod store;
pub mod summary;

pub use error::{PipelineError, Result};
pub use store::{Store, WriteMode};
