use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use vendor_performance::ingestion::load_raw_data;
use vendor_performance::store::Store;

#[derive(Parser)]
#[command(name = "ingest")]
#[command(about = "Load raw CSV files into the inventory database")]
struct Args {
    /// Directory containing the raw CSV files (default: ./data)
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// SQLite database file
    #[arg(long, default_value = "inventory.db")]
    database: PathBuf,

    /// Rows per ingestion batch
    #[arg(long, default_value_t = 100_000)]
    batch_size: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut store = Store::open(&args.database)?;
    let report = load_raw_data(&mut store, &args.data_dir, args.batch_size)?;

    info!("Ingestion report:\n{}", serde_json::to_string_pretty(&report)?);
    if report.failures() > 0 {
        warn!("{} file(s) failed to ingest", report.failures());
    }
    Ok(())
}
