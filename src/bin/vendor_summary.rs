use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use vendor_performance::enrich::build_vendor_summary;
use vendor_performance::store::Store;
use vendor_performance::summary::SUMMARY_TABLE;

#[derive(Parser)]
#[command(name = "vendor_summary")]
#[command(about = "Build the enriched vendor sales summary from the ingested fact tables")]
struct Args {
    /// SQLite database file
    #[arg(long, default_value = "inventory.db")]
    database: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut store = Store::open(&args.database)?;
    let summary = build_vendor_summary(&mut store)?;

    info!(
        "Wrote {} rows to table '{}'",
        summary.height(),
        SUMMARY_TABLE
    );
    println!("{}", summary.head(Some(10)));
    Ok(())
}
