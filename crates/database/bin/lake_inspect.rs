use anyhow::{Context, Result};
use clap::Parser;
use lake_database::Dataset;
use serde_json::Map;
use tracing_subscriber::EnvFilter;

/// Inspect a run directory: rebuild table manifests and summarise what is indexed.
#[derive(Parser, Debug, PartialEq)]
#[command(name = "lake_inspect")]
struct Args {
    /// Run to inspect, resolved under the configured root directory
    run_id: String,

    /// Tables whose manifest is rebuilt from the parts on disk
    #[arg(long, num_args = 1..)]
    rebuild: Vec<String>,

    /// Write the run bundle manifest after the summary
    #[arg(long)]
    bundle: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let ds = Dataset::from_env(&args.run_id).context("failed to open dataset")?;

    for table in &args.rebuild {
        let m = ds
            .rebuild_manifest(table)
            .with_context(|| format!("failed to rebuild manifest for {table}"))?;
        println!("rebuilt {table}: {} buckets, {} rows", m.partitions.len(), m.total_rows());
    }

    let tables = ds.tables().context("failed to list tables")?;
    if tables.is_empty() {
        println!("run {} has no tables under {}", ds.run_id(), ds.settings().root_dir.display());
    }
    for table in &tables {
        let Some(m) = ds.manifest(table)? else {
            continue;
        };
        let range = m
            .tick_range()
            .map(|(lo, hi)| format!("{lo}..={hi}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{table:<32} rows={:<10} bytes={:<12} buckets={:<6} ticks={range}",
            m.total_rows(),
            m.total_bytes(),
            m.partitions.len()
        );
    }

    if args.bundle {
        let bundle = ds
            .write_bundle_manifest(Map::new())
            .context("failed to write bundle manifest")?;
        println!(
            "bundle manifest written: {} tables, git={}",
            bundle.tables.len(),
            bundle.run.git.sha.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}
