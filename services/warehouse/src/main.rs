//! Warehouse Service - Builds the ratings star schema
//!
//! Usage:
//!   # Everything from .env / environment:
//!   cargo run --bin warehouse
//!
//!   # Explicit inputs with a row cap:
//!   cargo run --bin warehouse -- --ratings combined_data_1.txt,combined_data_2.txt \
//!       --titles movie_titles.csv --row-cap 1000000
//!
//!   # Check that a rerun reproduces the existing output:
//!   cargo run --bin warehouse -- --verify

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use warehouse::{PipelineConfig, RunSummary};

#[derive(Parser, Debug)]
#[command(name = "warehouse", about = "Builds dimension and fact tables from the ratings dataset")]
struct Args {
    /// Ratings source files, comma-separated, processed in order
    #[arg(long, value_delimiter = ',')]
    ratings: Vec<PathBuf>,

    /// Title reference file
    #[arg(long)]
    titles: Option<PathBuf>,

    /// Output directory for the warehouse tables
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Directory for the intermediate rating stream
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Maximum fact rows ("none" for unbounded)
    #[arg(long)]
    row_cap: Option<String>,

    /// Records buffered in memory per flush
    #[arg(long)]
    chunk_size: Option<String>,

    /// Encoding for input lines that are not valid UTF-8
    #[arg(long)]
    encoding: Option<String>,

    /// Verify mode - rebuild and compare with the existing manifest
    #[arg(long, default_value = "false")]
    verify: bool,
}

impl Args {
    /// Command-line value for a config key, if given
    fn override_for(&self, key: &str) -> Option<String> {
        let path = |p: &Option<PathBuf>| p.as_ref().map(|p| p.to_string_lossy().to_string());
        match key {
            "RATINGS_FILES" if !self.ratings.is_empty() => Some(
                self.ratings
                    .iter()
                    .map(|p| p.to_string_lossy().to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            "TITLES_FILE" => path(&self.titles),
            "OUTPUT_DIR" => path(&self.output_dir),
            "SCRATCH_DIR" => path(&self.scratch_dir),
            "ROW_CAP" => self.row_cap.clone(),
            "CHUNK_SIZE" => self.chunk_size.clone(),
            "SOURCE_ENCODING" => self.encoding.clone(),
            _ => None,
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!("\n=== Warehouse Build Complete ===");
    println!("{:-<60}", "");
    for table in &summary.manifest.tables {
        println!("  {:<14} {:>12} rows  {}", table.name, table.rows, table.file);
    }
    println!("{:-<60}", "");
    println!("Ratings extracted:       {}", summary.records_extracted);
    println!("Unparseable dates:       {}", summary.unparseable_dates);
    println!("Facts dropped (no date): {}", summary.dropped_unresolved);
    println!("Facts with unknown movie: {}", summary.orphan_movies);
    match summary.manifest.row_cap {
        Some(cap) => println!(
            "Row cap:                 {} ({})",
            cap,
            if summary.cap_reached { "reached" } else { "not reached" }
        ),
        None => println!("Row cap:                 unbounded"),
    }
    println!("Manifest: {}", summary.manifest_path.display());
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = PipelineConfig::from_lookup(|key| {
        args.override_for(key).or_else(|| std::env::var(key).ok())
    })
    .context("Invalid configuration")?;

    println!("=== Ratings Warehouse ===");
    println!("Ratings sources: {}", config.ratings_files.len());
    println!("Titles: {}", config.titles_file.display());
    println!("Output: {}", config.output_dir.display());
    println!("Mode: {}", if args.verify { "verify" } else { "build" });

    if args.verify {
        let mismatches = warehouse::verify(&config).context("Verification run failed")?;
        if mismatches.is_empty() {
            println!("\nVerified: rebuild matches {}", config.manifest_path().display());
            return Ok(());
        }
        for mismatch in &mismatches {
            eprintln!("  ✗ {}", mismatch);
        }
        anyhow::bail!("Rebuild differs from existing output in {} place(s)", mismatches.len());
    }

    let summary = warehouse::run(&config).context("Warehouse build failed")?;
    print_summary(&summary);
    Ok(())
}
