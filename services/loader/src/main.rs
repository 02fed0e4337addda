//! Loader Service - Loads finished warehouse tables into PostgreSQL
//!
//! Responsibilities:
//! - Read the run manifest written by the warehouse service
//! - Check every table file against its manifest hash and row count
//! - Create the star-schema tables if missing and replace their contents
//! - Insert rows in multi-row batches inside one transaction
//! - Track each load in `load_runs` for auditing
//!
//! Usage:
//!   cargo run --bin loader -- --manifest data/warehouse/manifest.json
//!   cargo run --bin loader -- --dry-run

use anyhow::{Context, Result};
use clap::Parser;
use serde::de::DeserializeOwned;
use sqlx::postgres::PgPoolOptions;
use sqlx::query_builder::Separated;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use warehouse::{DateRow, FactRow, Manifest, MovieRow, Table, TableArtifact, UserRow};

/// Postgres caps a statement at 65535 bind parameters
const MAX_BIND_PARAMS: usize = 65_535;

#[derive(Parser, Debug)]
#[command(name = "loader", about = "Loads warehouse tables into PostgreSQL")]
struct Args {
    /// Run manifest (default: $OUTPUT_DIR/manifest.json)
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Rows per INSERT statement
    #[arg(long, default_value = "5000")]
    batch_size: usize,

    /// Dry run - validate files without touching the database
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

#[derive(Debug, Clone)]
struct Config {
    db_url: Option<String>,
    output_dir: PathBuf,
}

impl Config {
    fn from_env() -> Self {
        Self {
            db_url: std::env::var("DB_URL").ok(),
            output_dir: PathBuf::from(
                std::env::var("OUTPUT_DIR")
                    .unwrap_or_else(|_| warehouse::config::DEFAULT_OUTPUT_DIR.to_string()),
            ),
        }
    }
}

// =============================================================================
// Table mapping
// =============================================================================

/// A warehouse table with its Postgres definition
trait PgTable: Table + DeserializeOwned + Send {
    const COLUMNS: usize;
    const DDL: &'static str;

    fn bind(self, row: &mut Separated<'_, 'static, Postgres, &'static str>);

    fn insert_prefix() -> String {
        format!("INSERT INTO {} ({}) ", Self::NAME, Self::HEADER.join(", "))
    }
}

impl PgTable for MovieRow {
    const COLUMNS: usize = 3;
    const DDL: &'static str = r#"
        CREATE TABLE IF NOT EXISTS dim_movie (
            movie_id BIGINT PRIMARY KEY,
            year_of_release INTEGER NOT NULL,
            title TEXT NOT NULL
        )"#;

    fn bind(self, row: &mut Separated<'_, 'static, Postgres, &'static str>) {
        row.push_bind(self.movie_id)
            .push_bind(self.year_of_release)
            .push_bind(self.title);
    }
}

impl PgTable for UserRow {
    const COLUMNS: usize = 1;
    const DDL: &'static str = r#"
        CREATE TABLE IF NOT EXISTS dim_user (
            customer_id BIGINT PRIMARY KEY
        )"#;

    fn bind(self, row: &mut Separated<'_, 'static, Postgres, &'static str>) {
        row.push_bind(self.customer_id);
    }
}

impl PgTable for DateRow {
    const COLUMNS: usize = 7;
    const DDL: &'static str = r#"
        CREATE TABLE IF NOT EXISTS dim_date (
            date_key INTEGER PRIMARY KEY,
            full_date DATE NOT NULL,
            year INTEGER NOT NULL,
            quarter SMALLINT NOT NULL,
            month SMALLINT NOT NULL,
            day SMALLINT NOT NULL,
            week_of_year SMALLINT NOT NULL
        )"#;

    fn bind(self, row: &mut Separated<'_, 'static, Postgres, &'static str>) {
        row.push_bind(self.date_key)
            .push_bind(self.full_date)
            .push_bind(self.year)
            .push_bind(self.quarter as i16)
            .push_bind(self.month as i16)
            .push_bind(self.day as i16)
            .push_bind(self.week_of_year as i16);
    }
}

impl PgTable for FactRow {
    const COLUMNS: usize = 4;
    const DDL: &'static str = r#"
        CREATE TABLE IF NOT EXISTS fact_rating (
            customer_id BIGINT NOT NULL REFERENCES dim_user (customer_id),
            movie_id BIGINT NOT NULL,
            date_key INTEGER NOT NULL REFERENCES dim_date (date_key),
            rating_value SMALLINT NOT NULL
        )"#;

    fn bind(self, row: &mut Separated<'_, 'static, Postgres, &'static str>) {
        row.push_bind(self.customer_id)
            .push_bind(self.movie_id)
            .push_bind(self.date_key)
            .push_bind(self.rating_value as i16);
    }
}

const LOAD_RUNS_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS load_runs (
        load_run_id UUID PRIMARY KEY,
        manifest_path TEXT NOT NULL,
        started_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        finished_at TIMESTAMPTZ,
        status TEXT NOT NULL,
        error TEXT,
        detail JSONB NOT NULL DEFAULT '{}'
    )"#;

/// Rows per statement, clamped to the bind parameter limit
fn effective_batch_size<T: PgTable>(requested: usize) -> usize {
    requested.clamp(1, MAX_BIND_PARAMS / T::COLUMNS)
}

// =============================================================================
// File validation
// =============================================================================

fn artifact<'m>(manifest: &'m Manifest, name: &str) -> Result<&'m TableArtifact> {
    manifest
        .table(name)
        .with_context(|| format!("Manifest has no '{}' table", name))
}

/// Check the file hash and count its rows without loading them
fn validate_table<T: PgTable>(dir: &Path, artifact: &TableArtifact) -> Result<u64> {
    let path = dir.join(&artifact.file);
    let sha256 = warehouse::file_sha256(&path)?;
    if sha256 != artifact.sha256 {
        anyhow::bail!(
            "{} does not match the manifest (expected {}, found {})",
            path.display(),
            artifact.sha256,
            sha256
        );
    }

    let mut reader = csv::Reader::from_path(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut rows = 0u64;
    for row in reader.deserialize::<T>() {
        row.with_context(|| format!("Bad row in {} after {} rows", path.display(), rows))?;
        rows += 1;
    }
    if rows != artifact.rows {
        anyhow::bail!(
            "{}: manifest says {} rows, file has {}",
            artifact.file,
            artifact.rows,
            rows
        );
    }
    Ok(rows)
}

// =============================================================================
// Database
// =============================================================================

async fn create_load_run(pool: &PgPool, manifest_path: &Path) -> Result<Uuid> {
    let load_run_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO load_runs (load_run_id, manifest_path, status)
        VALUES ($1, $2, 'running')
        "#,
    )
    .bind(load_run_id)
    .bind(manifest_path.to_string_lossy().to_string())
    .execute(pool)
    .await?;
    Ok(load_run_id)
}

async fn finish_load_run(
    pool: &PgPool,
    load_run_id: Uuid,
    status: &str,
    error: Option<&str>,
    detail: serde_json::Value,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE load_runs
        SET finished_at = now(), status = $2, error = $3, detail = detail || $4
        WHERE load_run_id = $1
        "#,
    )
    .bind(load_run_id)
    .bind(status)
    .bind(error)
    .bind(detail)
    .execute(pool)
    .await?;
    Ok(())
}

async fn insert_batch<T: PgTable>(tx: &mut Transaction<'_, Postgres>, rows: Vec<T>) -> Result<()> {
    let mut query: QueryBuilder<'static, Postgres> = QueryBuilder::new(T::insert_prefix());
    query.push_values(rows, |mut row, record| record.bind(&mut row));
    query
        .build()
        .execute(&mut **tx)
        .await
        .with_context(|| format!("Insert into {} failed", T::NAME))?;
    Ok(())
}

/// Stream one table file into the database in batches
async fn load_table<T: PgTable>(
    tx: &mut Transaction<'_, Postgres>,
    dir: &Path,
    artifact: &TableArtifact,
    batch_size: usize,
) -> Result<u64> {
    let path = dir.join(&artifact.file);
    let batch_size = effective_batch_size::<T>(batch_size);
    let mut reader = csv::Reader::from_path(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut batch: Vec<T> = Vec::with_capacity(batch_size);
    let mut loaded = 0u64;
    for row in reader.deserialize::<T>() {
        batch.push(row.with_context(|| format!("Bad row in {}", path.display()))?);
        if batch.len() >= batch_size {
            loaded += batch.len() as u64;
            insert_batch(tx, std::mem::take(&mut batch)).await?;
            info!(table = T::NAME, rows = loaded, "Loading");
        }
    }
    if !batch.is_empty() {
        loaded += batch.len() as u64;
        insert_batch(tx, batch).await?;
    }

    info!(table = T::NAME, rows = loaded, "Table loaded");
    Ok(loaded)
}

async fn load_manifest(
    pool: &PgPool,
    manifest: &Manifest,
    dir: &Path,
    batch_size: usize,
) -> Result<serde_json::Value> {
    let mut tx = pool.begin().await?;

    for ddl in [MovieRow::DDL, UserRow::DDL, DateRow::DDL, FactRow::DDL] {
        sqlx::query(ddl).execute(&mut *tx).await?;
    }
    sqlx::query("TRUNCATE fact_rating, dim_date, dim_user, dim_movie")
        .execute(&mut *tx)
        .await?;

    // dimensions first: the fact table references them
    let movies =
        load_table::<MovieRow>(&mut tx, dir, artifact(manifest, MovieRow::NAME)?, batch_size).await?;
    let users =
        load_table::<UserRow>(&mut tx, dir, artifact(manifest, UserRow::NAME)?, batch_size).await?;
    let dates =
        load_table::<DateRow>(&mut tx, dir, artifact(manifest, DateRow::NAME)?, batch_size).await?;
    let facts =
        load_table::<FactRow>(&mut tx, dir, artifact(manifest, FactRow::NAME)?, batch_size).await?;

    tx.commit().await.context("Failed to commit load")?;

    let mut detail = serde_json::Map::new();
    for (name, rows) in [
        (MovieRow::NAME, movies),
        (UserRow::NAME, users),
        (DateRow::NAME, dates),
        (FactRow::NAME, facts),
    ] {
        detail.insert(name.to_string(), serde_json::Value::from(rows));
    }
    Ok(serde_json::Value::Object(detail))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Config::from_env();
    let manifest_path = args
        .manifest
        .clone()
        .unwrap_or_else(|| config.output_dir.join(warehouse::MANIFEST_FILE));
    let dir = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    println!("=== Ratings Warehouse Loader ===");
    println!("Manifest: {}", manifest_path.display());
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });

    let manifest = Manifest::read(&manifest_path).context("Failed to read manifest")?;

    println!("\nValidating table files...");
    for table in &manifest.tables {
        let rows = match table.name.as_str() {
            n if n == MovieRow::NAME => validate_table::<MovieRow>(&dir, table)?,
            n if n == UserRow::NAME => validate_table::<UserRow>(&dir, table)?,
            n if n == DateRow::NAME => validate_table::<DateRow>(&dir, table)?,
            n if n == FactRow::NAME => validate_table::<FactRow>(&dir, table)?,
            other => anyhow::bail!("Unknown table '{}' in manifest", other),
        };
        println!("  ✓ {} ({} rows)", table.name, rows);
    }

    if args.dry_run {
        println!("\nDry run - nothing loaded");
        return Ok(());
    }

    let db_url = config.db_url.context("DB_URL env var missing")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::query(LOAD_RUNS_DDL).execute(&pool).await?;
    let load_run_id = create_load_run(&pool, &manifest_path).await?;
    println!("Load run: {}", load_run_id);

    let result = load_manifest(&pool, &manifest, &dir, args.batch_size).await;
    match &result {
        Ok(detail) => finish_load_run(&pool, load_run_id, "ok", None, detail.clone()).await?,
        Err(e) => {
            finish_load_run(
                &pool,
                load_run_id,
                "failed",
                Some(&e.to_string()),
                serde_json::json!({}),
            )
            .await?
        }
    }

    let detail = result?;
    println!("\n=== Load Complete ===");
    for table in &manifest.tables {
        println!("  {:<14} {:>12} rows", table.name, detail[table.name.as_str()]);
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
