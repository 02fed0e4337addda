//! Run pipeline
//!
//! Stages run strictly in sequence; each one takes its inputs explicitly
//! and returns its outputs, so nothing but the intermediate store and the
//! date key map crosses a stage boundary.
//!
//!   1. extract-ratings       source files -> intermediate store
//!   2. read-titles           title file -> dim_movie
//!   3. build-date-dimension  store -> dim_date + date key map
//!   4. build-user-dimension  store -> dim_user
//!   5. assemble-facts        store + key map -> fact_rating
//!   6. finalize              manifest, intermediate store removed

use crate::config::PipelineConfig;
use crate::dates::build_date_dimension;
use crate::error::{EtlError, Result, Stage};
use crate::facts::FactAssembler;
use crate::model::{DateRow, MovieRow, UserRow};
use crate::ratings::extract_ratings;
use crate::store::IntermediateStore;
use crate::titles::read_titles;
use crate::users::build_user_dimension;
use crate::writer::{write_table, Manifest};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

pub const VERIFY_DIR: &str = ".verify";

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub manifest: Manifest,
    pub manifest_path: PathBuf,
    pub records_extracted: u64,
    pub unparseable_dates: usize,
    pub dropped_unresolved: u64,
    pub orphan_movies: u64,
    pub cap_reached: bool,
}

fn stage<T>(stage: Stage, work: impl FnOnce() -> Result<T>) -> Result<T> {
    info!(stage = %stage, "Stage started");
    work().map_err(|e| e.in_stage(stage))
}

pub fn run(config: &PipelineConfig) -> Result<RunSummary> {
    config.validate()?;
    fs::create_dir_all(&config.output_dir)
        .map_err(|e| EtlError::io(&config.output_dir, e).in_stage(Stage::ExtractRatings))?;
    retire_manifest(config).map_err(|e| e.in_stage(Stage::ExtractRatings))?;
    let store = IntermediateStore::create(&config.scratch_dir)
        .map_err(|e| e.in_stage(Stage::ExtractRatings))?;

    match run_stages(config, &store) {
        Ok(summary) => {
            store.discard().map_err(|e| e.in_stage(Stage::Finalize))?;
            info!(
                manifest = %summary.manifest_path.display(),
                "Warehouse run complete"
            );
            Ok(summary)
        }
        Err(err) => {
            if let Err(cleanup) = store.discard() {
                warn!(error = %cleanup, "Could not remove intermediate store");
            }
            Err(err)
        }
    }
}

/// Tables are replaced one by one during a run, so the previous manifest
/// stops describing the output directory as soon as the first one lands.
fn retire_manifest(config: &PipelineConfig) -> Result<()> {
    let path = config.manifest_path();
    match fs::remove_file(&path) {
        Ok(()) => {
            info!(manifest = %path.display(), "Previous manifest removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EtlError::io(&path, e)),
    }
}

fn run_stages(config: &PipelineConfig, store: &IntermediateStore) -> Result<RunSummary> {
    let out = config.output_dir.as_path();

    let parsed = stage(Stage::ExtractRatings, || {
        extract_ratings(
            &config.ratings_files,
            store,
            config.row_cap,
            config.chunk_size,
            config.source_encoding,
        )
    })?;

    let (movie_artifact, known_movies) = stage(Stage::ReadTitles, || {
        let movies = read_titles(&config.titles_file, config.source_encoding)?;
        let ids: HashSet<i64> = movies.iter().map(|m| m.movie_id).collect();
        Ok((write_table::<MovieRow>(out, &movies)?, ids))
    })?;

    let (date_artifact, dates) = stage(Stage::BuildDateDimension, || {
        let dates = build_date_dimension(store)?;
        Ok((write_table::<DateRow>(out, &dates.rows)?, dates))
    })?;

    let user_artifact = stage(Stage::BuildUserDimension, || {
        let users = build_user_dimension(store)?;
        write_table::<UserRow>(out, &users)
    })?;

    let facts = stage(Stage::AssembleFacts, || {
        FactAssembler::new(&dates.keys, config.row_cap, config.chunk_size)
            .with_known_movies(&known_movies)
            .assemble(store, out)
    })?;

    stage(Stage::Finalize, || {
        let manifest = Manifest {
            tables: vec![
                movie_artifact,
                user_artifact,
                date_artifact,
                facts.artifact.clone(),
            ],
            row_cap: config.row_cap,
            cap_reached: parsed.cap_reached() || facts.cap_reached(),
        };
        let manifest_path = manifest.write(out)?;
        Ok(RunSummary {
            manifest,
            manifest_path,
            records_extracted: parsed.records_emitted,
            unparseable_dates: dates.unparseable,
            dropped_unresolved: facts.dropped_unresolved,
            orphan_movies: facts.orphan_movies,
            cap_reached: parsed.cap_reached() || facts.cap_reached(),
        })
    })
}

/// Describe every difference between two manifests; empty means identical
pub fn compare_manifests(expected: &Manifest, actual: &Manifest) -> Vec<String> {
    let mut mismatches = Vec::new();

    if expected.row_cap != actual.row_cap {
        mismatches.push(format!(
            "row cap: expected {:?}, got {:?}",
            expected.row_cap, actual.row_cap
        ));
    }
    if expected.cap_reached != actual.cap_reached {
        mismatches.push(format!(
            "cap reached: expected {}, got {}",
            expected.cap_reached, actual.cap_reached
        ));
    }

    for table in &expected.tables {
        match actual.table(&table.name) {
            None => mismatches.push(format!("{}: missing from new run", table.name)),
            Some(other) => {
                if other.rows != table.rows {
                    mismatches.push(format!(
                        "{}: expected {} rows, got {}",
                        table.name, table.rows, other.rows
                    ));
                }
                if other.sha256 != table.sha256 {
                    mismatches.push(format!(
                        "{}: content hash differs ({} vs {})",
                        table.name, table.sha256, other.sha256
                    ));
                }
            }
        }
    }
    for table in &actual.tables {
        if expected.table(&table.name).is_none() {
            mismatches.push(format!("{}: not in existing manifest", table.name));
        }
    }

    mismatches
}

/// Re-run into a scratch output directory and compare against the
/// existing manifest. Returns the list of mismatches.
pub fn verify(config: &PipelineConfig) -> Result<Vec<String>> {
    let existing = Manifest::read(&config.manifest_path())?;

    let verify_dir = config.output_dir.join(VERIFY_DIR);
    let mut fresh_config = config.clone();
    fresh_config.output_dir = verify_dir.clone();
    fresh_config.scratch_dir = verify_dir.clone();

    let result = run(&fresh_config);
    if let Err(e) = fs::remove_dir_all(&verify_dir) {
        warn!(dir = %verify_dir.display(), error = %e, "Could not remove verification output");
    }
    let fresh = result?;

    Ok(compare_manifests(&existing, &fresh.manifest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::TableArtifact;

    fn artifact(name: &str, rows: u64, sha: &str) -> TableArtifact {
        TableArtifact {
            name: name.to_string(),
            file: format!("{}.csv", name),
            rows,
            sha256: sha.to_string(),
        }
    }

    fn manifest(tables: Vec<TableArtifact>) -> Manifest {
        Manifest {
            tables,
            row_cap: Some(100),
            cap_reached: false,
        }
    }

    #[test]
    fn test_compare_identical() {
        let a = manifest(vec![artifact("dim_user", 2, "sha256:aa")]);
        assert!(compare_manifests(&a, &a.clone()).is_empty());
    }

    #[test]
    fn test_compare_detects_hash_and_count() {
        let a = manifest(vec![artifact("dim_user", 2, "sha256:aa")]);
        let b = manifest(vec![artifact("dim_user", 3, "sha256:bb")]);
        let diffs = compare_manifests(&a, &b);
        assert_eq!(diffs.len(), 2);
        assert!(diffs[0].contains("expected 2 rows, got 3"));
    }

    #[test]
    fn test_compare_detects_missing_and_extra_tables() {
        let a = manifest(vec![artifact("dim_user", 2, "x")]);
        let b = manifest(vec![artifact("dim_date", 2, "x")]);
        let diffs = compare_manifests(&a, &b);
        assert!(diffs.iter().any(|d| d.contains("dim_user: missing")));
        assert!(diffs.iter().any(|d| d.contains("dim_date: not in existing")));
    }

    #[test]
    fn test_stage_wraps_error() {
        let err = stage::<()>(Stage::ReadTitles, || Err(EtlError::Config("x".to_string())))
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::ReadTitles));
    }
}
