//! Run configuration
//!
//! Values come from the environment (after `.env` is loaded by the binary)
//! and may be overridden field by field from the command line.

use crate::error::{EtlError, Result};
use encoding_rs::Encoding;
use std::path::PathBuf;

pub const DEFAULT_OUTPUT_DIR: &str = "./data/warehouse";
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;
pub const DEFAULT_SOURCE_ENCODING: &str = "windows-1252";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Ratings source files, processed in this order
    pub ratings_files: Vec<PathBuf>,
    pub titles_file: PathBuf,
    pub output_dir: PathBuf,
    /// Where the intermediate rating stream lives during a run
    pub scratch_dir: PathBuf,
    /// Maximum number of fact rows; `None` is unbounded
    pub row_cap: Option<u64>,
    /// Records buffered in memory before each flush
    pub chunk_size: usize,
    /// Fallback decoder for lines that are not valid UTF-8
    pub source_encoding: &'static Encoding,
}

impl PipelineConfig {
    /// Build a config with defaults for everything but the inputs
    pub fn new(ratings_files: Vec<PathBuf>, titles_file: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            ratings_files,
            titles_file,
            scratch_dir: output_dir.clone(),
            output_dir,
            row_cap: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            source_encoding: encoding_rs::WINDOWS_1252,
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source using the environment variable names
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| EtlError::Config(format!("{} env var missing", key)))
        };

        let ratings_files = parse_path_list(&require("RATINGS_FILES")?);
        let titles_file = PathBuf::from(require("TITLES_FILE")?);
        let output_dir =
            PathBuf::from(lookup("OUTPUT_DIR").unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string()));
        let scratch_dir = lookup("SCRATCH_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| output_dir.clone());
        let row_cap = match lookup("ROW_CAP") {
            Some(raw) => parse_row_cap(&raw)?,
            None => None,
        };
        let chunk_size = match lookup("CHUNK_SIZE") {
            Some(raw) => parse_chunk_size(&raw)?,
            None => DEFAULT_CHUNK_SIZE,
        };
        let source_encoding = resolve_encoding(
            &lookup("SOURCE_ENCODING").unwrap_or_else(|| DEFAULT_SOURCE_ENCODING.to_string()),
        )?;

        let config = Self {
            ratings_files,
            titles_file,
            output_dir,
            scratch_dir,
            row_cap,
            chunk_size,
            source_encoding,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ratings_files.is_empty() {
            return Err(EtlError::Config("no ratings source files configured".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(EtlError::Config("chunk size must be greater than zero".to_string()));
        }
        Ok(())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(crate::writer::MANIFEST_FILE)
    }
}

/// Split a comma-separated list of paths, ignoring empty entries
pub fn parse_path_list(raw: &str) -> Vec<PathBuf> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Parse a row cap; empty, "none" and "unbounded" mean no cap
pub fn parse_row_cap(raw: &str) -> Result<Option<u64>> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("none")
        || trimmed.eq_ignore_ascii_case("unbounded")
    {
        return Ok(None);
    }
    trimmed
        .replace('_', "")
        .parse::<u64>()
        .map(Some)
        .map_err(|e| EtlError::Config(format!("invalid row cap '{}': {}", trimmed, e)))
}

pub fn parse_chunk_size(raw: &str) -> Result<usize> {
    let trimmed = raw.trim();
    let size: usize = trimmed
        .replace('_', "")
        .parse()
        .map_err(|e| EtlError::Config(format!("invalid chunk size '{}': {}", trimmed, e)))?;
    if size == 0 {
        return Err(EtlError::Config("chunk size must be greater than zero".to_string()));
    }
    Ok(size)
}

pub fn resolve_encoding(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| EtlError::Config(format!("unknown text encoding '{}'", label.trim())))
}
