//! Ratings Warehouse - builds a star schema from a ratings dataset
//!
//! Responsibilities:
//! - Stream the per-movie ratings source into a normalized intermediate store
//! - Read the title reference file into the movie dimension
//! - Derive the date and user dimensions from the observed ratings
//! - Assemble the fact table against the date keys, under an exact row cap
//! - Write every table as CSV plus a manifest of row counts and hashes
//!
//! CRITICAL: runs are DETERMINISTIC
//! Same inputs + same row cap = byte-identical output files

pub mod budget;
pub mod config;
pub mod dates;
pub mod error;
pub mod facts;
pub mod model;
pub mod pipeline;
pub mod ratings;
pub mod store;
pub mod text;
pub mod titles;
pub mod users;
pub mod writer;

pub use budget::StreamState;
pub use config::PipelineConfig;
pub use error::{EtlError, Result, Stage};
pub use model::{DateRow, FactRow, MovieRow, RawRatingRecord, Table, UserRow, UNKNOWN_RELEASE_YEAR};
pub use pipeline::{compare_manifests, run, verify, RunSummary};
pub use writer::{file_sha256, Manifest, TableArtifact, MANIFEST_FILE};
