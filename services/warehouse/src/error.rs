//! Error types for the warehouse pipeline

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage, used to tell the operator where a run aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ExtractRatings,
    ReadTitles,
    BuildDateDimension,
    BuildUserDimension,
    AssembleFacts,
    Finalize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ExtractRatings => "extract-ratings",
            Stage::ReadTitles => "read-titles",
            Stage::BuildDateDimension => "build-date-dimension",
            Stage::BuildUserDimension => "build-user-dimension",
            Stage::AssembleFacts => "assemble-facts",
            Stage::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed rating input at {}:{line}: {reason}", .path.display())]
    MalformedRating {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    #[error("CSV error on {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<EtlError>,
    },
}

impl EtlError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EtlError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        EtlError::Csv {
            path: path.into(),
            source,
        }
    }

    /// Attach the stage in which this error surfaced
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            already @ EtlError::Stage { .. } => already,
            other => EtlError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Stage the error was raised in, if known
    pub fn stage(&self) -> Option<Stage> {
        match self {
            EtlError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_stage_wraps_once() {
        let err = EtlError::Config("bad".to_string())
            .in_stage(Stage::ReadTitles)
            .in_stage(Stage::Finalize);
        assert_eq!(err.stage(), Some(Stage::ReadTitles));
    }

    #[test]
    fn test_stage_error_message_names_stage_and_file() {
        let err = EtlError::MalformedRating {
            path: PathBuf::from("combined_data_1.txt"),
            line: 7,
            reason: "expected 3 fields, found 2".to_string(),
        }
        .in_stage(Stage::ExtractRatings);
        let msg = err.to_string();
        assert!(msg.contains("extract-ratings"));
        assert!(msg.contains("combined_data_1.txt:7"));
    }
}
