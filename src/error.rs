// src/error.rs
use thiserror::Error;

/// Conditions that stop a run before, or instead of, per-file processing.
/// Failures inside a single input never surface here.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("reference table {path} is unusable: {reason}")]
    ReferenceInvalid { path: String, reason: String },

    #[error("archive {name} is unusable: {reason}")]
    ArchiveInvalid { name: String, reason: String },

    #[error("{found} input files given; at most {max} are allowed")]
    TooManyInputs { found: usize, max: usize },

    #[error("no input files given; pass CSV paths or a ZIP archive")]
    NoInputs,
}
