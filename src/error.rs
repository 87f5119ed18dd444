// src/error.rs
//! Failure taxonomy for the radar pipeline.
//!
//! Per-item and per-source variants are absorbed where they happen and only
//! surface in logs, metrics and the run report. `ConfigInvalid` and
//! `ModelUnavailable` are startup failures and stop the process before any
//! request is served.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    /// Fetch exhausted its retries or hit a timeout; the source is skipped.
    #[error("source `{source_id}` unavailable: {reason}")]
    SourceUnavailable { source_id: String, reason: String },

    /// A single malformed document or entry.
    #[error("failed to parse document from `{source_id}`: {reason}")]
    ParseFailure { source_id: String, reason: String },

    /// A single item could not be embedded; it becomes a singleton cluster.
    #[error("embedding failed: {0}")]
    EmbeddingFailure(String),

    /// Missing or malformed configuration (fatal at startup).
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Embedding model failed to initialise (fatal at startup).
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),
}

impl PipelineError {
    pub fn source_unavailable(source_id: &str, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            source_id: source_id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn parse_failure(source_id: &str, reason: impl ToString) -> Self {
        Self::ParseFailure {
            source_id: source_id.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Startup failures must not be absorbed by a run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConfigInvalid(_) | Self::ModelUnavailable(_))
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
