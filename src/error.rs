//! Domain-specific error types for the coding-dependency pipeline

use std::path::PathBuf;

use thiserror::Error;

use crate::clients::LlmError;
use crate::pipeline::Stage;

/// Main error type for pipeline runs
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("LLM client error: {0}")]
    Llm(#[from] LlmError),

    #[error("Format error: {kind} response unusable after {attempts} attempt(s): {message}")]
    Format {
        kind: &'static str,
        attempts: u32,
        message: String,
    },

    #[error("Missing prerequisite for {stage} stage: {} {reason}", path.display())]
    PrerequisiteMissing {
        stage: Stage,
        path: PathBuf,
        /// "not found", or why an existing file is unusable
        reason: &'static str,
    },

    #[error("{stage} stage failed for every item ({} failure(s)): {}", failures.len(), failures.join("; "))]
    TotalBatchFailure { stage: Stage, failures: Vec<String> },

    #[error("Cancelled before dispatch")]
    Cancelled,

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PipelineError {
    /// Short label used to log failure kinds distinctly.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Config { .. } => "config",
            PipelineError::Llm(err) => err.kind(),
            PipelineError::Format { .. } => "format",
            PipelineError::PrerequisiteMissing { .. } => "prerequisite-missing",
            PipelineError::TotalBatchFailure { .. } => "total-batch-failure",
            PipelineError::Cancelled => "cancelled",
            PipelineError::Io { .. } => "io",
            PipelineError::Serialization { .. } => "serialization",
            PipelineError::Internal { .. } => "internal",
        }
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for PipelineError {
    fn from(err: toml::de::Error) -> Self {
        PipelineError::Config {
            message: format!("Invalid TOML: {}", err),
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
