//! Error types for execbox
//!
//! These cover construction and configuration only. The outcome of running a
//! submission is always an [`ExecResult`](crate::core::status::ExecResult),
//! never an error.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecboxError {
    /// A resource limit was zero, negative or not finite
    #[error("invalid resource limit {field}: {reason}")]
    InvalidLimits { field: &'static str, reason: String },

    /// Configuration file could not be parsed or validated
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No usable Python interpreter for the worker
    #[error("python interpreter not found: {0}")]
    InterpreterNotFound(String),

    /// Worker payload could not be serialized or written
    #[error("failed to prepare worker payload: {0}")]
    Payload(String),

    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExecboxError>;
