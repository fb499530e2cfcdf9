//! Error handling for STAR table operations.
//!
//! Provides typed errors for malformed files, missing fields, empty
//! selections and invalid transform or merge arguments.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StarError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("Invalid STAR format in file: {path} (line {line}) - {reason}")]
    Format {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Required field not found: {field}")]
    NotFound { field: String },

    #[error("Empty result: {reason}")]
    EmptyResult { reason: String },

    #[error("Invalid argument: {reason}")]
    Validation { reason: String },

    #[error("Duplicate merge key {key} in secondary table: {value}")]
    DuplicateKey { key: String, value: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl StarError {
    pub fn not_found(field: impl Into<String>) -> Self {
        Self::NotFound {
            field: field.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn empty_result(reason: impl Into<String>) -> Self {
        Self::EmptyResult {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StarError>;
