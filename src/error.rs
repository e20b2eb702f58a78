//! Error kinds raised by the CLTV pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CltvError {
    #[error("Cannot access input '{path}': {reason}")]
    FileAccess { path: String, reason: String },

    #[error("Missing required column '{column}'")]
    Schema { column: String },

    #[error("Malformed value in row {row}, column '{column}': {value:?}")]
    Format {
        row: usize,
        column: String,
        value: String,
    },

    #[error("{model} model failed to fit: {reason}")]
    ModelFit { model: &'static str, reason: String },

    #[error("Customer '{customer_id}' has no matching prediction")]
    JoinIntegrity { customer_id: String },

    #[error("Cannot form {buckets} segments: {reason}")]
    Bucketing { buckets: usize, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Data frame error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),
}

impl CltvError {
    pub fn file_access(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::FileAccess {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn schema(column: impl Into<String>) -> Self {
        Self::Schema {
            column: column.into(),
        }
    }

    pub fn model_fit(model: &'static str, reason: impl Into<String>) -> Self {
        Self::ModelFit {
            model,
            reason: reason.into(),
        }
    }
}

pub type CltvResult<T> = Result<T, CltvError>;
