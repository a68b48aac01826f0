// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Fatal conditions raised while turning one raw CSV source into Parquet.
///
/// These travel inside `anyhow::Error` (usually wrapped in context), so
/// callers that need to branch on the kind use `err.downcast_ref::<IngestError>()`.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The input CSV for a source does not exist.
    #[error("input for source '{source_name}' not found at {}", path.display())]
    MissingInput { source_name: String, path: PathBuf },

    /// A batch did not match the schema fixed by the first batch of the output.
    #[error("schema mismatch in batch {batch}: expected [{expected}], found [{found}]")]
    SchemaMismatch {
        batch: usize,
        expected: String,
        found: String,
    },

    /// A row could not be read under the strict row policy.
    #[error("malformed row at line {line}: {reason}")]
    MalformedRow { line: u64, reason: String },

    /// Invalid loader configuration (codec, encoding, keyword patterns, ...).
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl IngestError {
    pub fn config(msg: impl Into<String>) -> Self {
        IngestError::Config(msg.into())
    }
}
