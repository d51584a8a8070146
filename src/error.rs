//! Typed errors raised by the answer pipeline.
//!
//! Each variant maps to one failure class of the pipeline. Whether an error
//! is fatal depends on where it surfaces: anything raised while building the
//! index aborts startup, anything raised inside a turn ends the session.
//! Load failures are not errors at all; they are reported through
//! [`IndexLoad`](crate::store::IndexLoad) and trigger a rebuild.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while fetching, indexing, retrieving or answering.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The catalog API answered a page request with a non-success status.
    #[error("catalog page {page} returned HTTP {status}: {body}")]
    UpstreamStatus { page: u32, status: u16, body: String },

    /// The catalog page could not be fetched or decoded.
    #[error("catalog page {page} failed: {message}")]
    Upstream { page: u32, message: String },

    /// The embedding service failed or returned a malformed response.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// The completion service failed or returned a malformed response.
    #[error("completion error: {0}")]
    Completion(String),

    /// The index artifact could not be written.
    #[error("failed to write index to {}: {message}", path.display())]
    StorageWrite { path: PathBuf, message: String },

    /// The interactive input source failed.
    #[error("input error: {0}")]
    Input(#[from] std::io::Error),

    /// Writing the prompt or an answer to the terminal failed.
    #[error("output error: {0}")]
    Output(std::io::Error),
}

impl PipelineError {
    /// True for the catalog failure kinds.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            PipelineError::UpstreamStatus { .. } | PipelineError::Upstream { .. }
        )
    }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
