// src/error.rs
//! Closed error taxonomy crossing the orchestrator boundary.
//!
//! Per-item failures (one bad fetch, one short page, one dropped chart) are
//! recovered inside their stage and never appear here; these variants are the
//! whole-stage and fatal cases the orchestrator turns into the terminal
//! ERROR event.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Search returned nothing usable or every fetch failed.
    #[error("source fetch failed: {0}")]
    SourceFetch(String),

    /// Every fetched page was empty or below the minimum text length.
    #[error("content extraction failed: {0}")]
    Extraction(String),

    /// Every summarization batch exhausted its retry budget.
    #[error("summarization failed: {0}")]
    Summarization(String),

    /// Final artifact write/render failure. Fatal, not retried.
    #[error("deck assembly failed: {0}")]
    Assembly(String),

    /// Global job deadline expired; outstanding work was cancelled.
    #[error("job deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}
