//! Pipeline error taxonomy
//!
//! Every failure is scoped to one `(source, logical_date)`; the coordinator
//! turns these into a FAILED source outcome and never a partial publish.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::SourceKind;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error types for the extract → normalize → validate → publish pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Timeout, 429, or 5xx. Retried in place.
    #[error("Transient fetch error from {source_kind}: {detail}")]
    TransientFetch {
        source_kind: SourceKind,
        detail: String,
        retry_after: Option<Duration>,
    },

    /// 4xx other than 429. Never retried.
    #[error("Terminal fetch error from {source_kind} (status {status:?}): {detail}")]
    TerminalFetch {
        source_kind: SourceKind,
        status: Option<u16>,
        detail: String,
    },

    /// Retry budget exhausted on a transient failure
    #[error("Source {source_kind} failed after {attempts} attempts: {detail}")]
    SourceFailure {
        source_kind: SourceKind,
        attempts: u32,
        detail: String,
    },

    /// Upstream payload no longer matches the expected contract
    #[error("Schema mismatch for {source_kind} (cursor {cursor:?}): {detail}")]
    SchemaMismatch {
        source_kind: SourceKind,
        cursor: Option<String>,
        detail: String,
    },

    #[error(
        "Quality gate failed for {source_kind}: quarantine rate {quarantine_rate:.4} exceeds threshold {threshold:.4}"
    )]
    QualityGateFailure {
        source_kind: SourceKind,
        quarantine_rate: f64,
        threshold: f64,
    },

    /// Another writer holds the manifest slot
    #[error("Publish conflict on {key}: held by run {holder}")]
    PublishConflict { key: String, holder: String },

    #[error("Run cancelled before {stage}")]
    Cancelled { stage: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Common(#[from] medetl_common::CommonError),
}

/// Stable, serializable error classification surfaced in run results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientFetch,
    TerminalFetch,
    SourceFailure,
    SchemaMismatch,
    QualityGateFailure,
    PublishConflict,
    Cancelled,
    Storage,
    Config,
    Internal,
}

impl PipelineError {
    /// Whether the operation that produced this error may be retried in place
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::TransientFetch { .. } | PipelineError::PublishConflict { .. }
        )
    }

    /// Server-requested delay before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PipelineError::TransientFetch { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::TransientFetch { .. } => ErrorKind::TransientFetch,
            PipelineError::TerminalFetch { .. } => ErrorKind::TerminalFetch,
            PipelineError::SourceFailure { .. } => ErrorKind::SourceFailure,
            PipelineError::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            PipelineError::QualityGateFailure { .. } => ErrorKind::QualityGateFailure,
            PipelineError::PublishConflict { .. } => ErrorKind::PublishConflict,
            PipelineError::Cancelled { .. } => ErrorKind::Cancelled,
            PipelineError::Storage(_) | PipelineError::Io(_) => ErrorKind::Storage,
            PipelineError::Config(_) => ErrorKind::Config,
            PipelineError::Json(_)
            | PipelineError::Parquet(_)
            | PipelineError::Arrow(_)
            | PipelineError::Common(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn schema_mismatch(
        source_kind: SourceKind,
        cursor: Option<&str>,
        detail: impl Into<String>,
    ) -> Self {
        PipelineError::SchemaMismatch {
            source_kind,
            cursor: cursor.map(str::to_string),
            detail: detail.into(),
        }
    }
}
