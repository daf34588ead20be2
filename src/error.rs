//! Pipeline error taxonomy.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("code generation failed: {0}")]
    SynthesisFailed(String),

    #[error("Error in code generation.")]
    SynthesisEmpty,

    #[error("could not persist {target}: {source}")]
    PersistFailed {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no isolated Python interpreter available: {0}")]
    SandboxUnavailable(String),

    #[error("Unsupported language: {0}")]
    UnsupportedTarget(String),

    #[error("execution exceeded {0:?}")]
    ExecutionTimedOut(Duration),

    #[error("failed to start interpreter: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Stable, serializable tag for a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SynthesisFailed,
    SynthesisEmpty,
    PersistFailed,
    SandboxUnavailable,
    UnsupportedTarget,
    ExecutionTimedOut,
    Spawn,
}

impl ErrorKind {
    /// Whether resubmitting the same request may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::SynthesisFailed | ErrorKind::PersistFailed | ErrorKind::ExecutionTimedOut
        )
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::SynthesisFailed(_) => ErrorKind::SynthesisFailed,
            PipelineError::SynthesisEmpty => ErrorKind::SynthesisEmpty,
            PipelineError::PersistFailed { .. } => ErrorKind::PersistFailed,
            PipelineError::SandboxUnavailable(_) => ErrorKind::SandboxUnavailable,
            PipelineError::UnsupportedTarget(_) => ErrorKind::UnsupportedTarget,
            PipelineError::ExecutionTimedOut(_) => ErrorKind::ExecutionTimedOut,
            PipelineError::Spawn(_) => ErrorKind::Spawn,
        }
    }

    pub(crate) fn persist(target: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::PersistFailed {
            target: target.into(),
            source,
        }
    }
}
