//! Error taxonomy for the change-workflow engine.
//!
//! One enum per the failure classes a workflow run can hit, plus the
//! structured context each variant needs to produce the CLI's final
//! summary line and the failing stage's log excerpt.

use std::path::PathBuf;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Distinguishes how a handler error should propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerErrorKind {
    /// Aborts the workflow; not retried automatically.
    Fatal,
    /// The engine records the failure and lets resume retry the stage.
    Recoverable,
    /// The handler did not return within its deadline.
    Timeout,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("environment validation failed: {message}")]
    Environment { message: String },

    #[error("lane mismatch: {reason} (detected {code_file_count} code file(s))")]
    LaneMismatch {
        reason: String,
        code_file_count: usize,
    },

    #[error("stage {stage_index} handler error ({kind:?}): {message}")]
    Handler {
        stage_index: usize,
        kind: HandlerErrorKind,
        message: String,
        log_excerpt: Vec<String>,
    },

    #[error("quality gate FAIL: {}", reasons.join("; "))]
    QualityGate { reasons: Vec<String> },

    #[error("artifact conflict at stage {stage_index}: {path} hash drifted since commit")]
    ArtifactConflict { stage_index: usize, path: String },

    #[error("status corrupted at {path}: {message}")]
    StatusCorruption { path: PathBuf, message: String },

    #[error("canceled: {reason}")]
    Canceled { reason: String },

    #[error("usage error: {0}")]
    Usage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub fn environment(message: impl Into<String>) -> Self {
        Self::Environment {
            message: message.into(),
        }
    }

    pub fn lane_mismatch(reason: impl Into<String>, code_file_count: usize) -> Self {
        Self::LaneMismatch {
            reason: reason.into(),
            code_file_count,
        }
    }

    pub fn handler(
        stage_index: usize,
        kind: HandlerErrorKind,
        message: impl Into<String>,
        log_excerpt: Vec<String>,
    ) -> Self {
        Self::Handler {
            stage_index,
            kind,
            message: message.into(),
            log_excerpt,
        }
    }

    /// Exit code mandated by the CLI surface for this error class.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Environment { .. } => 10,
            Self::LaneMismatch { .. } => 20,
            Self::QualityGate { .. } => 30,
            Self::Handler { .. } => 40,
            Self::StatusCorruption { .. } => 50,
            Self::Canceled { .. } => 130,
            Self::ArtifactConflict { .. } => 40,
            Self::Io(_) | Self::Json(_) => 50,
        }
    }

    /// Last lines of the failing stage's log, if this error carries one.
    pub fn log_excerpt(&self) -> &[String] {
        match self {
            Self::Handler { log_excerpt, .. } => log_excerpt,
            _ => &[],
        }
    }
}
