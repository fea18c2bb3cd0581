//! Core library for the change-workflow engine: lane routing, quality
//! gates, environment validation, change-directory layout, and durable
//! status tracking shared by the `workflow-engine` crate.

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod error;
pub mod layout;
pub mod model;
pub mod router;
pub mod status;
pub mod validator;
pub mod verifier;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, HandlerErrorKind};
pub use layout::ChangeLayout;
pub use model::{
    AggregateResult, ArtifactManifestEntry, BanditSummary, Change, ChangeFlags, Checkpoint,
    ComparatorOp, EnvironmentSnapshot, Lane, LaneProfile, MypySummary, PytestSummary,
    QualityMetrics, ReleaseType, RuffSummary, StageRecord, StageStatus, Threshold,
    ToolSummaries, WorkflowState, WorkflowStatus, STAGE_COUNT, STAGE_NAMES,
};
pub use router::{ClassificationInputs, ClassificationResult, LaneRouter, LaneRouterError};
pub use status::{ResumeResult, StatusTracker};
pub use validator::{CheckResult, CheckSeverity, EnvironmentValidator, ValidationReport};
pub use verifier::QualityGates;
