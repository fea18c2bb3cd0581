//! Core data model: Change, Stage, Lane Profile, Workflow Status, Checkpoint,
//! Quality Metrics, Artifact manifest entries, Environment Snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const STAGE_COUNT: usize = 13;

/// Stable names for the 13 fixed stages, indexed by stage index.
pub const STAGE_NAMES: [&str; STAGE_COUNT] = [
    "initialize_todos",
    "version_bump",
    "proposal_review",
    "capability_spec",
    "task_breakdown",
    "implementation_checklist",
    "script_generation",
    "document_review",
    "implement",
    "validate",
    "validate_integration",
    "validate_release",
    "archive_and_finalize",
];

/// Stage indices 2..=6 may participate in the parallel window.
pub fn is_parallelizable_index(index: usize) -> bool {
    (2..=6).contains(&index)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Docs,
    Standard,
    Heavy,
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Lane::Docs => "docs",
            Lane::Standard => "standard",
            Lane::Heavy => "heavy",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Lane {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docs" => Ok(Lane::Docs),
            "standard" => Ok(Lane::Standard),
            "heavy" => Ok(Lane::Heavy),
            other => Err(format!("unknown lane: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseType {
    Major,
    Minor,
    Patch,
}

impl Default for ReleaseType {
    fn default() -> Self {
        ReleaseType::Patch
    }
}

impl std::str::FromStr for ReleaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "major" => Ok(ReleaseType::Major),
            "minor" => Ok(ReleaseType::Minor),
            "patch" => Ok(ReleaseType::Patch),
            other => Err(format!("unknown release type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChangeFlags {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub skip_quality_gates: bool,
    #[serde(default = "default_true")]
    pub enable_checkpoints: bool,
    #[serde(default = "default_true")]
    pub interactive: bool,
}

fn default_true() -> bool {
    true
}

impl ChangeFlags {
    pub fn new() -> Self {
        Self {
            dry_run: false,
            skip_quality_gates: false,
            enable_checkpoints: true,
            interactive: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub change_id: String,
    pub title: String,
    pub owner: String,
    pub lane: Lane,
    pub release_type: ReleaseType,
    pub flags: ChangeFlags,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl Change {
    pub fn is_valid_change_id(change_id: &str) -> bool {
        let mut chars = change_id.chars();
        match chars.next() {
            Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    }
}

/// Per-lane configuration: enabled stages, SLA budget, quality thresholds.
#[derive(Debug, Clone)]
pub struct LaneProfile {
    pub lane: Lane,
    pub stages_enabled: Vec<usize>,
    pub sla_budget_seconds: u64,
    pub quality_gates_enabled: bool,
    pub thresholds: Vec<Threshold>,
    /// Configuration value, not a hard-coded index (see design notes).
    pub gate_stage_index: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ComparatorOp {
    Le,
    Ge,
}

#[derive(Debug, Clone)]
pub struct Threshold {
    pub metric: String,
    pub op: ComparatorOp,
    pub value: f64,
}

impl Threshold {
    pub fn le(metric: impl Into<String>, value: f64) -> Self {
        Self {
            metric: metric.into(),
            op: ComparatorOp::Le,
            value,
        }
    }

    pub fn ge(metric: impl Into<String>, value: f64) -> Self {
        Self {
            metric: metric.into(),
            op: ComparatorOp::Ge,
            value,
        }
    }

    pub fn evaluate(&self, observed: f64) -> bool {
        match self.op {
            ComparatorOp::Le => observed <= self.value,
            ComparatorOp::Ge => observed >= self.value,
        }
    }
}

impl LaneProfile {
    pub fn docs() -> Self {
        Self {
            lane: Lane::Docs,
            stages_enabled: vec![0, 2, 3, 4, 9, 10, 11, 12],
            sla_budget_seconds: 300,
            quality_gates_enabled: false,
            thresholds: vec![],
            gate_stage_index: None,
        }
    }

    pub fn standard() -> Self {
        Self {
            lane: Lane::Standard,
            stages_enabled: (0..STAGE_COUNT).collect(),
            sla_budget_seconds: 900,
            quality_gates_enabled: true,
            thresholds: vec![
                Threshold::le("ruff_errors", 0.0),
                Threshold::le("mypy_errors", 0.0),
                Threshold::ge("pytest_pass_rate", 0.80),
                Threshold::ge("pytest_coverage_percent", 70.0),
                Threshold::le("bandit_high", 0.0),
            ],
            gate_stage_index: Some(6),
        }
    }

    pub fn heavy() -> Self {
        Self {
            lane: Lane::Heavy,
            stages_enabled: (0..STAGE_COUNT).collect(),
            sla_budget_seconds: 1200,
            quality_gates_enabled: true,
            thresholds: vec![
                Threshold::le("ruff_errors", 0.0),
                Threshold::le("mypy_errors", 0.0),
                Threshold::ge("pytest_pass_rate", 1.0),
                Threshold::ge("pytest_coverage_percent", 85.0),
                Threshold::le("bandit_high", 0.0),
            ],
            gate_stage_index: Some(6),
        }
    }

    pub fn for_lane(lane: Lane) -> Self {
        match lane {
            Lane::Docs => Self::docs(),
            Lane::Standard => Self::standard(),
            Lane::Heavy => Self::heavy(),
        }
    }

    pub fn is_enabled(&self, index: usize) -> bool {
        self.stages_enabled.contains(&index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageRecord {
    pub fn pending() -> Self {
        Self {
            status: StageStatus::Pending,
            started_at: None,
            ended_at: None,
            duration_ms: None,
            attempts: 0,
            error: None,
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: StageStatus::Skipped,
            started_at: None,
            ended_at: None,
            duration_ms: None,
            attempts: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Initialized,
    Running,
    Paused,
    Failed,
    Completed,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::Failed | WorkflowState::Completed)
    }
}

pub const STATUS_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub runtime_version: String,
    pub tool_versions: BTreeMap<String, Option<String>>,
    pub host_os: String,
    pub working_directory: String,
    pub git_clean: bool,
    pub writable_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub schema_version: u32,
    pub change_id: String,
    pub lane: Lane,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub current_step: usize,
    pub completed_steps: Vec<usize>,
    pub failed_steps: Vec<usize>,
    pub stages: BTreeMap<usize, StageRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_group: Option<Vec<usize>>,
    pub environment: EnvironmentSnapshot,
    pub workflow_state: WorkflowState,
    /// Set when this run's status is shadow-tree (dry run) rather than
    /// durable. `status.json` itself carries the marker, since shadow-path
    /// placement alone isn't visible from the file's own contents.
    #[serde(default)]
    pub dry_run: bool,
}

impl WorkflowStatus {
    pub fn new(change_id: &str, lane: Lane, environment: EnvironmentSnapshot) -> Self {
        let now = Utc::now();
        Self {
            schema_version: STATUS_SCHEMA_VERSION,
            change_id: change_id.to_string(),
            lane,
            started_at: now,
            last_updated_at: now,
            current_step: 0,
            completed_steps: Vec::new(),
            failed_steps: Vec::new(),
            stages: BTreeMap::new(),
            parallel_group: None,
            environment,
            workflow_state: WorkflowState::Initialized,
            dry_run: false,
        }
    }

    pub fn is_incomplete(&self) -> bool {
        self.current_step < STAGE_COUNT - 1 && self.workflow_state != WorkflowState::Completed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactManifestEntry {
    pub path: String,
    pub sha256: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub step_index: usize,
    pub timestamp: DateTime<Utc>,
    pub status_snapshot: WorkflowStatus,
    pub artifact_manifest: Vec<ArtifactManifestEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcs_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateResult {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuffSummary {
    pub errors: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MypySummary {
    pub errors: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PytestSummary {
    pub pass_rate: f64,
    pub coverage_percent: f64,
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BanditSummary {
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSummaries {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ruff: Option<RuffSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mypy: Option<MypySummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pytest: Option<PytestSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bandit: Option<BanditSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub lane: Lane,
    pub gates_enabled: bool,
    pub tools: ToolSummaries,
    pub aggregate_result: AggregateResult,
    pub reasons: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_profiles_match_spec_enabled_sets() {
        assert_eq!(
            LaneProfile::docs().stages_enabled,
            vec![0, 2, 3, 4, 9, 10, 11, 12]
        );
        assert_eq!(LaneProfile::standard().stages_enabled.len(), STAGE_COUNT);
        assert_eq!(LaneProfile::heavy().sla_budget_seconds, 1200);
    }

    #[test]
    fn change_id_validation() {
        assert!(Change::is_valid_change_id("add-handler"));
        assert!(Change::is_valid_change_id("a1"));
        assert!(!Change::is_valid_change_id("-leading-dash"));
        assert!(!Change::is_valid_change_id("Has_Upper"));
        assert!(!Change::is_valid_change_id(""));
    }

    #[test]
    fn threshold_evaluate() {
        assert!(Threshold::le("x", 0.0).evaluate(0.0));
        assert!(!Threshold::le("x", 0.0).evaluate(1.0));
        assert!(Threshold::ge("x", 0.8).evaluate(0.95));
        assert!(!Threshold::ge("x", 0.8).evaluate(0.5));
    }

    #[test]
    fn workflow_status_incomplete_rule() {
        let env = EnvironmentSnapshot {
            runtime_version: "1.0".into(),
            tool_versions: BTreeMap::new(),
            host_os: "linux".into(),
            working_directory: "/tmp".into(),
            git_clean: true,
            writable_paths: vec![],
        };
        let mut status = WorkflowStatus::new("add-x", Lane::Standard, env);
        assert!(status.is_incomplete());
        status.current_step = 12;
        status.workflow_state = WorkflowState::Completed;
        assert!(!status.is_incomplete());
    }
}
