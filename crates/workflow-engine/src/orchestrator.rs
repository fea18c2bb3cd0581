//! Engine: drives the fixed 13-stage pipeline for one change from start to
//! terminal state, wiring together the Lane Router, Stage Registry, Parallel
//! Executor, Quality Gates, Status Tracker, and Environment Validator.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use workflow_core::{
    AggregateResult, ArtifactManifestEntry, ChangeFlags, ChangeLayout, ClassificationInputs,
    EngineConfig, EngineError, EngineResult, EnvironmentValidator, Lane, LaneProfile, LaneRouter,
    LaneRouterError, QualityGates, ReleaseType, ResumeResult, StageRecord, StageStatus,
    StatusTracker, WorkflowState, WorkflowStatus,
};

use crate::executor::{self, ExecutorOptions, TaskStatus};
use crate::prompt::{EnginePrompt, ResumeChoice, StdinPrompt};
use crate::registry::{StageContext, StageHandler, StageOutcome, StageRegistry};
use crate::state_machine::{BudgetTracker, WorkflowStateMachine};

/// Everything `Engine::run` needs, assembled from CLI flags and environment
/// config by `main`. One field per flag in the CLI surface, plus the two
/// facts the Lane Router needs that the CLI does not expose directly.
pub struct RunInputs {
    pub change_id: String,
    pub title: String,
    pub owner: String,
    pub explicit_lane: Option<Lane>,
    pub steps: Option<Vec<usize>>,
    pub release_type: ReleaseType,
    pub flags: ChangeFlags,
    pub workers: usize,
}

impl RunInputs {
    /// A change is `breaking` when its release type is major; the engine
    /// does not otherwise branch on `release_type` (see design notes).
    fn breaking_change(&self) -> bool {
        self.release_type == ReleaseType::Major
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub lane: Lane,
    pub completed_steps: Vec<usize>,
    pub failed_steps: Vec<usize>,
    pub quality_result: Option<AggregateResult>,
    pub workflow_state: WorkflowState,
    pub status_path: std::path::PathBuf,
}

pub struct Engine {
    config: EngineConfig,
    registry: StageRegistry,
    required_tools: Vec<&'static str>,
    prompt: Arc<dyn EnginePrompt>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_prompt(config, Arc::new(StdinPrompt))
    }

    /// Same as `new`, but with an injected prompt collaborator — the real
    /// binary entry point never needs this; it exists so a caller that
    /// wants `interactive=true` semantics without a real stdin (tests, any
    /// embedding that scripts its answers) can supply one.
    pub fn with_prompt(config: EngineConfig, prompt: Arc<dyn EnginePrompt>) -> Self {
        Self {
            config,
            registry: StageRegistry::default_registry(),
            required_tools: vec!["ruff", "mypy", "pytest", "bandit"],
            prompt,
        }
    }

    /// Runs to completion or to a terminal error, with no external
    /// cancellation source. Equivalent to `run_cancelable` with a token that
    /// is never triggered.
    pub async fn run(&self, inputs: RunInputs) -> EngineResult<RunSummary> {
        self.run_cancelable(inputs, CancellationToken::new()).await
    }

    /// Runs the pipeline, checking `cancel` at each stage-dispatch boundary
    /// and inside the Parallel Executor. A cancellation mid-run transitions
    /// the workflow to `Paused` and returns `EngineError::Canceled` (exit
    /// code 130) rather than continuing to the next stage.
    pub async fn run_cancelable(
        &self,
        inputs: RunInputs,
        cancel: CancellationToken,
    ) -> EngineResult<RunSummary> {
        if !workflow_core::Change::is_valid_change_id(&inputs.change_id) {
            return Err(EngineError::Usage(format!(
                "invalid change id: {}",
                inputs.change_id
            )));
        }

        let status_config = if inputs.flags.dry_run {
            self.config.shadow()
        } else {
            self.config.clone()
        };
        let layout = ChangeLayout::new(&inputs.change_id);
        layout.ensure()?;

        // (1) Environment Validator. An explicit docs lane skips the
        // external-tool requirement entirely; anything else is validated as
        // if quality gates may run, since the final lane is not known yet.
        let quality_gates_likely = !matches!(inputs.explicit_lane, Some(Lane::Docs));
        let validation = EnvironmentValidator::new(&self.required_tools).validate(
            layout.root(),
            &inputs.owner,
            quality_gates_likely && !inputs.flags.skip_quality_gates,
        );
        if validation.has_fatal_failure() {
            return Err(EngineError::environment(validation.fatal_summary()));
        }
        for check in validation.checks.iter().filter(|c| !c.passed) {
            warn!(check = %check.name, detail = %check.detail, "environment check warning");
        }

        let environment = environment_snapshot(&inputs.owner);
        let environment_for_reset = environment.clone();

        // (2) Load-or-create Status.
        let provisional_lane = inputs.explicit_lane.unwrap_or(Lane::Standard);
        let (tracker, resume) = StatusTracker::load_or_init(
            &status_config,
            &inputs.change_id,
            provisional_lane,
            environment,
            inputs.flags.enable_checkpoints,
        )?;

        let mut status = match resume {
            ResumeResult::Fresh(status) => status,
            ResumeResult::Restored(status) => {
                if !inputs.flags.interactive {
                    info!(change_id = %inputs.change_id, step = status.current_step, "resuming incomplete workflow (non-interactive default)");
                    status
                } else {
                    match self.prompt.resume_or_fresh(&inputs.change_id, status.current_step) {
                        ResumeChoice::Resume => {
                            info!(change_id = %inputs.change_id, step = status.current_step, "resuming incomplete workflow");
                            status
                        }
                        ResumeChoice::StartFresh => {
                            info!(change_id = %inputs.change_id, "starting fresh per operator choice");
                            let mut fresh = WorkflowStatus::new(
                                &inputs.change_id,
                                provisional_lane,
                                environment_for_reset,
                            );
                            tracker.mark_workflow(&mut fresh, WorkflowState::Initialized)?;
                            fresh
                        }
                    }
                }
            }
            ResumeResult::IncompatibleSchema { found, expected } => {
                return Err(EngineError::StatusCorruption {
                    path: status_config.status_path(&inputs.change_id),
                    message: format!("schema version {found} unsupported, expected {expected}"),
                });
            }
        };
        status.dry_run = inputs.flags.dry_run;

        // (3) Lane Router. Always computed with mismatch allowed so the
        // proposed switched lane is available to show the operator; whether
        // the switch actually takes effect is gated on the prompt below.
        let working_tree_files = detect_working_tree_files();
        let router = LaneRouter::new();
        let classification = router
            .classify(
                &ClassificationInputs {
                    explicit_lane: inputs.explicit_lane,
                    change_id: inputs.change_id.clone(),
                    working_tree_files,
                    breaking_change: inputs.breaking_change(),
                },
                true,
            )
            .map_err(|e| match e {
                LaneRouterError::LaneMismatch(files) => {
                    EngineError::lane_mismatch("explicit docs lane contradicted", files.len())
                }
                LaneRouterError::ClassificationError(message) => EngineError::environment(message),
            })?;
        if classification.lane_mismatch {
            let proceed = if inputs.flags.interactive {
                self.prompt.confirm_lane_switch(
                    &classification.reason,
                    classification.detected_code_files.len(),
                )
            } else {
                false
            };
            if !proceed {
                return Err(EngineError::lane_mismatch(
                    "explicit docs lane contradicted",
                    classification.detected_code_files.len(),
                ));
            }
            warn!(
                lane = %classification.lane,
                reason = %classification.reason,
                "lane switched after mismatch with explicit docs lane"
            );
        }
        status.lane = classification.lane;
        let profile = LaneProfile::for_lane(classification.lane);

        let mut state_machine = WorkflowStateMachine::new(status.workflow_state);
        if state_machine.current() == WorkflowState::Initialized {
            state_machine
                .advance(WorkflowState::Running, None, Some("run started"))
                .map_err(|e| EngineError::StatusCorruption {
                    path: status_config.status_path(&inputs.change_id),
                    message: e.to_string(),
                })?;
        }
        tracker.mark_workflow(&mut status, WorkflowState::Running)?;

        // (4) Enabled stage set for this invocation.
        let is_partial_run = inputs.steps.is_some();
        let run_set: Vec<usize> = match &inputs.steps {
            Some(steps) => {
                let min_requested = steps.iter().copied().min().unwrap_or(0);
                let preconditions_met = profile
                    .stages_enabled
                    .iter()
                    .filter(|&&i| i < min_requested)
                    .all(|i| status.completed_steps.contains(i));
                if !preconditions_met {
                    return Err(EngineError::Usage(format!(
                        "partial run requested at steps {steps:?} but earlier enabled stages are not completed"
                    )));
                }
                profile
                    .stages_enabled
                    .iter()
                    .copied()
                    .filter(|i| steps.contains(i))
                    .collect()
            }
            None => profile.stages_enabled.clone(),
        };

        let budget = BudgetTracker::new(Duration::from_secs(profile.sla_budget_seconds));
        let quality_gates = QualityGates::new(std::env::current_dir()?, self.config.tool_timeout);

        let mut manifest: Vec<ArtifactManifestEntry> = Vec::new();
        let mut quality_result: Option<AggregateResult> = None;

        // (5) Iterate stages; bundle the contiguous independent window into
        // one parallel dispatch when possible.
        let mut index = 0usize;
        while index < workflow_core::STAGE_COUNT {
            if cancel.is_cancelled() {
                state_machine
                    .advance(WorkflowState::Paused, Some(index), Some("external cancellation"))
                    .ok();
                tracker.mark_workflow(&mut status, WorkflowState::Paused)?;
                return Err(EngineError::Canceled {
                    reason: "external cancellation signal received".to_string(),
                });
            }

            if !run_set.contains(&index) || status.completed_steps.contains(&index) {
                index += 1;
                continue;
            }

            if inputs.flags.dry_run {
                info!(stage_index = index, "[DRY RUN] dispatching stage without durable writes");
            }

            let handler = self
                .registry
                .get(index)
                .ok_or_else(|| crate::registry::env_error_for_missing_stage(index))?;

            if workflow_core::model::is_parallelizable_index(index) && handler.is_independent() {
                let mut group = vec![index];
                let mut next = index + 1;
                while next <= 6 && run_set.contains(&next) && !status.completed_steps.contains(&next) {
                    let Some(candidate) = self.registry.get(next) else {
                        break;
                    };
                    if !candidate.is_independent() {
                        break;
                    }
                    group.push(next);
                    next += 1;
                }

                if group.len() > 1 && self.registry.verify_independence(&group) {
                    if inputs.flags.dry_run {
                        info!(?group, "[DRY RUN] dispatching parallel group without durable writes");
                    }
                    self.run_parallel_group(
                        &tracker,
                        &mut status,
                        &layout,
                        &inputs,
                        &budget,
                        &group,
                        &mut manifest,
                        &cancel,
                    )
                    .await?;

                    if let Some(gate_index) = profile.gate_stage_index {
                        if group.contains(&gate_index) {
                            self.run_quality_gate(
                                &tracker,
                                &mut status,
                                &profile,
                                &inputs,
                                &quality_gates,
                                gate_index,
                                &mut quality_result,
                            )
                            .await?;
                        }
                    }

                    index = next;
                    continue;
                } else if group.len() > 1 {
                    warn!(?group, "independence conflict detected; downgrading to serial execution");
                }
            }

            self.run_single_stage(
                &tracker,
                &mut status,
                &layout,
                &inputs,
                &budget,
                index,
                &mut manifest,
            )
            .await?;

            if profile.gate_stage_index == Some(index) {
                self.run_quality_gate(
                    &tracker,
                    &mut status,
                    &profile,
                    &inputs,
                    &quality_gates,
                    index,
                    &mut quality_result,
                )
                .await?;
            }

            index += 1;
        }

        // Lanes without a gate-bearing stage (docs) still produce a
        // `quality_metrics.json`, reported SKIPPED, on a full run.
        if !is_partial_run && quality_result.is_none() {
            let metrics = quality_gates
                .run(&profile, inputs.flags.skip_quality_gates)
                .await;
            write_quality_metrics(&self.config, &inputs.change_id, &metrics)?;
            quality_result = Some(metrics.aggregate_result);
        }

        let all_done = profile
            .stages_enabled
            .iter()
            .all(|i| status.completed_steps.contains(i) || status.failed_steps.contains(i));
        if all_done {
            state_machine
                .advance(WorkflowState::Completed, None, Some("all enabled stages done"))
                .ok();
            tracker.mark_workflow(&mut status, WorkflowState::Completed)?;
        }

        Ok(RunSummary {
            lane: status.lane,
            completed_steps: status.completed_steps.clone(),
            failed_steps: status.failed_steps.clone(),
            quality_result,
            workflow_state: status.workflow_state,
            status_path: status_config.status_path(&inputs.change_id),
        })
    }

    async fn run_single_stage(
        &self,
        tracker: &StatusTracker,
        status: &mut WorkflowStatus,
        layout: &ChangeLayout,
        inputs: &RunInputs,
        budget: &BudgetTracker,
        index: usize,
        manifest: &mut Vec<ArtifactManifestEntry>,
    ) -> EngineResult<()> {
        let handler = self
            .registry
            .get(index)
            .ok_or_else(|| crate::registry::env_error_for_missing_stage(index))?;
        let metadata = handler.describe();

        self.run_pre_step_hooks(layout, manifest, index)?;

        let mut record = StageRecord::pending();
        record.status = StageStatus::Running;
        record.started_at = Some(chrono::Utc::now());
        tracker.record_stage(status, index, record.clone())?;

        let deadline = budget.stage_deadline(metadata.timeout);
        let ctx = StageContext {
            change_id: &inputs.change_id,
            stage_index: index,
            deadline,
            dry_run: inputs.flags.dry_run,
            layout,
        };

        let result = handler.execute(&ctx).await;
        record.ended_at = Some(chrono::Utc::now());
        record.attempts += 1;

        let stage_result = match result {
            Ok(r) => r,
            Err(err) => {
                record.status = StageStatus::Failed;
                record.error = Some(err.to_string());
                tracker.record_stage(status, index, record)?;
                status.failed_steps.push(index);
                tracker.mark_workflow(status, WorkflowState::Failed)?;
                return Err(err);
            }
        };

        // A handler must not mutate artifacts an earlier stage already
        // committed; surface any drift as `ArtifactConflict` before this
        // stage's own output is added to the manifest.
        layout.verify_manifest(manifest, index)?;
        if let Some(path) = &stage_result.artifact_path {
            manifest.push(manifest_entry(layout, path)?);
        }

        record.status = if matches!(stage_result.outcome, StageOutcome::Skipped) {
            StageStatus::Skipped
        } else {
            StageStatus::Completed
        };
        tracker.record_stage(status, index, record)?;
        tracker.checkpoint(status, index, manifest.clone(), None)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_parallel_group(
        &self,
        tracker: &StatusTracker,
        status: &mut WorkflowStatus,
        layout: &ChangeLayout,
        inputs: &RunInputs,
        budget: &BudgetTracker,
        group: &[usize],
        manifest: &mut Vec<ArtifactManifestEntry>,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        self.run_pre_step_hooks(layout, manifest, group[0])?;

        for &index in group {
            let mut record = StageRecord::pending();
            record.status = StageStatus::Running;
            record.started_at = Some(chrono::Utc::now());
            tracker.record_stage(status, index, record)?;
        }

        let handlers: Vec<(Arc<dyn StageHandler>, usize)> = group
            .iter()
            .filter_map(|&i| self.registry.get(i).map(|h| (h, i)))
            .collect();

        let opts = ExecutorOptions {
            worker_count: inputs.workers.clamp(1, 8),
            per_task_timeout: budget.stage_deadline(Duration::from_secs(300)),
            cancel_on_first_error: true,
        };
        let results = executor::run_group(
            &handlers,
            &inputs.change_id,
            inputs.flags.dry_run,
            opts,
            cancel,
        )
        .await;

        status.parallel_group = Some(group.to_vec());

        // Same drift check as the serial path, applied once for the whole
        // group before any of its own outputs join the manifest.
        layout.verify_manifest(manifest, group[0])?;

        for task in &results {
            let mut record = StageRecord::pending();
            record.started_at = Some(chrono::Utc::now());
            record.ended_at = Some(chrono::Utc::now());
            record.attempts = 1;
            match task.status {
                TaskStatus::Completed => {
                    record.status = StageStatus::Completed;
                    if let Some(result) = &task.result {
                        if let Some(path) = &result.artifact_path {
                            manifest.push(manifest_entry(layout, path)?);
                        }
                    }
                }
                TaskStatus::Skipped => {
                    record.status = StageStatus::Skipped;
                }
                TaskStatus::Failed | TaskStatus::Timeout => {
                    record.status = StageStatus::Failed;
                    record.error = task.error_message.clone();
                }
            }
            tracker.record_stage(status, task.stage_index, record)?;
        }

        if let Some(failed) = results
            .iter()
            .find(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Timeout))
        {
            status.failed_steps.push(failed.stage_index);
            tracker.mark_workflow(status, WorkflowState::Failed)?;
            if let Some(err) = executor::handler_error_from_task(failed) {
                return Err(err);
            }
        }

        status.parallel_group = None;
        tracker.checkpoint(status, *group.last().unwrap(), manifest.clone(), None)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_quality_gate(
        &self,
        tracker: &StatusTracker,
        status: &mut WorkflowStatus,
        profile: &LaneProfile,
        inputs: &RunInputs,
        quality_gates: &QualityGates,
        gate_index: usize,
        quality_result: &mut Option<AggregateResult>,
    ) -> EngineResult<()> {
        if !profile.quality_gates_enabled {
            return Ok(());
        }
        let metrics = quality_gates
            .run(profile, inputs.flags.skip_quality_gates)
            .await;
        write_quality_metrics(&self.config, &inputs.change_id, &metrics)?;
        *quality_result = Some(metrics.aggregate_result);

        if metrics.aggregate_result == AggregateResult::Fail {
            if let Some(record) = status.stages.get_mut(&gate_index) {
                record.status = StageStatus::Failed;
                record.error = Some(metrics.reasons.join("; "));
            }
            status.failed_steps.push(gate_index);
            tracker.mark_workflow(status, WorkflowState::Failed)?;
            return Err(EngineError::QualityGate {
                reasons: metrics.reasons,
            });
        }
        Ok(())
    }

    /// Pre-step hooks: {validate-writable, verify-artifacts}. A conflict in
    /// the manifest (an earlier artifact's hash drifted) is fatal — it means
    /// a later stage mutated output it does not own.
    fn run_pre_step_hooks(
        &self,
        layout: &ChangeLayout,
        manifest: &[ArtifactManifestEntry],
        stage_index: usize,
    ) -> EngineResult<()> {
        layout.ensure()?;
        layout.verify_manifest(manifest, stage_index)
    }
}

fn manifest_entry(layout: &ChangeLayout, path: &str) -> EngineResult<ArtifactManifestEntry> {
    let bytes = layout.read_artifact(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(ArtifactManifestEntry {
        path: path.to_string(),
        sha256: format!("{:x}", hasher.finalize()),
        size: bytes.len() as u64,
    })
}

fn write_quality_metrics(
    config: &EngineConfig,
    change_id: &str,
    metrics: &workflow_core::QualityMetrics,
) -> EngineResult<()> {
    let path = config.quality_metrics_path(change_id);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    let contents = serde_json::to_string_pretty(metrics)?;
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

fn environment_snapshot(owner: &str) -> workflow_core::EnvironmentSnapshot {
    let _ = owner;
    workflow_core::EnvironmentSnapshot {
        runtime_version: env!("CARGO_PKG_VERSION").to_string(),
        tool_versions: std::collections::BTreeMap::new(),
        host_os: std::env::consts::OS.to_string(),
        working_directory: std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        git_clean: detect_working_tree_files().is_empty(),
        writable_paths: vec![],
    }
}

/// Lists files the change touches via `git status --porcelain`. An
/// unreadable or absent working tree is treated as "no code files" rather
/// than an error — the Lane Router then proposes `docs`, the conservative
/// default for an empty signal.
fn detect_working_tree_files() -> Vec<String> {
    std::process::Command::new("git")
        .args(["status", "--porcelain"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| {
            String::from_utf8_lossy(&o.stdout)
                .lines()
                .filter_map(|line| line.get(3..).map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
