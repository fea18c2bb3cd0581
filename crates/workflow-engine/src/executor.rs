//! Parallel Executor: runs a parallel group of stage handlers with
//! deterministic output ordering, per-task timeout, cancellation, and
//! failure isolation.
//!
//! A bounded worker pool drawn from an internal queue ordered by stage
//! index; completion order is unordered but commit order (writing results
//! into status and on-disk artifacts) is strictly by stage index — the
//! executor buffers completions and releases them in ascending order. This
//! generalizes the tokio usage already in this lineage: bounded concurrency
//! via `tokio::sync::Semaphore`, per-task deadlines via `tokio::time::timeout`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::registry::{StageContext, StageHandler, StageResult};
use workflow_core::{ChangeLayout, EngineError, EngineResult, HandlerErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Completed,
    Failed,
    Timeout,
    Skipped,
}

pub struct TaskResult {
    pub stage_index: usize,
    pub status: TaskStatus,
    pub result: Option<StageResult>,
    pub error_message: Option<String>,
}

pub struct ExecutorOptions {
    pub worker_count: usize,
    pub per_task_timeout: Duration,
    pub cancel_on_first_error: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            worker_count: 3,
            per_task_timeout: Duration::from_secs(300),
            cancel_on_first_error: true,
        }
    }
}

impl ExecutorOptions {
    pub fn clamped(mut self) -> Self {
        self.worker_count = self.worker_count.clamp(1, 8);
        self
    }
}

const GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Run `handlers` (each paired with its stage index) concurrently, bounded
/// by `opts.worker_count`. Returns results sorted by stage index regardless
/// of completion order, matching the submission/commit ordering contract.
///
/// `external_cancel` is separate from the internal cancel-on-first-error
/// token: it is driven from outside the group (the engine's top-level run
/// cancellation, itself driven by a signal in the binary), so a still-queued
/// task skips rather than starts, and an in-flight task's race against it
/// resolves to `Skipped` rather than waiting out its full timeout.
pub async fn run_group(
    handlers: &[(Arc<dyn StageHandler>, usize)],
    change_id: &str,
    dry_run: bool,
    opts: ExecutorOptions,
    external_cancel: &CancellationToken,
) -> Vec<TaskResult> {
    let opts = opts.clamped();
    let semaphore = Arc::new(Semaphore::new(opts.worker_count));
    let cancel = CancellationToken::new();

    let mut join_set = tokio::task::JoinSet::new();

    for (handler, stage_index) in handlers.iter().cloned() {
        let permit_sem = semaphore.clone();
        let cancel_token = cancel.clone();
        let external = external_cancel.clone();
        let change_id = change_id.to_string();
        let timeout = opts.per_task_timeout;

        join_set.spawn(async move {
            let _permit = permit_sem.acquire().await.expect("semaphore closed");
            if cancel_token.is_cancelled() || external.is_cancelled() {
                return TaskResult {
                    stage_index,
                    status: TaskStatus::Skipped,
                    result: None,
                    error_message: None,
                };
            }

            let layout = ChangeLayout::new(&change_id);
            let ctx = StageContext {
                change_id: &change_id,
                stage_index,
                deadline: timeout,
                dry_run,
                layout: &layout,
            };

            let run = handler.execute(&ctx);
            tokio::select! {
                result = tokio::time::timeout(timeout + GRACE_PERIOD, run) => match result {
                    Ok(Ok(result)) => TaskResult {
                        stage_index,
                        status: TaskStatus::Completed,
                        result: Some(result),
                        error_message: None,
                    },
                    Ok(Err(err)) => TaskResult {
                        stage_index,
                        status: TaskStatus::Failed,
                        result: None,
                        error_message: Some(err.to_string()),
                    },
                    Err(_) => TaskResult {
                        stage_index,
                        status: TaskStatus::Timeout,
                        result: None,
                        error_message: Some(format!(
                            "stage {stage_index} timed out after {timeout:?}"
                        )),
                    },
                },
                _ = external.cancelled() => TaskResult {
                    stage_index,
                    status: TaskStatus::Skipped,
                    result: None,
                    error_message: Some("canceled by external signal".to_string()),
                },
            }
        });
    }

    let mut results = Vec::with_capacity(handlers.len());
    while let Some(joined) = join_set.join_next().await {
        let result = joined.expect("task panicked");
        if opts.cancel_on_first_error
            && matches!(result.status, TaskStatus::Failed | TaskStatus::Timeout)
        {
            cancel.cancel();
        }
        results.push(result);
    }

    results.sort_by_key(|r| r.stage_index);
    results
}

pub fn handler_error_from_task(task: &TaskResult) -> Option<EngineError> {
    match task.status {
        TaskStatus::Failed => Some(EngineError::handler(
            task.stage_index,
            HandlerErrorKind::Fatal,
            task.error_message.clone().unwrap_or_default(),
            vec![],
        )),
        TaskStatus::Timeout => Some(EngineError::handler(
            task.stage_index,
            HandlerErrorKind::Timeout,
            task.error_message.clone().unwrap_or_default(),
            vec![],
        )),
        _ => None,
    }
}

pub fn all_completed(results: &[TaskResult]) -> EngineResult<()> {
    for task in results {
        if let Some(err) = handler_error_from_task(task) {
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DefaultStageHandler, StageMetadata};
    use tempfile::tempdir;

    fn metadata(index: usize) -> StageMetadata {
        StageMetadata {
            index,
            name: "proposal_review",
            declared_inputs: vec![],
            declared_outputs: vec![format!("{index:02}.marker")],
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn group_runs_all_tasks_and_preserves_index_order() {
        let dir = tempdir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        ChangeLayout::new("add-x").ensure().unwrap();

        let handlers: Vec<(Arc<dyn StageHandler>, usize)> = vec![
            (
                Arc::new(DefaultStageHandler::new(metadata(4), true)) as Arc<dyn StageHandler>,
                4,
            ),
            (
                Arc::new(DefaultStageHandler::new(metadata(2), true)) as Arc<dyn StageHandler>,
                2,
            ),
        ];

        let results = run_group(
            &handlers,
            "add-x",
            false,
            ExecutorOptions::default(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].stage_index, 2);
        assert_eq!(results[1].stage_index, 4);
        assert!(all_completed(&results).is_ok());
    }

    #[tokio::test]
    async fn workers_one_serializes_without_losing_tasks() {
        let dir = tempdir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        ChangeLayout::new("add-x").ensure().unwrap();

        let handlers: Vec<(Arc<dyn StageHandler>, usize)> = (2..=6)
            .map(|i| {
                (
                    Arc::new(DefaultStageHandler::new(metadata(i), true)) as Arc<dyn StageHandler>,
                    i,
                )
            })
            .collect();

        let opts = ExecutorOptions {
            worker_count: 1,
            ..ExecutorOptions::default()
        };
        let results = run_group(&handlers, "add-x", false, opts, &CancellationToken::new()).await;
        assert_eq!(results.len(), 5);
        assert!(all_completed(&results).is_ok());
    }

    #[tokio::test]
    async fn external_cancellation_skips_queued_tasks() {
        let dir = tempdir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        ChangeLayout::new("add-x").ensure().unwrap();

        let handlers: Vec<(Arc<dyn StageHandler>, usize)> = vec![(
            Arc::new(DefaultStageHandler::new(metadata(2), true)) as Arc<dyn StageHandler>,
            2,
        )];

        let external = CancellationToken::new();
        external.cancel();
        let results = run_group(&handlers, "add-x", false, ExecutorOptions::default(), &external)
            .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, TaskStatus::Skipped);
    }
}
