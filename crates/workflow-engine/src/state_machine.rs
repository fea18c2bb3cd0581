//! Workflow state machine: explicit states and legal transition guards, plus
//! the budget tracker that bounds per-stage and whole-run wall-clock time.
//!
//! Implemented the way the orchestrator loop this crate descends from
//! implements it: a pure predicate over `(from, to)` pairs, a transition log,
//! and `is_terminal()` on the state type — except the state set here is the
//! engine's fixed `initialized → running → (paused | failed | completed)`
//! workflow lifecycle rather than an agent's multi-phase retry loop.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use workflow_core::WorkflowState;

fn is_legal_transition(from: WorkflowState, to: WorkflowState) -> bool {
    use WorkflowState::*;
    matches!(
        (from, to),
        (Initialized, Running)
            | (Running, Paused)
            | (Running, Failed)
            | (Running, Completed)
            | (Paused, Running)
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub stage_index: Option<usize>,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: WorkflowState,
    pub to: WorkflowState,
}

impl std::fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "illegal workflow transition: {:?} -> {:?}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

#[derive(Debug)]
pub struct WorkflowStateMachine {
    current: WorkflowState,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl WorkflowStateMachine {
    pub fn new(initial: WorkflowState) -> Self {
        Self {
            current: initial,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> WorkflowState {
        self.current
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn advance(
        &mut self,
        to: WorkflowState,
        stage_index: Option<usize>,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }
        tracing::debug!(from = ?self.current, to = ?to, stage_index, "workflow state transition");
        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            stage_index,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }
}

/// Tracks per-stage wall-clock budgets and the whole-run SLA budget with
/// explicit `Instant` anchors, consulted by the engine before dispatching
/// each stage — never via ambient/global timers.
#[derive(Debug)]
pub struct BudgetTracker {
    run_started_at: Instant,
    sla_budget: Duration,
    stage_started_at: Option<Instant>,
}

impl BudgetTracker {
    pub fn new(sla_budget: Duration) -> Self {
        Self {
            run_started_at: Instant::now(),
            sla_budget,
            stage_started_at: None,
        }
    }

    pub fn start_stage(&mut self) {
        self.stage_started_at = Some(Instant::now());
    }

    pub fn sla_remaining(&self) -> Duration {
        self.sla_budget
            .saturating_sub(self.run_started_at.elapsed())
    }

    /// Deadline for the current stage: the smaller of its own timeout and
    /// whatever remains of the whole-run SLA budget.
    pub fn stage_deadline(&self, stage_timeout: Duration) -> Duration {
        stage_timeout.min(self.sla_remaining())
    }

    pub fn sla_exhausted(&self) -> bool {
        self.sla_remaining().is_zero()
    }
}
