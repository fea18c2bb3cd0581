//! Stage Registry & Handlers: the fixed list of 13 handlers, exposed as a
//! polymorphic collection over `{execute, describe, is_independent}`.
//!
//! Registration happens once at engine construction and is never mutated at
//! runtime — dynamic dispatch over a shared trait, not an enum match, since
//! handlers are meant to be pluggable per the external interfaces.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use sha2::{Digest, Sha256};
use workflow_core::{ChangeLayout, EngineError, EngineResult};

#[derive(Debug, Clone)]
pub struct StageMetadata {
    pub index: usize,
    pub name: &'static str,
    pub declared_inputs: Vec<String>,
    pub declared_outputs: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct StageResult {
    pub outcome: StageOutcome,
    pub artifact_path: Option<String>,
}

pub struct StageContext<'a> {
    pub change_id: &'a str,
    pub stage_index: usize,
    pub deadline: Duration,
    pub dry_run: bool,
    pub layout: &'a ChangeLayout,
}

#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn execute(&self, ctx: &StageContext<'_>) -> EngineResult<StageResult>;
    fn describe(&self) -> StageMetadata;
    fn is_independent(&self) -> bool {
        false
    }
}

/// The crate ships a working, deterministic default handler so the pipeline
/// is runnable end to end without an external document generator plugged
/// in: it stamps a marker artifact containing the stage name, its declared
/// inputs, and a content hash of those inputs.
pub struct DefaultStageHandler {
    metadata: StageMetadata,
    independent: bool,
}

impl DefaultStageHandler {
    pub fn new(metadata: StageMetadata, independent: bool) -> Self {
        Self {
            metadata,
            independent,
        }
    }
}

#[async_trait]
impl StageHandler for DefaultStageHandler {
    async fn execute(&self, ctx: &StageContext<'_>) -> EngineResult<StageResult> {
        if ctx.dry_run {
            return Ok(StageResult {
                outcome: StageOutcome::Completed,
                artifact_path: None,
            });
        }

        let mut hasher = Sha256::new();
        for input in &self.metadata.declared_inputs {
            if let Ok(contents) = ctx.layout.read_artifact(input) {
                hasher.update(&contents);
            }
        }
        let input_hash = format!("{:x}", hasher.finalize());

        let marker = format!(
            "stage: {}\ndeclared_inputs: {:?}\ninput_hash: {input_hash}\n",
            self.metadata.name, self.metadata.declared_inputs,
        );
        let path = format!("{:02}-{}.marker", self.metadata.index, self.metadata.name);
        ctx.layout.put_artifact(&path, marker.as_bytes())?;

        Ok(StageResult {
            outcome: StageOutcome::Completed,
            artifact_path: Some(path),
        })
    }

    fn describe(&self) -> StageMetadata {
        self.metadata.clone()
    }

    fn is_independent(&self) -> bool {
        self.independent
    }
}

/// Ordered, fixed-length registry of stage handlers, indexed by stage index.
///
/// Handlers are held behind `Arc` rather than `Box` so the Parallel Executor
/// can hand owned, `'static` clones to `tokio::spawn` instead of requiring a
/// `LocalSet` for borrowed trait objects.
pub struct StageRegistry {
    handlers: Vec<Arc<dyn StageHandler>>,
}

impl StageRegistry {
    /// Build the default registry: 13 deterministic marker handlers, with
    /// stages 2..6 (the parallelizable window) declaring independence and a
    /// one-input/one-output shape that never collides with its siblings.
    pub fn default_registry() -> Self {
        use workflow_core::STAGE_NAMES;

        let mut handlers: Vec<Arc<dyn StageHandler>> = Vec::with_capacity(STAGE_NAMES.len());
        for (index, name) in STAGE_NAMES.iter().enumerate() {
            let independent = (2..=6).contains(&index);
            let declared_inputs = if index == 0 {
                vec![]
            } else {
                vec![format!(
                    "{:02}-{}.marker",
                    index - 1,
                    STAGE_NAMES[index - 1]
                )]
            };
            let metadata = StageMetadata {
                index,
                name,
                declared_inputs: if independent { vec![] } else { declared_inputs },
                declared_outputs: vec![format!("{index:02}-{name}.marker")],
                timeout: Duration::from_secs(300),
            };
            handlers.push(Arc::new(DefaultStageHandler::new(metadata, independent)));
        }
        Self { handlers }
    }

    pub fn get(&self, index: usize) -> Option<Arc<dyn StageHandler>> {
        self.handlers.get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Verify the parallelizable window's handlers are independent via a
    /// cycle check over declared inputs/outputs. A conflict downgrades the
    /// group to serial execution rather than erroring.
    pub fn verify_independence(&self, indices: &[usize]) -> bool {
        let mut graph = DiGraph::<usize, ()>::new();
        let nodes: Vec<_> = indices.iter().map(|&i| graph.add_node(i)).collect();

        for (a_pos, &a_index) in indices.iter().enumerate() {
            let Some(handler_a) = self.get(a_index) else {
                continue;
            };
            let outputs_a = handler_a.describe().declared_outputs;
            for (b_pos, &b_index) in indices.iter().enumerate() {
                if a_pos == b_pos {
                    continue;
                }
                let Some(handler_b) = self.get(b_index) else {
                    continue;
                };
                let reads_a_output = handler_b
                    .describe()
                    .declared_inputs
                    .iter()
                    .any(|input| outputs_a.contains(input));
                if reads_a_output {
                    graph.add_edge(nodes[a_pos], nodes[b_pos], ());
                }
            }
        }

        !is_cyclic_directed(&graph)
            && indices
                .iter()
                .filter_map(|&i| self.get(i))
                .all(|h| h.is_independent())
    }
}

pub fn env_error_for_missing_stage(index: usize) -> EngineError {
    EngineError::environment(format!("no handler registered for stage {index}"))
}
