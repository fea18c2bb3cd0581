//! CLI surface: exactly the flag set the engine's external interface
//! exposes, converted into an `EngineConfig` overlay and a `RunInputs` value.

use clap::Parser;
use workflow_core::{ChangeFlags, EngineConfig, Lane, ReleaseType};

use crate::orchestrator::RunInputs;

#[derive(Debug, Parser)]
#[command(name = "workflow-engine", about = "Runs the 13-stage change-workflow pipeline")]
pub struct Args {
    /// Slug identifying the change; lowercase alphanumeric and hyphens.
    #[arg(long)]
    pub change_id: String,

    #[arg(long, default_value = "")]
    pub title: String,

    #[arg(long)]
    pub owner: String,

    /// docs | standard | heavy. Omit to let the Lane Router decide.
    #[arg(long)]
    pub lane: Option<String>,

    /// Repeatable; restricts the run to this subset of stage indices.
    #[arg(long = "step")]
    pub step: Vec<usize>,

    #[arg(long, default_value = "patch")]
    pub release_type: String,

    #[arg(long)]
    pub dry_run: bool,

    #[arg(long)]
    pub skip_quality_gates: bool,

    /// False forbids resume on a later invocation of the same change.
    #[arg(long, default_value_t = true, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub enable_checkpoints: bool,

    #[arg(long, overrides_with = "no_interactive")]
    pub interactive: bool,

    #[arg(long = "no-interactive", overrides_with = "interactive")]
    pub no_interactive: bool,

    #[arg(long)]
    pub workers: Option<usize>,
}

impl Args {
    pub fn engine_config(&self, base: EngineConfig) -> EngineConfig {
        let mut config = base;
        if let Some(workers) = self.workers {
            config.workers = workers.clamp(1, 8);
        }
        config
    }

    /// `env_noninteractive` is `WORKFLOW_NONINTERACTIVE`'s resolved value;
    /// explicit `--interactive`/`--no-interactive` flags take precedence
    /// over it, matching the CLI-wins-over-env rule.
    pub fn run_inputs(&self, env_noninteractive: bool) -> Result<RunInputs, String> {
        let explicit_lane = self
            .lane
            .as_deref()
            .map(|s| s.parse::<Lane>())
            .transpose()?;
        let release_type = self.release_type.parse::<ReleaseType>()?;

        let mut flags = ChangeFlags::new();
        flags.dry_run = self.dry_run;
        flags.skip_quality_gates = self.skip_quality_gates;
        flags.enable_checkpoints = self.enable_checkpoints;
        flags.interactive = if self.no_interactive {
            false
        } else if self.interactive {
            true
        } else {
            !env_noninteractive
        };

        Ok(RunInputs {
            change_id: self.change_id.clone(),
            title: self.title.clone(),
            owner: self.owner.clone(),
            explicit_lane,
            steps: if self.step.is_empty() {
                None
            } else {
                Some(self.step.clone())
            },
            release_type,
            flags,
            workers: self.workers.unwrap_or(3),
        })
    }
}
