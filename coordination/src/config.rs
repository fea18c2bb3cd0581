//! Engine-wide configuration, layered env-vars under CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub workflow_home: PathBuf,
    pub tool_timeout: Duration,
    pub workers: usize,
    pub noninteractive: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workflow_home: default_workflow_home(),
            tool_timeout: Duration::from_millis(120_000),
            workers: default_workers(),
            noninteractive: false,
        }
    }
}

fn default_workflow_home() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".workflow")
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(5)
}

impl EngineConfig {
    /// Reads `WORKFLOW_HOME`, `WORKFLOW_TOOL_TIMEOUT_MS`, `WORKFLOW_WORKERS`,
    /// `WORKFLOW_NONINTERACTIVE`, falling back to defaults for anything unset
    /// or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(home) = std::env::var("WORKFLOW_HOME") {
            if !home.is_empty() {
                config.workflow_home = PathBuf::from(home);
            }
        }
        if let Ok(ms) = std::env::var("WORKFLOW_TOOL_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                config.tool_timeout = Duration::from_millis(ms);
            }
        }
        if let Ok(workers) = std::env::var("WORKFLOW_WORKERS") {
            if let Ok(workers) = workers.parse::<usize>() {
                if workers > 0 {
                    config.workers = workers;
                }
            }
        }
        if let Ok(flag) = std::env::var("WORKFLOW_NONINTERACTIVE") {
            config.noninteractive = matches!(flag.as_str(), "1" | "true" | "yes");
        }

        config
    }

    pub fn change_dir(&self, change_id: &str) -> PathBuf {
        self.workflow_home.join(".checkpoints").join(change_id)
    }

    pub fn status_path(&self, change_id: &str) -> PathBuf {
        self.change_dir(change_id).join("status.json")
    }

    pub fn journal_path(&self, change_id: &str) -> PathBuf {
        self.change_dir(change_id).join("journal.log")
    }

    pub fn lock_path(&self, change_id: &str) -> PathBuf {
        self.change_dir(change_id).join(".lock")
    }

    pub fn checkpoint_path(&self, change_id: &str, step_index: usize, timestamp: &str) -> PathBuf {
        self.change_dir(change_id)
            .join(format!("checkpoint-{step_index:02}-{timestamp}.json"))
    }

    pub fn quality_metrics_path(&self, change_id: &str) -> PathBuf {
        self.change_dir(change_id).join("quality_metrics.json")
    }

    /// A config rooted under a sibling "shadow" tree, used for dry runs so
    /// `status.json` and checkpoints never land in the durable location.
    pub fn shadow(&self) -> Self {
        Self {
            workflow_home: self.workflow_home.join(".dry-run-shadow"),
            ..self.clone()
        }
    }
}

pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}
