//! Status Tracker & Checkpoints: durable, crash-safe persistence of workflow
//! state plus append-only checkpoints, with detection and resumption of
//! incomplete runs.
//!
//! Writes follow the write-to-temp, fsync, rename-over-target discipline
//! used for every other durable artifact this crate produces. Only one
//! engine instance may hold the lock on a change's status directory at a
//! time; concurrent runs fail fast.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::model::{
    ArtifactManifestEntry, Checkpoint, EnvironmentSnapshot, Lane, StageRecord, StageStatus,
    WorkflowState, WorkflowStatus, STATUS_SCHEMA_VERSION,
};
use chrono::Utc;
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

pub enum ResumeResult {
    Fresh(WorkflowStatus),
    Restored(WorkflowStatus),
    IncompatibleSchema { found: u32, expected: u32 },
}

/// Holds the advisory lock on `.checkpoints/<change_id>/.lock` for the
/// lifetime of an engine run targeting that change.
pub struct StatusTracker {
    change_id: String,
    config: EngineConfig,
    _lock_file: File,
}

impl StatusTracker {
    /// Acquire the per-change lock and load or initialize `status.json`.
    /// Fails fast if another engine instance already holds the lock.
    ///
    /// `enable_checkpoints=false` forbids resuming a prior incomplete run for
    /// this change: any existing `status.json` is ignored and overwritten
    /// with a fresh one, exactly as if no prior run existed.
    pub fn load_or_init(
        config: &EngineConfig,
        change_id: &str,
        lane: Lane,
        environment: EnvironmentSnapshot,
        enable_checkpoints: bool,
    ) -> EngineResult<(Self, ResumeResult)> {
        let dir = config.change_dir(change_id);
        std::fs::create_dir_all(&dir)?;

        let lock_path = config.lock_path(change_id);
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        lock_file.try_lock_exclusive().map_err(|_| {
            EngineError::StatusCorruption {
                path: lock_path.clone(),
                message: "another engine instance holds the lock for this change".to_string(),
            }
        })?;

        let tracker = Self {
            change_id: change_id.to_string(),
            config: config.clone(),
            _lock_file: lock_file,
        };

        let status_path = config.status_path(change_id);
        let resume = if status_path.exists() && enable_checkpoints {
            let raw = std::fs::read_to_string(&status_path)?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            let found_version = value
                .get("schema_version")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32;
            if found_version != STATUS_SCHEMA_VERSION {
                ResumeResult::IncompatibleSchema {
                    found: found_version,
                    expected: STATUS_SCHEMA_VERSION,
                }
            } else {
                let status: WorkflowStatus = serde_json::from_value(value)?;
                ResumeResult::Restored(status)
            }
        } else {
            let status = WorkflowStatus::new(change_id, lane, environment);
            tracker.write_status(&status)?;
            ResumeResult::Fresh(status)
        };

        Ok((tracker, resume))
    }

    fn status_path(&self) -> std::path::PathBuf {
        self.config.status_path(&self.change_id)
    }

    fn write_status(&self, status: &WorkflowStatus) -> EngineResult<()> {
        atomic_write_json(&self.status_path(), status)?;
        self.append_journal(&format!(
            "{} status write: step={} state={:?}",
            Utc::now().to_rfc3339(),
            status.current_step,
            status.workflow_state
        ))
    }

    fn append_journal(&self, line: &str) -> EngineResult<()> {
        let path = self.config.journal_path(&self.change_id);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    pub fn record_stage(
        &self,
        status: &mut WorkflowStatus,
        index: usize,
        update: StageRecord,
    ) -> EngineResult<()> {
        let is_completed = update.status == StageStatus::Completed;
        let is_failed = update.status == StageStatus::Failed;
        status.stages.insert(index, update);
        if is_completed && !status.completed_steps.contains(&index) {
            status.completed_steps.push(index);
        }
        if is_failed && !status.failed_steps.contains(&index) {
            status.failed_steps.push(index);
        }
        status.current_step = index;
        status.last_updated_at = Utc::now();
        self.write_status(status)
    }

    /// Append a checkpoint file and refresh `status.json`. Checkpoints are
    /// never rewritten in place, only appended.
    pub fn checkpoint(
        &self,
        status: &WorkflowStatus,
        step_index: usize,
        artifact_manifest: Vec<ArtifactManifestEntry>,
        vcs_ref: Option<String>,
    ) -> EngineResult<()> {
        let checkpoint = Checkpoint {
            step_index,
            timestamp: Utc::now(),
            status_snapshot: status.clone(),
            artifact_manifest,
            vcs_ref,
        };
        let timestamp = checkpoint.timestamp.format("%Y%m%dT%H%M%SZ").to_string();
        let path = self
            .config
            .checkpoint_path(&self.change_id, step_index, &timestamp);
        atomic_write_json(&path, &checkpoint)?;
        self.append_journal(&format!(
            "{} checkpoint step={step_index} path={}",
            Utc::now().to_rfc3339(),
            path.display()
        ))
    }

    pub fn mark_workflow(
        &self,
        status: &mut WorkflowStatus,
        state: WorkflowState,
    ) -> EngineResult<()> {
        status.workflow_state = state;
        status.last_updated_at = Utc::now();
        self.write_status(status)
    }
}

fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> EngineResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    let contents = serde_json::to_string_pretty(value)?;
    {
        let mut file = File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn env() -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            runtime_version: "1.0".into(),
            tool_versions: BTreeMap::new(),
            host_os: "linux".into(),
            working_directory: "/tmp".into(),
            git_clean: true,
            writable_paths: vec![],
        }
    }

    #[test]
    fn fresh_change_initializes_status() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            workflow_home: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };
        let (_tracker, resume) =
            StatusTracker::load_or_init(&config, "add-x", Lane::Standard, env(), true).unwrap();
        assert!(matches!(resume, ResumeResult::Fresh(_)));
        assert!(config.status_path("add-x").exists());
    }

    #[test]
    fn second_lock_attempt_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            workflow_home: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };
        let (_tracker, _resume) =
            StatusTracker::load_or_init(&config, "add-x", Lane::Standard, env(), true).unwrap();
        let second = StatusTracker::load_or_init(&config, "add-x", Lane::Standard, env(), true);
        assert!(second.is_err());
    }

    #[test]
    fn record_stage_updates_completed_steps() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            workflow_home: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };
        let (tracker, resume) =
            StatusTracker::load_or_init(&config, "add-x", Lane::Standard, env(), true).unwrap();
        let ResumeResult::Fresh(mut status) = resume else {
            panic!("expected fresh status")
        };
        let mut record = StageRecord::pending();
        record.status = StageStatus::Completed;
        tracker.record_stage(&mut status, 0, record).unwrap();
        assert_eq!(status.completed_steps, vec![0]);
    }

    #[test]
    fn restoring_unknown_schema_version_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            workflow_home: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };
        std::fs::create_dir_all(config.change_dir("add-x")).unwrap();
        std::fs::write(
            config.status_path("add-x"),
            r#"{"schema_version": 99, "change_id": "add-x"}"#,
        )
        .unwrap();
        let (_tracker, resume) =
            StatusTracker::load_or_init(&config, "add-x", Lane::Standard, env(), true).unwrap();
        assert!(matches!(
            resume,
            ResumeResult::IncompatibleSchema { found: 99, .. }
        ));
    }

    #[test]
    fn disabling_checkpoints_ignores_prior_incomplete_status() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            workflow_home: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };

        {
            let (tracker, resume) =
                StatusTracker::load_or_init(&config, "add-x", Lane::Standard, env(), true)
                    .unwrap();
            let ResumeResult::Fresh(mut status) = resume else {
                panic!("expected fresh status")
            };
            let mut record = StageRecord::pending();
            record.status = StageStatus::Completed;
            tracker.record_stage(&mut status, 0, record).unwrap();
        }

        let (_tracker, resume) =
            StatusTracker::load_or_init(&config, "add-x", Lane::Standard, env(), false).unwrap();
        match resume {
            ResumeResult::Fresh(status) => assert!(status.completed_steps.is_empty()),
            _ => panic!("expected enable_checkpoints=false to force a fresh status"),
        }
    }
}
