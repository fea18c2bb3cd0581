//! End-to-end smoke tests driving `Engine::run` through a git-backed temp
//! directory, one per documented scenario: the docs fast path, a full
//! standard run, a heavy-lane gate failure, resume across two invocations,
//! parallel-window determinism, and an interactive lane-mismatch override.
//! None of these shell out to ruff/mypy/pytest/bandit on purpose — the
//! heavy-lane scenario relies on those binaries being absent in the test
//! sandbox to exercise the fail-closed tool_error path deterministically.

use std::path::Path;
use std::sync::Arc;

use workflow_core::{ChangeFlags, EngineConfig, Lane, ReleaseType};
use workflow_engine::{Engine, ResumeChoice, RunInputs, ScriptedPrompt};

fn init_git_repo(dir: &Path) {
    for args in [
        vec!["init", "-q"],
        vec!["config", "user.email", "test@example.com"],
        vec!["config", "user.name", "Workflow Test"],
    ] {
        std::process::Command::new("git")
            .args(&args)
            .current_dir(dir)
            .output()
            .unwrap();
    }
}

fn base_inputs(change_id: &str) -> RunInputs {
    RunInputs {
        change_id: change_id.to_string(),
        title: "smoke test change".to_string(),
        owner: "alice".to_string(),
        explicit_lane: None,
        steps: None,
        release_type: ReleaseType::Patch,
        flags: ChangeFlags::new(),
        workers: 3,
    }
}

#[tokio::test]
async fn docs_lane_auto_classified_on_clean_tree() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();
    init_git_repo(dir.path());

    let config = EngineConfig {
        workflow_home: dir.path().join("home"),
        ..EngineConfig::default()
    };
    let engine = Engine::new(config);
    let inputs = base_inputs("update-readme");

    let summary = engine.run(inputs).await.unwrap();
    assert_eq!(summary.lane, Lane::Docs);
    let mut completed = summary.completed_steps.clone();
    completed.sort();
    assert_eq!(completed, vec![0, 2, 3, 4, 9, 10, 11, 12]);
}

#[tokio::test]
async fn standard_lane_full_run_skips_quality_gates_on_request() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();
    init_git_repo(dir.path());
    std::fs::write(dir.path().join("app.py"), b"print('hi')\n").unwrap();
    std::process::Command::new("git")
        .args(["add", "app.py"])
        .current_dir(dir.path())
        .output()
        .unwrap();

    let config = EngineConfig {
        workflow_home: dir.path().join("home"),
        ..EngineConfig::default()
    };
    let engine = Engine::new(config);
    let mut inputs = base_inputs("add-feature");
    inputs.explicit_lane = Some(Lane::Standard);
    inputs.flags.skip_quality_gates = true;

    let summary = engine.run(inputs).await.unwrap();
    assert_eq!(summary.lane, Lane::Standard);
    assert_eq!(summary.completed_steps.len(), 13);
    assert!(summary.failed_steps.is_empty());
    assert_eq!(
        summary.quality_result,
        Some(workflow_core::AggregateResult::Skipped)
    );
    assert!(summary.status_path.exists());
}

#[tokio::test]
async fn heavy_lane_fails_closed_when_quality_tools_are_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();
    init_git_repo(dir.path());

    let config = EngineConfig {
        workflow_home: dir.path().join("home"),
        ..EngineConfig::default()
    };
    let engine = Engine::new(config);
    let mut inputs = base_inputs("ship-release");
    inputs.explicit_lane = Some(Lane::Heavy);

    let err = engine.run(inputs).await.unwrap_err();
    // Either the tool really is missing (ToolError -> QualityGate Fail, exit
    // 30) or thresholds reject the empty summaries produced by a dry
    // sandbox; both land on the same documented exit code.
    assert_eq!(err.exit_code(), 30);
}

#[tokio::test]
async fn partial_run_then_full_run_resumes_without_redoing_completed_stages() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();
    init_git_repo(dir.path());

    let config = EngineConfig {
        workflow_home: dir.path().join("home"),
        ..EngineConfig::default()
    };
    let engine = Engine::new(config);

    let mut first = base_inputs("phased-change");
    first.explicit_lane = Some(Lane::Docs);
    first.steps = Some(vec![0]);
    let first_summary = engine.run(first).await.unwrap();
    assert_eq!(first_summary.completed_steps, vec![0]);
    assert_eq!(
        first_summary.workflow_state,
        workflow_core::WorkflowState::Running
    );

    let resuming_engine = Engine::with_prompt(
        EngineConfig {
            workflow_home: dir.path().join("home"),
            ..EngineConfig::default()
        },
        Arc::new(ScriptedPrompt {
            resume: ResumeChoice::Resume,
            switch_lane: false,
        }),
    );
    let mut second = base_inputs("phased-change");
    second.explicit_lane = Some(Lane::Docs);
    let second_summary = resuming_engine.run(second).await.unwrap();
    let mut completed = second_summary.completed_steps.clone();
    completed.sort();
    assert_eq!(completed, vec![0, 2, 3, 4, 9, 10, 11, 12]);
    assert_eq!(
        second_summary.workflow_state,
        workflow_core::WorkflowState::Completed
    );
}

#[tokio::test]
async fn parallel_window_commits_in_stage_index_order() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();
    init_git_repo(dir.path());
    std::fs::write(dir.path().join("lib.py"), b"x = 1\n").unwrap();
    std::process::Command::new("git")
        .args(["add", "lib.py"])
        .current_dir(dir.path())
        .output()
        .unwrap();

    let config = EngineConfig {
        workflow_home: dir.path().join("home"),
        ..EngineConfig::default()
    };
    let engine = Engine::new(config);
    let mut inputs = base_inputs("parallel-change");
    inputs.explicit_lane = Some(Lane::Standard);
    inputs.flags.skip_quality_gates = true;
    inputs.workers = 4;

    let summary = engine.run(inputs).await.unwrap();
    let window: Vec<usize> = summary
        .completed_steps
        .iter()
        .copied()
        .filter(|i| (2..=6).contains(i))
        .collect();
    assert_eq!(window, vec![2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn interactive_run_allows_lane_mismatch_override() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();
    init_git_repo(dir.path());
    std::fs::write(dir.path().join("foo.py"), b"print(1)\n").unwrap();
    std::process::Command::new("git")
        .args(["add", "foo.py"])
        .current_dir(dir.path())
        .output()
        .unwrap();

    let config = EngineConfig {
        workflow_home: dir.path().join("home"),
        ..EngineConfig::default()
    };
    let engine = Engine::with_prompt(
        config,
        Arc::new(ScriptedPrompt {
            resume: ResumeChoice::Resume,
            switch_lane: true,
        }),
    );
    let mut inputs = base_inputs("add-x-interactive");
    inputs.explicit_lane = Some(Lane::Docs);
    inputs.flags.interactive = true;
    inputs.flags.skip_quality_gates = true;

    let summary = engine.run(inputs).await.unwrap();
    assert_eq!(summary.lane, Lane::Standard);
}

#[tokio::test]
async fn canceled_run_pauses_then_resumes_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();
    init_git_repo(dir.path());

    let config = EngineConfig {
        workflow_home: dir.path().join("home"),
        ..EngineConfig::default()
    };
    let engine = Engine::new(config);

    let mut first = base_inputs("sigint-change");
    first.explicit_lane = Some(Lane::Docs);
    let cancel = tokio_util::sync::CancellationToken::new();
    cancel.cancel();
    let err = engine.run_cancelable(first, cancel).await.unwrap_err();
    assert_eq!(err.exit_code(), 130);

    let resuming_engine = Engine::with_prompt(
        EngineConfig {
            workflow_home: dir.path().join("home"),
            ..EngineConfig::default()
        },
        Arc::new(ScriptedPrompt {
            resume: ResumeChoice::Resume,
            switch_lane: false,
        }),
    );
    let mut second = base_inputs("sigint-change");
    second.explicit_lane = Some(Lane::Docs);
    second.flags.interactive = true;
    let summary = resuming_engine.run(second).await.unwrap();
    assert_eq!(
        summary.workflow_state,
        workflow_core::WorkflowState::Completed
    );
}

#[tokio::test]
async fn dry_run_marks_status_and_skips_nothing() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();
    init_git_repo(dir.path());

    let config = EngineConfig {
        workflow_home: dir.path().join("home"),
        ..EngineConfig::default()
    };
    let engine = Engine::new(config);
    let mut inputs = base_inputs("dry-run-change");
    inputs.explicit_lane = Some(Lane::Docs);
    inputs.flags.dry_run = true;

    let summary = engine.run(inputs).await.unwrap();
    let raw = std::fs::read_to_string(&summary.status_path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["dry_run"], serde_json::Value::Bool(true));
}
