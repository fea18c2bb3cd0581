//! Quality Gates — drives ruff/mypy/pytest/bandit, normalizes their output,
//! and evaluates the result against a lane's threshold table.

use crate::model::{AggregateResult, LaneProfile, QualityMetrics, ToolSummaries};
use crate::verifier::report::{parse_bandit, parse_mypy, parse_pytest, parse_ruff, GateOutcome, GateResult};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct QualityGates {
    working_dir: PathBuf,
    tool_timeout: Duration,
    cache: Mutex<HashMap<String, GateResult>>,
}

impl QualityGates {
    pub fn new(working_dir: impl AsRef<Path>, tool_timeout: Duration) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            tool_timeout,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Run every tool the lane profile requires and evaluate thresholds.
    ///
    /// Docs lanes never call this — the engine bypasses the stage entirely.
    /// `skip_quality_gates=true` on a non-docs lane records an operator-skip
    /// result without invoking any tool.
    pub async fn run(&self, profile: &LaneProfile, skip: bool) -> QualityMetrics {
        if !profile.quality_gates_enabled {
            return QualityMetrics {
                lane: profile.lane,
                gates_enabled: false,
                tools: ToolSummaries::default(),
                aggregate_result: AggregateResult::Skipped,
                reasons: vec![],
            };
        }

        if skip {
            return QualityMetrics {
                lane: profile.lane,
                gates_enabled: true,
                tools: ToolSummaries::default(),
                aggregate_result: AggregateResult::Skipped,
                reasons: vec!["operator_skip".to_string()],
            };
        }

        let ruff = self.run_tool("ruff", &["check", "."]).await;
        let mypy = self.run_tool("mypy", &["."]).await;
        let pytest = self.run_tool("pytest", &["--cov", "-q"]).await;
        let bandit = self.run_tool("bandit", &["-r", "."]).await;

        let tool_error = ruff.tool_error || mypy.tool_error || pytest.tool_error || bandit.tool_error;

        let tools = ToolSummaries {
            ruff: Some(parse_ruff(ruff.stderr_excerpt.as_deref().unwrap_or(""))),
            mypy: Some(parse_mypy(mypy.stderr_excerpt.as_deref().unwrap_or(""))),
            pytest: Some(parse_pytest(pytest.stderr_excerpt.as_deref().unwrap_or(""))),
            bandit: Some(parse_bandit(bandit.stderr_excerpt.as_deref().unwrap_or(""))),
        };

        let mut reasons = Vec::new();
        if tool_error {
            reasons.push("tool_error: one or more quality tools failed to execute".to_string());
        }

        for threshold in &profile.thresholds {
            let observed = match threshold.metric.as_str() {
                "ruff_errors" => tools.ruff.as_ref().map(|s| s.errors as f64),
                "mypy_errors" => tools.mypy.as_ref().map(|s| s.errors as f64),
                "pytest_pass_rate" => tools.pytest.as_ref().map(|s| s.pass_rate),
                "pytest_coverage_percent" => tools.pytest.as_ref().map(|s| s.coverage_percent),
                "bandit_high" => tools.bandit.as_ref().map(|s| s.high as f64),
                _ => None,
            };
            if let Some(observed) = observed {
                if !threshold.evaluate(observed) {
                    reasons.push(format!(
                        "{} {} failed threshold {:?} {}",
                        threshold.metric, observed, threshold.op, threshold.value
                    ));
                }
            }
        }

        let aggregate_result = if tool_error || !reasons.is_empty() {
            AggregateResult::Fail
        } else {
            AggregateResult::Pass
        };

        QualityMetrics {
            lane: profile.lane,
            gates_enabled: true,
            tools,
            aggregate_result,
            reasons,
        }
    }

    /// Run a tool under the configured timeout, memoized on content hash of
    /// the working directory's tracked files. A tool that fails to execute
    /// at all is reported with `tool_error=true` (fail-closed).
    async fn run_tool(&self, name: &str, args: &[&str]) -> GateResult {
        let cache_key = format!("{name}:{}", self.content_hash());
        if let Some(cached) = self.cache.lock().unwrap().get(&cache_key).cloned() {
            return cached;
        }

        let start = Instant::now();
        let mut cmd = tokio::process::Command::new(name);
        cmd.args(args).current_dir(&self.working_dir).kill_on_drop(true);

        let result = match tokio::time::timeout(self.tool_timeout, cmd.output()).await {
            Ok(Ok(output)) => {
                let combined = format!(
                    "{}{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                );
                GateResult {
                    tool: name.to_string(),
                    outcome: if output.status.success() {
                        GateOutcome::Passed
                    } else {
                        GateOutcome::Failed
                    },
                    duration_ms: start.elapsed().as_millis() as u64,
                    exit_code: output.status.code(),
                    tool_error: false,
                    stderr_excerpt: Some(combined),
                }
            }
            Ok(Err(e)) => GateResult {
                tool: name.to_string(),
                outcome: GateOutcome::ToolError,
                duration_ms: start.elapsed().as_millis() as u64,
                exit_code: None,
                tool_error: true,
                stderr_excerpt: Some(format!("failed to execute {name}: {e}")),
            },
            Err(_) => GateResult {
                tool: name.to_string(),
                outcome: GateOutcome::ToolError,
                duration_ms: start.elapsed().as_millis() as u64,
                exit_code: None,
                tool_error: true,
                stderr_excerpt: Some(format!("{name} timed out after {:?}", self.tool_timeout)),
            },
        };

        self.cache.lock().unwrap().insert(cache_key, result.clone());
        result
    }

    /// Cheap content-hash cache key: hashes file names + sizes under the
    /// working directory's top level. Correctness never depends on the
    /// cache; it is purely an invalidate-by-hash-change memoization layer.
    fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        if let Ok(entries) = std::fs::read_dir(&self.working_dir) {
            let mut names: Vec<_> = entries.flatten().map(|e| e.path()).collect();
            names.sort();
            for path in names {
                if let Ok(meta) = std::fs::metadata(&path) {
                    hasher.update(path.to_string_lossy().as_bytes());
                    hasher.update(meta.len().to_le_bytes());
                }
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn docs_lane_skips_without_running_tools() {
        let gates = QualityGates::new("/tmp", Duration::from_millis(100));
        let metrics = gates.run(&LaneProfile::docs(), false).await;
        assert_eq!(metrics.aggregate_result, AggregateResult::Skipped);
        assert!(!metrics.gates_enabled);
    }

    #[tokio::test]
    async fn operator_skip_records_reason_without_failing() {
        let gates = QualityGates::new("/tmp", Duration::from_millis(100));
        let metrics = gates.run(&LaneProfile::standard(), true).await;
        assert_eq!(metrics.aggregate_result, AggregateResult::Skipped);
        assert_eq!(metrics.reasons, vec!["operator_skip".to_string()]);
    }

    #[tokio::test]
    async fn missing_tool_binary_is_fail_closed() {
        // In a bare test sandbox ruff/mypy/pytest/bandit are unlikely to be on PATH;
        // either way, a tool_error must drive aggregate_result to Fail, never Pass.
        let gates = QualityGates::new("/tmp", Duration::from_millis(500));
        let metrics = gates.run(&LaneProfile::standard(), false).await;
        if metrics.reasons.iter().any(|r| r.starts_with("tool_error")) {
            assert_eq!(metrics.aggregate_result, AggregateResult::Fail);
        }
    }
}
