//! Normalized results produced by a single quality-gate tool invocation.

use crate::model::{BanditSummary, MypySummary, PytestSummary, RuffSummary};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateOutcome {
    Passed,
    Failed,
    ToolError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub tool: String,
    pub outcome: GateOutcome,
    pub duration_ms: u64,
    pub exit_code: Option<i32>,
    pub tool_error: bool,
    pub stderr_excerpt: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedSummaries {
    pub ruff: Option<RuffSummary>,
    pub mypy: Option<MypySummary>,
    pub pytest: Option<PytestSummary>,
    pub bandit: Option<BanditSummary>,
}

/// Parse a `ruff check --statistics`-style line count from stdout.
pub fn parse_ruff(stdout: &str) -> RuffSummary {
    let errors = stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter(|l| l.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .count() as u32;
    RuffSummary { errors }
}

/// Parse `mypy`'s final "Found N errors" summary line.
pub fn parse_mypy(stdout: &str) -> MypySummary {
    for line in stdout.lines() {
        if let Some(rest) = line.strip_prefix("Found ") {
            if let Some(n) = rest.split_whitespace().next().and_then(|s| s.parse().ok()) {
                return MypySummary { errors: n };
            }
        }
    }
    MypySummary { errors: 0 }
}

/// Parse pytest's terminal summary line plus a `--cov` percentage if present.
/// `pass_rate = passed / (passed + failed)`, ignoring skipped tests.
pub fn parse_pytest(stdout: &str) -> PytestSummary {
    let mut passed = 0u32;
    let mut failed = 0u32;
    let mut coverage_percent = 0.0;

    for line in stdout.lines() {
        if line.contains("passed") || line.contains("failed") {
            for token in line.split(',') {
                let token = token.trim();
                let words: Vec<&str> = token.split_whitespace().collect();
                if words.len() >= 2 {
                    if let Ok(n) = words[0].parse::<u32>() {
                        if words[1].starts_with("passed") {
                            passed = n;
                        } else if words[1].starts_with("failed") {
                            failed = n;
                        }
                    }
                }
            }
        }
        if line.trim_start().starts_with("TOTAL") {
            if let Some(pct) = line
                .split_whitespace()
                .last()
                .and_then(|s| s.trim_end_matches('%').parse::<f64>().ok())
            {
                coverage_percent = pct;
            }
        }
    }

    let total = passed + failed;
    let pass_rate = if total == 0 {
        1.0
    } else {
        passed as f64 / total as f64
    };

    PytestSummary {
        pass_rate,
        coverage_percent,
        total,
        passed,
        failed,
    }
}

/// Parse bandit's `>> Issue: [kind: SEVERITY]` lines into severity buckets.
pub fn parse_bandit(stdout: &str) -> BanditSummary {
    let mut summary = BanditSummary::default();
    for line in stdout.lines() {
        let lower = line.to_lowercase();
        if !lower.contains("severity:") {
            continue;
        }
        if lower.contains("high") {
            summary.high += 1;
        } else if lower.contains("medium") {
            summary.medium += 1;
        } else if lower.contains("low") {
            summary.low += 1;
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mypy_found_errors_parsed() {
        let out = "src/a.py:3: error: bad\nFound 2 errors in 1 file (checked 4 source files)";
        assert_eq!(parse_mypy(out).errors, 2);
    }

    #[test]
    fn mypy_no_errors_defaults_zero() {
        assert_eq!(parse_mypy("Success: no issues found").errors, 0);
    }

    #[test]
    fn pytest_pass_rate_ignores_skipped() {
        let out = "8 passed, 2 failed, 3 skipped in 1.2s";
        let summary = parse_pytest(out);
        assert_eq!(summary.passed, 8);
        assert_eq!(summary.failed, 2);
        assert!((summary.pass_rate - 0.8).abs() < 1e-9);
    }

    #[test]
    fn pytest_all_passed_rate_is_one() {
        let summary = parse_pytest("10 passed in 0.5s");
        assert!((summary.pass_rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn bandit_buckets_by_severity() {
        let out = "\
>> Issue: [B602:subprocess_popen_with_shell_equals_true] Severity: High   Confidence: High
>> Issue: [B101:assert_used] Severity: Low   Confidence: High
>> Issue: [B104:hardcoded_bind_all] Severity: Medium   Confidence: Medium";
        let summary = parse_bandit(out);
        assert_eq!(summary.high, 1);
        assert_eq!(summary.medium, 1);
        assert_eq!(summary.low, 1);
    }
}
