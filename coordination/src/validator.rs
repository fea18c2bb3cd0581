//! Environment Validator: pre-flight checks run once before any stage.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckSeverity {
    Fatal,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub severity: CheckSeverity,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub checks: Vec<CheckResult>,
}

impl ValidationReport {
    pub fn has_fatal_failure(&self) -> bool {
        self.checks
            .iter()
            .any(|c| !c.passed && c.severity == CheckSeverity::Fatal)
    }

    pub fn fatal_summary(&self) -> String {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.severity == CheckSeverity::Fatal)
            .map(|c| c.detail.clone())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

pub struct EnvironmentValidator<'a> {
    required_tools: &'a [&'a str],
}

impl<'a> EnvironmentValidator<'a> {
    pub fn new(required_tools: &'a [&'a str]) -> Self {
        Self { required_tools }
    }

    /// Run the enumerated pre-flight checks: runtime version is implicit
    /// (this binary wouldn't run otherwise), tool presence, VCS availability,
    /// writable change directory, non-empty owner, recognized platform.
    pub fn validate(
        &self,
        change_dir: &Path,
        owner: &str,
        quality_gates_enabled: bool,
    ) -> ValidationReport {
        let mut checks = Vec::new();

        if quality_gates_enabled {
            for tool in self.required_tools {
                let found = which(tool);
                checks.push(CheckResult {
                    name: format!("tool:{tool}"),
                    passed: found,
                    severity: CheckSeverity::Fatal,
                    detail: if found {
                        format!("{tool} found on PATH")
                    } else {
                        format!("{tool} not found on PATH")
                    },
                });
            }
        }

        let vcs_found = which("git");
        checks.push(CheckResult {
            name: "vcs".to_string(),
            passed: vcs_found,
            severity: CheckSeverity::Fatal,
            detail: if vcs_found {
                "git available".to_string()
            } else {
                "git not found on PATH".to_string()
            },
        });

        let writable = is_writable(change_dir);
        checks.push(CheckResult {
            name: "writable_change_dir".to_string(),
            passed: writable,
            severity: CheckSeverity::Fatal,
            detail: if writable {
                format!("{} is writable", change_dir.display())
            } else {
                format!("{} is not writable", change_dir.display())
            },
        });

        let owner_present = !owner.trim().is_empty();
        checks.push(CheckResult {
            name: "owner_identity".to_string(),
            passed: owner_present,
            severity: CheckSeverity::Fatal,
            detail: if owner_present {
                "owner identity set".to_string()
            } else {
                "owner identity is empty".to_string()
            },
        });

        let platform_known = matches!(std::env::consts::OS, "linux" | "macos" | "windows");
        checks.push(CheckResult {
            name: "platform".to_string(),
            passed: platform_known,
            severity: CheckSeverity::Warning,
            detail: format!("running on {}", std::env::consts::OS),
        });

        ValidationReport { checks }
    }
}

fn which(binary: &str) -> bool {
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| dir.join(binary).is_file())
}

fn is_writable(dir: &Path) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }
    let probe = dir.join(".write_probe");
    let ok = std::fs::write(&probe, b"").is_ok();
    let _ = std::fs::remove_file(&probe);
    ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_owner_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let report = EnvironmentValidator::new(&[]).validate(dir.path(), "", false);
        assert!(report.has_fatal_failure());
    }

    #[test]
    fn writable_dir_and_owner_pass_without_quality_gates() {
        let dir = tempfile::tempdir().unwrap();
        let report = EnvironmentValidator::new(&[]).validate(dir.path(), "alice", false);
        assert!(!report.has_fatal_failure());
    }

    #[test]
    fn missing_required_tool_is_fatal_when_gates_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let report = EnvironmentValidator::new(&["definitely-not-a-real-binary-xyz"])
            .validate(dir.path(), "alice", true);
        assert!(report.has_fatal_failure());
    }
}
