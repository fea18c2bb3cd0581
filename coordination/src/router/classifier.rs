//! Lane classification: derive facts from a file list, fold them into a
//! lane proposal with early-exit rules, attach a rationale string built from
//! the facts that fired.

use crate::model::Lane;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Doc,
    Code,
}

/// Extensions unambiguously understood as source/script files; these win
/// over a `docs/` directory prefix (e.g. a shell script checked into docs/
/// is still code).
const CODE_EXTENSIONS: &[&str] = &[
    "sh", "py", "rs", "js", "ts", "go", "rb", "c", "cpp", "h", "hpp", "java", "toml", "yaml",
    "yml", "json",
];

fn classify_path(path: &str) -> FileKind {
    let extension = path.rsplit('.').next().filter(|ext| *ext != path);

    match extension {
        Some("md") | Some("rst") | Some("txt") => FileKind::Doc,
        Some(ext) if CODE_EXTENSIONS.contains(&ext) => FileKind::Code,
        _ if path.starts_with("docs/") || path.contains("/docs/") => FileKind::Doc,
        _ => FileKind::Code,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationInputs {
    pub explicit_lane: Option<Lane>,
    pub change_id: String,
    pub working_tree_files: Vec<String>,
    #[serde(default)]
    pub breaking_change: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub lane: Lane,
    pub reason: String,
    pub detected_code_files: Vec<String>,
    pub lane_mismatch: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum LaneRouterError {
    #[error("lane mismatch: requested docs lane but code files present: {0:?}")]
    LaneMismatch(Vec<String>),
    #[error("could not read working tree file list: {0}")]
    ClassificationError(String),
}

pub struct LaneRouter;

impl LaneRouter {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the execution lane for a change. See the lane router contract:
    /// explicit lane wins unless contradicted by detection, doc-only files
    /// propose docs, any code file proposes standard (or heavy when
    /// requested/breaking), and docs-with-code-present is flagged a mismatch.
    pub fn classify(
        &self,
        inputs: &ClassificationInputs,
        allow_mismatch: bool,
    ) -> Result<ClassificationResult, LaneRouterError> {
        let detected_code_files: Vec<String> = inputs
            .working_tree_files
            .iter()
            .filter(|p| classify_path(p) == FileKind::Code)
            .cloned()
            .collect();

        let has_code = !detected_code_files.is_empty();

        let proposed = if has_code {
            if inputs.breaking_change {
                Lane::Heavy
            } else {
                Lane::Standard
            }
        } else {
            Lane::Docs
        };

        if let Some(explicit) = inputs.explicit_lane {
            let contradicted = explicit == Lane::Docs && has_code;
            if !contradicted {
                let mut reason = format!("explicit_lane={explicit}");
                if has_code {
                    reason.push_str(&format!(", code_files={}", detected_code_files.len()));
                }
                return Ok(ClassificationResult {
                    lane: explicit,
                    reason,
                    detected_code_files,
                    lane_mismatch: false,
                });
            }
            if !allow_mismatch {
                return Err(LaneRouterError::LaneMismatch(detected_code_files));
            }
            return Ok(ClassificationResult {
                lane: proposed,
                reason: format!(
                    "explicit_lane=docs contradicted by {} code file(s); switched to {proposed}",
                    detected_code_files.len()
                ),
                detected_code_files,
                lane_mismatch: true,
            });
        }

        let reason = if has_code {
            format!(
                "{} code file(s) detected -> {proposed}{}",
                detected_code_files.len(),
                if inputs.breaking_change {
                    ", breaking_change=true"
                } else {
                    ""
                }
            )
        } else {
            "only doc files detected -> docs".to_string()
        };

        Ok(ClassificationResult {
            lane: proposed,
            reason,
            detected_code_files,
            lane_mismatch: false,
        })
    }
}

impl Default for LaneRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(files: &[&str]) -> ClassificationInputs {
        ClassificationInputs {
            explicit_lane: None,
            change_id: "add-x".into(),
            working_tree_files: files.iter().map(|s| s.to_string()).collect(),
            breaking_change: false,
        }
    }

    #[test]
    fn doc_only_files_propose_docs() {
        let result = LaneRouter::new()
            .classify(&inputs(&["docs/guide.md", "README.rst"]), false)
            .unwrap();
        assert_eq!(result.lane, Lane::Docs);
        assert!(result.detected_code_files.is_empty());
    }

    #[test]
    fn any_code_file_proposes_standard() {
        let result = LaneRouter::new()
            .classify(&inputs(&["docs/guide.md", "src/lib.rs"]), false)
            .unwrap();
        assert_eq!(result.lane, Lane::Standard);
        assert_eq!(result.detected_code_files, vec!["src/lib.rs".to_string()]);
    }

    #[test]
    fn breaking_change_with_code_proposes_heavy() {
        let mut i = inputs(&["src/lib.rs"]);
        i.breaking_change = true;
        let result = LaneRouter::new().classify(&i, false).unwrap();
        assert_eq!(result.lane, Lane::Heavy);
    }

    #[test]
    fn explicit_lane_wins_when_uncontradicted() {
        let mut i = inputs(&["src/lib.rs"]);
        i.explicit_lane = Some(Lane::Heavy);
        let result = LaneRouter::new().classify(&i, false).unwrap();
        assert_eq!(result.lane, Lane::Heavy);
        assert!(!result.lane_mismatch);
    }

    #[test]
    fn explicit_docs_contradicted_by_code_errors_when_mismatch_disallowed() {
        let mut i = inputs(&["src/lib.rs"]);
        i.explicit_lane = Some(Lane::Docs);
        let err = LaneRouter::new().classify(&i, false).unwrap_err();
        assert!(matches!(err, LaneRouterError::LaneMismatch(_)));
    }

    #[test]
    fn explicit_docs_contradicted_by_code_switches_when_mismatch_allowed() {
        let mut i = inputs(&["src/lib.rs"]);
        i.explicit_lane = Some(Lane::Docs);
        let result = LaneRouter::new().classify(&i, true).unwrap();
        assert_eq!(result.lane, Lane::Standard);
        assert!(result.lane_mismatch);
    }

    #[test]
    fn ambiguous_script_under_docs_defaults_to_code() {
        let result = LaneRouter::new()
            .classify(&inputs(&["docs/setup.sh"]), false)
            .unwrap();
        assert_eq!(result.lane, Lane::Standard);
        assert_eq!(result.detected_code_files, vec!["docs/setup.sh".to_string()]);
    }

    #[test]
    fn unknown_extension_defaults_to_code() {
        let result = LaneRouter::new()
            .classify(&inputs(&["Makefile"]), false)
            .unwrap();
        assert_eq!(result.lane, Lane::Standard);
        assert_eq!(result.detected_code_files, vec!["Makefile".to_string()]);
    }
}
