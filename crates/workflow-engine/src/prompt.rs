//! Interactive prompts: the engine's two decision points where a human
//! operator may be asked to confirm a choice — resuming vs restarting an
//! incomplete run, and switching lanes when an explicit docs request is
//! contradicted by detected code files. Behind a trait so a run can inject a
//! scripted answer instead of reading stdin, the way the engine's handlers
//! are already pluggable collaborators.

use std::io::{BufRead, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeChoice {
    Resume,
    StartFresh,
}

pub trait EnginePrompt: Send + Sync {
    /// Only called when `flags.interactive` is true; a non-interactive run
    /// resumes by default without asking.
    fn resume_or_fresh(&self, change_id: &str, current_step: usize) -> ResumeChoice;

    /// Only called when `flags.interactive` is true; a non-interactive run
    /// aborts on mismatch without asking.
    fn confirm_lane_switch(&self, reason: &str, code_file_count: usize) -> bool;
}

/// Reads answers from stdin — the default for a real terminal invocation.
pub struct StdinPrompt;

impl StdinPrompt {
    fn ask(&self, question: &str) -> String {
        print!("{question}");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        let _ = std::io::stdin().lock().read_line(&mut line);
        line.trim().to_lowercase()
    }
}

impl EnginePrompt for StdinPrompt {
    fn resume_or_fresh(&self, change_id: &str, current_step: usize) -> ResumeChoice {
        let answer = self.ask(&format!(
            "change '{change_id}' has an incomplete run at step {current_step}; resume? [Y/n] "
        ));
        if answer == "n" || answer == "no" {
            ResumeChoice::StartFresh
        } else {
            ResumeChoice::Resume
        }
    }

    fn confirm_lane_switch(&self, reason: &str, code_file_count: usize) -> bool {
        let answer = self.ask(&format!(
            "{reason} ({code_file_count} code file(s)); switch lane? [y/N] "
        ));
        answer == "y" || answer == "yes"
    }
}

/// A prompt with pre-recorded answers, for tests and any non-terminal
/// invocation that still wants `interactive=true` semantics without a real
/// stdin.
pub struct ScriptedPrompt {
    pub resume: ResumeChoice,
    pub switch_lane: bool,
}

impl EnginePrompt for ScriptedPrompt {
    fn resume_or_fresh(&self, _change_id: &str, _current_step: usize) -> ResumeChoice {
        self.resume
    }

    fn confirm_lane_switch(&self, _reason: &str, _code_file_count: usize) -> bool {
        self.switch_lane
    }
}
