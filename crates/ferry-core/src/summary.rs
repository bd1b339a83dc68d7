//! Run summaries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    CompletedWithFlags,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithFlags => "completed_with_flags",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a step was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    Ambiguous,
    Boundary,
    /// Blocked by an earlier invocation and not yet resolved
    Unresolved,
}

/// A step that halted this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlaggedStep {
    pub step: String,
    pub reason: String,
    pub kind: FlagKind,
}

/// Outcome of one execution of a plan.
///
/// Contains no timestamps, so executing an already finished run twice
/// yields equal summaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub total: usize,
    pub completed: usize,
    pub flagged: usize,
    pub skipped: usize,
    pub completed_steps: Vec<String>,
    pub flagged_steps: Vec<FlaggedStep>,
    pub skipped_steps: Vec<String>,
}

impl RunSummary {
    pub fn new(run_id: impl Into<String>, total: usize) -> Self {
        Self {
            run_id: run_id.into(),
            status: RunStatus::Completed,
            total,
            completed: 0,
            flagged: 0,
            skipped: 0,
            completed_steps: Vec::new(),
            flagged_steps: Vec::new(),
            skipped_steps: Vec::new(),
        }
    }

    pub fn record_completed(&mut self, step_id: &str) {
        self.completed += 1;
        self.completed_steps.push(step_id.to_string());
    }

    pub fn record_flagged(&mut self, step_id: &str, reason: impl Into<String>, kind: FlagKind) {
        self.flagged += 1;
        self.flagged_steps.push(FlaggedStep {
            step: step_id.to_string(),
            reason: reason.into(),
            kind,
        });
        self.status = RunStatus::CompletedWithFlags;
    }

    pub fn record_skipped(&mut self, step_id: &str) {
        self.skipped += 1;
        self.skipped_steps.push(step_id.to_string());
    }

    pub fn has_flags(&self) -> bool {
        self.flagged > 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {}: {}", self.run_id, self.status)?;
        writeln!(
            f,
            "  total {}  completed {}  flagged {}  skipped {}",
            self.total, self.completed, self.flagged, self.skipped
        )?;
        for flagged in &self.flagged_steps {
            writeln!(f, "  [{:?}] {}: {}", flagged.kind, flagged.step, flagged.reason)?;
        }
        if self.has_flags() {
            writeln!(f, "  Resolve the flagged steps, then resume with --run-id {}", self.run_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_changes_status() {
        let mut s = RunSummary::new("r", 3);
        s.record_completed("A1");
        assert_eq!(s.status, RunStatus::Completed);
        s.record_flagged("B1", "needs review", FlagKind::Ambiguous);
        s.record_skipped("C1");
        assert_eq!(s.status, RunStatus::CompletedWithFlags);
        assert_eq!((s.completed, s.flagged, s.skipped), (1, 1, 1));

        let text = s.to_string();
        assert!(text.contains("completed_with_flags"));
        assert!(text.contains("--run-id r"));
    }

    #[test]
    fn test_serializes_snake_case() {
        let mut s = RunSummary::new("r", 1);
        s.record_flagged("B1", "x", FlagKind::Boundary);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["status"], "completed_with_flags");
        assert_eq!(json["flagged_steps"][0]["kind"], "boundary");
    }
}
