use super::{ApprovalStrategy, StrategyOutcome};
use std::path::{Path, PathBuf};

/// Approves when an externally created marker file exists (e.g., after a PR merge).
#[derive(Debug, Clone)]
pub struct MarkerApproval {
    marker: PathBuf,
}

impl MarkerApproval {
    pub fn new(marker: impl Into<PathBuf>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn marker(&self) -> &Path {
        &self.marker
    }
}

impl ApprovalStrategy for MarkerApproval {
    fn name(&self) -> &'static str {
        "marker"
    }

    fn decide(&mut self, _plan_ref: &str, _plan_text: &str) -> std::io::Result<StrategyOutcome> {
        if self.marker.exists() {
            tracing::info!(marker = %self.marker.display(), "Approval marker found");
            Ok(StrategyOutcome::Approve)
        } else {
            tracing::info!(marker = %self.marker.display(), "Approval marker not found");
            Ok(StrategyOutcome::Undecided)
        }
    }
}
