use super::{ApprovalStrategy, StrategyOutcome};

/// Approves every plan. For tests and throwaway runs only.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForcedApproval;

impl ForcedApproval {
    pub fn new() -> Self {
        Self
    }
}

impl ApprovalStrategy for ForcedApproval {
    fn name(&self) -> &'static str {
        "auto"
    }

    fn decide(&mut self, plan_ref: &str, _plan_text: &str) -> std::io::Result<StrategyOutcome> {
        tracing::warn!(plan = %plan_ref, "AUTO-APPROVE is active; do not use this in production");
        Ok(StrategyOutcome::Approve)
    }
}
