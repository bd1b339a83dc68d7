//! Approval gate between planning and execution.
//!
//! The gate is the only place an [`ApprovedPlan`] can be created. Strategies
//! decide; the gate owns the state machine:
//!
//! ```text
//! pending --approve--> approved
//! pending --reject---> rejected (terminal)
//! ```

mod forced;
mod interactive;
mod marker;

pub use forced::ForcedApproval;
pub use interactive::InteractiveApproval;
pub use marker::MarkerApproval;

use crate::plan::{ApprovedPlan, Plan};
use std::fmt;
use thiserror::Error;

/// Errors from the approval gate. Distinct from execution errors.
#[derive(Error, Debug)]
pub enum ApprovalError {
    #[error("Plan rejected by approver. Feedback: {}", .feedback.as_deref().unwrap_or("(none provided)"))]
    Rejected { feedback: Option<String> },

    #[error("Approval I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a strategy concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    Approve,
    Reject { feedback: Option<String> },
    /// No decision yet (e.g., the approval marker does not exist)
    Undecided,
}

/// A way of obtaining sign-off on a plan.
pub trait ApprovalStrategy {
    /// Short name recorded on the approved plan.
    fn name(&self) -> &'static str;

    /// Present the plan and collect a decision.
    fn decide(&mut self, plan_ref: &str, plan_text: &str) -> std::io::Result<StrategyOutcome>;
}

impl<S: ApprovalStrategy + ?Sized> ApprovalStrategy for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn decide(&mut self, plan_ref: &str, plan_text: &str) -> std::io::Result<StrategyOutcome> {
        (**self).decide(plan_ref, plan_text)
    }
}

/// Gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateState::Pending => write!(f, "pending"),
            GateState::Approved => write!(f, "approved"),
            GateState::Rejected => write!(f, "rejected"),
        }
    }
}

/// Result of a non-failing approval request.
#[derive(Debug)]
pub enum ApprovalDecision {
    /// The plan may be executed
    Approved(ApprovedPlan),

    /// No decision yet; the plan is handed back unchanged
    Pending(Plan),
}

/// The barrier a plan must pass before execution.
pub struct ApprovalGate<S: ApprovalStrategy> {
    strategy: S,
    state: GateState,
}

impl<S: ApprovalStrategy> ApprovalGate<S> {
    pub fn new(strategy: S) -> Self {
        Self {
            strategy,
            state: GateState::Pending,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Consume the gate, returning its strategy.
    pub fn into_strategy(self) -> S {
        self.strategy
    }

    /// Ask the strategy for a decision on `plan`.
    ///
    /// A rejected gate stays rejected: later requests fail without asking again.
    pub fn request_approval(
        &mut self,
        plan: Plan,
        plan_ref: &str,
        plan_text: &str,
    ) -> Result<ApprovalDecision, ApprovalError> {
        if self.state == GateState::Rejected {
            return Err(ApprovalError::Rejected { feedback: None });
        }

        tracing::info!(plan = %plan_ref, strategy = self.strategy.name(), "Approval gate triggered");

        match self.strategy.decide(plan_ref, plan_text)? {
            StrategyOutcome::Approve => {
                self.state = GateState::Approved;
                tracing::info!(plan = %plan_ref, "Plan approved");
                Ok(ApprovalDecision::Approved(ApprovedPlan::new(
                    plan,
                    self.strategy.name(),
                )))
            }
            StrategyOutcome::Reject { feedback } => {
                self.state = GateState::Rejected;
                tracing::warn!(plan = %plan_ref, feedback = ?feedback, "Plan rejected");
                Err(ApprovalError::Rejected { feedback })
            }
            StrategyOutcome::Undecided => {
                tracing::info!(plan = %plan_ref, "Plan is pending approval");
                Ok(ApprovalDecision::Pending(plan))
            }
        }
    }
}

impl<S: ApprovalStrategy> fmt::Debug for ApprovalGate<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApprovalGate")
            .field("strategy", &self.strategy.name())
            .field("state", &self.state)
            .finish()
    }
}
