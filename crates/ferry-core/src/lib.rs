//! # ferry-core
//!
//! Deterministic building blocks of the ferry conversion pipeline.
//!
//! This crate owns everything that does not talk to a generation backend:
//! - What is the plan, and has a person signed off on it?
//! - Which steps are already settled for this run?
//! - May this step proceed, and where may it write?
//! - When generation is unavailable, is that fatal?
//!
//! ## Key Guarantees
//!
//! 1. **Idempotent**: completed and blocked steps are never redone on resume
//! 2. **Durable**: checkpoint and journal writes are synced before returning
//! 3. **Contained**: output paths are resolved physically and must stay under the output root
//! 4. **Gated**: only the approval gate can produce an [`ApprovedPlan`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use ferry_core::{ApprovalDecision, ApprovalGate, CheckpointStore, MarkerApproval, Plan};
//!
//! let plan = Plan::from_file("plans/orders.yaml")?;
//! let mut gate = ApprovalGate::new(MarkerApproval::new("plans/orders.approved"));
//! match gate.request_approval(plan, "plans/orders.yaml", &plan_text)? {
//!     ApprovalDecision::Approved(approved) => {
//!         let store = CheckpointStore::open("checkpoints", "conv-001", &approved.feature_name)?;
//!         println!("{}", store.summary());
//!     }
//!     ApprovalDecision::Pending(_) => println!("waiting for approval"),
//! }
//! ```

pub mod approval;
pub mod boundary;
pub mod checkpoint;
pub mod context;
pub mod env;
pub mod guardrail;
pub mod journal;
pub mod plan;
pub mod policy;
pub mod scaffold;
pub mod summary;

// Re-export main types at crate root
pub use approval::{
    ApprovalDecision, ApprovalError, ApprovalGate, ApprovalStrategy, ForcedApproval, GateState,
    InteractiveApproval, MarkerApproval, StrategyOutcome,
};
pub use boundary::{BoundaryError, BoundaryViolation, OutputBoundary};
pub use checkpoint::{CheckpointError, CheckpointStore, RunCheckpoint};
pub use context::{detect_context, ContextOverride, ExecutionContext, ProcessProbe, ProcfsProbe};
pub use env::EnvSnapshot;
pub use guardrail::{GuardrailOutcome, GuardrailVerdict, GuardrailWarning};
pub use journal::{ActionRecord, JournalAction, JournalEntry, JournalError, RunJournal};
pub use plan::{
    ApprovedPlan, ConversionStep, Enforcement, GuardrailRule, GuardrailSet, Plan, PlanError,
};
pub use policy::{BackendFailure, FailurePolicy};
pub use scaffold::{NoScaffold, ScaffoldProducer, SourceEchoScaffold};
pub use summary::{FlagKind, FlaggedStep, RunStatus, RunSummary};
