//! The resumable step executor.
//!
//! Steps run strictly in plan order, one at a time. Each step ends in exactly
//! one terminal state (completed, blocked-ambiguous or blocked-boundary) and
//! that state is flushed to the checkpoint before the next step starts. A
//! blocked step never stops the run; only a fatal configuration error does.
//!
//! # Per-step flow
//! 1. Skip steps the checkpoint already settled
//! 2. Read the source and evaluate guardrails
//! 3. Generate through the router, or escalate a backend failure
//! 4. Resolve the target under the output boundary
//! 5. Write, mark completed, journal

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use ferry_core::guardrail;
use ferry_core::policy::{self, BackendFailure, FailurePolicy};
use ferry_core::{
    ApprovedPlan, BoundaryError, CheckpointError, CheckpointStore, ConversionStep,
    ExecutionContext, FlagKind, GuardrailRule, GuardrailSet, GuardrailVerdict, JournalAction,
    JournalEntry, JournalError, OutputBoundary, RunJournal, RunSummary, ScaffoldProducer,
    SourceEchoScaffold,
};

use crate::prompts;
use crate::providers::ChatMessage;
use crate::router::{ProviderRouter, RouterError};

/// Errors that abort a run.
#[derive(Error, Debug)]
pub enum EngineError {
    /// No usable backend and the context does not allow degraded output
    #[error("Fatal configuration error: {0}")]
    FatalConfiguration(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("Output boundary error: {0}")]
    Boundary(#[from] BoundaryError),
}

/// How a step ended.
enum StepOutcome {
    Written {
        transformation: String,
        deviation: Option<String>,
    },
    Halted {
        reason: String,
        kind: FlagKind,
    },
}

impl StepOutcome {
    fn ambiguous(reason: impl Into<String>) -> Self {
        StepOutcome::Halted {
            reason: reason.into(),
            kind: FlagKind::Ambiguous,
        }
    }

    fn boundary(reason: impl Into<String>) -> Self {
        StepOutcome::Halted {
            reason: reason.into(),
            kind: FlagKind::Boundary,
        }
    }
}

/// Text to write for a step, or why there is none.
enum Generated {
    Text {
        text: String,
        transformation: String,
    },
    Halt(String),
}

/// Executes approved plans step by step.
pub struct ConversionEngine {
    guardrails: GuardrailSet,
    context: ExecutionContext,
    dry_run: bool,
    llm_disabled: bool,
    scaffold: Arc<dyn ScaffoldProducer>,
}

impl std::fmt::Debug for ConversionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionEngine")
            .field("rules", &self.guardrails.len())
            .field("context", &self.context)
            .field("dry_run", &self.dry_run)
            .field("llm_disabled", &self.llm_disabled)
            .field("scaffold", &self.scaffold.name())
            .finish()
    }
}

impl ConversionEngine {
    pub fn builder() -> ConversionEngineBuilder {
        ConversionEngineBuilder::new()
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Execute every unsettled step of `plan`.
    ///
    /// `router` may be `None` when no backend was built; that is treated as
    /// "not configured" and escalated like any other backend failure. The
    /// journal is finalized with the run status, or `aborted` on error.
    pub async fn execute(
        &self,
        plan: &ApprovedPlan,
        checkpoint: &mut CheckpointStore,
        router: Option<&ProviderRouter>,
        journal: &mut RunJournal,
    ) -> Result<RunSummary, EngineError> {
        match self.run_steps(plan, checkpoint, router, journal).await {
            Ok(summary) => {
                journal.finalize(summary.status.as_str())?;
                tracing::info!(
                    run_id = %summary.run_id,
                    status = %summary.status,
                    completed = summary.completed,
                    flagged = summary.flagged,
                    skipped = summary.skipped,
                    "Run finished"
                );
                Ok(summary)
            }
            Err(e) => {
                tracing::error!(run_id = %checkpoint.run_id(), error = %e, "Run aborted");
                if let Err(journal_err) = journal.finalize("aborted") {
                    tracing::warn!(error = %journal_err, "Could not record aborted run");
                }
                Err(e)
            }
        }
    }

    async fn run_steps(
        &self,
        plan: &ApprovedPlan,
        checkpoint: &mut CheckpointStore,
        router: Option<&ProviderRouter>,
        journal: &mut RunJournal,
    ) -> Result<RunSummary, EngineError> {
        let step_ids = plan.step_ids();
        checkpoint.register_steps(&step_ids)?;

        let boundary = if self.dry_run {
            OutputBoundary::new(&plan.output_root)?
        } else {
            OutputBoundary::create(&plan.output_root)?
        };

        tracing::info!(
            run_id = %checkpoint.run_id(),
            feature = %plan.feature_name,
            steps = step_ids.len(),
            approved_via = plan.approved_via(),
            dry_run = self.dry_run,
            context = %self.context,
            "Starting conversion run"
        );

        let mut summary = RunSummary::new(checkpoint.run_id(), step_ids.len());

        for step in &plan.conversion_steps {
            if checkpoint.is_settled(&step.id) {
                let note = if checkpoint.is_completed(&step.id) {
                    summary.record_skipped(&step.id);
                    "already completed".to_string()
                } else {
                    let reason = checkpoint
                        .block_reason(&step.id)
                        .unwrap_or("blocked")
                        .to_string();
                    summary.record_flagged(&step.id, reason.clone(), FlagKind::Unresolved);
                    format!("still blocked: {}", reason)
                };
                tracing::debug!(step_id = %step.id, note = %note, "Skipping settled step");
                journal.record(
                    JournalAction::Skipped,
                    JournalEntry::for_step(&step.id).transformation(note),
                )?;
                continue;
            }

            let outcome = self.run_step(plan, step, &boundary, router, journal).await?;

            match outcome {
                StepOutcome::Written {
                    transformation,
                    deviation,
                } => {
                    checkpoint.mark_completed(&step.id, &step_ids)?;

                    let mut entry = JournalEntry::for_step(&step.id)
                        .source(&step.source)
                        .target(&step.target)
                        .rules(&step.rules)
                        .transformation(transformation)
                        .rationale(&step.rationale);
                    if let Some(deviation) = deviation {
                        entry = entry.deviation(deviation);
                    }
                    journal.record(JournalAction::WroteFile, entry)?;
                    journal.record(
                        JournalAction::StepCompleted,
                        JournalEntry::for_step(&step.id).target(&step.target),
                    )?;

                    tracing::info!(step_id = %step.id, target = %step.target, "Step completed");
                    summary.record_completed(&step.id);
                }
                StepOutcome::Halted { reason, kind } => {
                    let action = match kind {
                        FlagKind::Boundary => JournalAction::RejectedOutOfBoundary,
                        _ => JournalAction::HaltedAmbiguous,
                    };
                    journal.record(
                        action,
                        JournalEntry::for_step(&step.id)
                            .source(&step.source)
                            .target(&step.target)
                            .rules(&step.rules)
                            .transformation(reason.clone())
                            .deviation(format!(
                                "Step {} incomplete; resolve and resume the run",
                                step.id
                            )),
                    )?;
                    checkpoint.mark_blocked(&step.id, &reason)?;

                    match kind {
                        FlagKind::Boundary => {
                            tracing::error!(step_id = %step.id, reason = %reason, "Out of boundary")
                        }
                        _ => tracing::warn!(step_id = %step.id, reason = %reason, "Ambiguous; step halted"),
                    }
                    summary.record_flagged(&step.id, reason, kind);
                }
            }
        }

        Ok(summary)
    }

    async fn run_step(
        &self,
        plan: &ApprovedPlan,
        step: &ConversionStep,
        boundary: &OutputBoundary,
        router: Option<&ProviderRouter>,
        journal: &mut RunJournal,
    ) -> Result<StepOutcome, EngineError> {
        journal.record(
            JournalAction::StepStarted,
            JournalEntry::for_step(&step.id)
                .source(&step.source)
                .target(&step.target)
                .rationale(&step.rationale),
        )?;

        let source_path = plan.feature_root.join(&step.source);
        let source_text = match tokio::fs::read_to_string(&source_path).await {
            Ok(text) => text,
            Err(e) => {
                return Ok(StepOutcome::ambiguous(format!(
                    "cannot read source {}: {}",
                    source_path.display(),
                    e
                )))
            }
        };
        journal.record(
            JournalAction::ReadFile,
            JournalEntry::for_step(&step.id).source(&step.source),
        )?;

        let verdict = guardrail::evaluate(step, &source_text, &self.guardrails);
        match verdict.verdict {
            GuardrailVerdict::Pass => {}
            GuardrailVerdict::Ambiguous(reason) => return Ok(StepOutcome::ambiguous(reason)),
            GuardrailVerdict::OutOfBoundary(reason) => return Ok(StepOutcome::boundary(reason)),
        }

        let rules = self.guardrails.applicable(step);
        let scaffold = self.scaffold.scaffold(step, &source_text, &rules);

        let (text, transformation) = match self
            .generate(plan, step, &source_text, &rules, scaffold.as_deref(), router, journal)
            .await?
        {
            Generated::Text {
                text,
                transformation,
            } => (text, transformation),
            Generated::Halt(reason) => return Ok(StepOutcome::ambiguous(reason)),
        };

        let resolved = match boundary.resolve(&step.target) {
            Ok(path) => path,
            Err(violation) => return Ok(StepOutcome::boundary(violation.to_string())),
        };

        let mut deviations: Vec<String> = verdict
            .warnings
            .iter()
            .map(|w| format!("warning {}: {}", w.rule_id, w.detail))
            .collect();

        if self.dry_run {
            tracing::info!(step_id = %step.id, target = %resolved.display(), bytes = text.len(), "Dry run; write skipped");
            deviations.push("dry run: write skipped".to_string());
        } else if let Err(e) = write_output(&resolved, &text).await {
            return Ok(StepOutcome::ambiguous(format!(
                "failed to write {}: {}",
                resolved.display(),
                e
            )));
        }

        Ok(StepOutcome::Written {
            transformation,
            deviation: (!deviations.is_empty()).then(|| deviations.join("; ")),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn generate(
        &self,
        plan: &ApprovedPlan,
        step: &ConversionStep,
        source_text: &str,
        rules: &[&GuardrailRule],
        scaffold: Option<&str>,
        router: Option<&ProviderRouter>,
        journal: &mut RunJournal,
    ) -> Result<Generated, EngineError> {
        if self.llm_disabled {
            return self.use_scaffold(step, scaffold, BackendFailure::Disabled, journal);
        }

        let Some(router) = router else {
            return self.escalate(step, scaffold, BackendFailure::NotConfigured, "no provider router", journal);
        };

        let system = prompts::system_prompt(rules, plan.target_stack.as_deref());
        let message = prompts::user_message(step, source_text, scaffold);

        match router.complete(&system, &[ChatMessage::user(message)]).await {
            Ok(result) => {
                tracing::info!(
                    step_id = %step.id,
                    backend = %result.backend,
                    model = %result.model,
                    prompt_tokens = result.usage.prompt_tokens,
                    completion_tokens = result.usage.completion_tokens,
                    fallback = result.served_by_fallback,
                    "Code generated"
                );

                if let Some(reason) = prompts::ambiguity_reason(&result.text) {
                    return Ok(Generated::Halt(format!("model reported ambiguity: {}", reason)));
                }

                let text = prompts::strip_code_fence(&result.text);
                if text.is_empty() {
                    return Ok(Generated::Halt(format!(
                        "{} returned empty output",
                        result.backend
                    )));
                }

                let mut transformation = format!("generated by {}", result.backend);
                if result.served_by_fallback {
                    transformation.push_str(" (fallback)");
                }
                Ok(Generated::Text {
                    text: format!("{}\n", text),
                    transformation,
                })
            }
            Err(e @ RouterError::NotConfigured) => {
                self.escalate(step, scaffold, BackendFailure::NotConfigured, &e.to_string(), journal)
            }
            Err(e @ RouterError::CallFailed { .. }) => {
                self.escalate(step, scaffold, BackendFailure::CallFailed, &e.to_string(), journal)
            }
        }
    }

    /// Ask the failure policy what a backend failure means here.
    fn escalate(
        &self,
        step: &ConversionStep,
        scaffold: Option<&str>,
        failure: BackendFailure,
        detail: &str,
        journal: &mut RunJournal,
    ) -> Result<Generated, EngineError> {
        match policy::resolve(&self.context, failure) {
            FailurePolicy::RaiseFatal => Err(EngineError::FatalConfiguration(format!(
                "code generation for '{}' failed ({}): {}\n\n{}",
                step.id,
                failure,
                detail,
                policy::configuration_help(failure)
            ))),
            FailurePolicy::UseFallback => {
                tracing::warn!(
                    step_id = %step.id,
                    failure = %failure,
                    detail = %detail,
                    context = %self.context,
                    "Generation unavailable; falling back to scaffold"
                );
                self.use_scaffold(step, scaffold, failure, journal)
            }
        }
    }

    fn use_scaffold(
        &self,
        step: &ConversionStep,
        scaffold: Option<&str>,
        failure: BackendFailure,
        journal: &mut RunJournal,
    ) -> Result<Generated, EngineError> {
        let Some(text) = scaffold.filter(|s| !s.trim().is_empty()) else {
            return Ok(Generated::Halt(format!(
                "generation {} and scaffold '{}' produced no output",
                failure,
                self.scaffold.name()
            )));
        };

        let transformation = format!("scaffold '{}' ({})", self.scaffold.name(), failure);
        journal.record(
            JournalAction::ResolvedTemplate,
            JournalEntry::for_step(&step.id)
                .source(&step.source)
                .target(&step.target)
                .transformation(transformation.clone()),
        )?;

        Ok(Generated::Text {
            text: text.to_string(),
            transformation,
        })
    }
}

async fn write_output(path: &Path, text: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, text).await
}

/// Builder for [`ConversionEngine`].
pub struct ConversionEngineBuilder {
    guardrails: GuardrailSet,
    context: ExecutionContext,
    dry_run: bool,
    llm_disabled: bool,
    scaffold: Arc<dyn ScaffoldProducer>,
}

impl ConversionEngineBuilder {
    pub fn new() -> Self {
        Self {
            guardrails: GuardrailSet::default(),
            context: ExecutionContext::Undetermined,
            dry_run: false,
            llm_disabled: false,
            scaffold: Arc::new(SourceEchoScaffold),
        }
    }

    pub fn guardrails(mut self, guardrails: GuardrailSet) -> Self {
        self.guardrails = guardrails;
        self
    }

    pub fn context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    /// Resolve and journal everything, write nothing.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Never call a backend; use the scaffold for every step.
    pub fn disable_llm(mut self, disabled: bool) -> Self {
        self.llm_disabled = disabled;
        self
    }

    pub fn scaffold(mut self, scaffold: Arc<dyn ScaffoldProducer>) -> Self {
        self.scaffold = scaffold;
        self
    }

    pub fn build(self) -> ConversionEngine {
        ConversionEngine {
            guardrails: self.guardrails,
            context: self.context,
            dry_run: self.dry_run,
            llm_disabled: self.llm_disabled,
            scaffold: self.scaffold,
        }
    }
}

impl Default for ConversionEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockProvider;
    use ferry_core::{
        ActionRecord, ApprovalDecision, ApprovalGate, Enforcement, ForcedApproval, NoScaffold,
        Plan, RunStatus,
    };
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        plan: ApprovedPlan,
    }

    impl Fixture {
        fn new(steps: &[(&str, &str, &str)]) -> Self {
            Self::with_output(steps, "out")
        }

        fn with_output(steps: &[(&str, &str, &str)], output: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let feature_root = dir.path().join("src");
            std::fs::create_dir_all(&feature_root).unwrap();

            let conversion_steps = steps
                .iter()
                .map(|(id, source, target)| {
                    let path = feature_root.join(source);
                    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                    std::fs::write(&path, format!("source of {}\n", id)).unwrap();
                    step(id, source, target)
                })
                .collect();

            let plan = Plan {
                feature_name: "orders".into(),
                feature_root,
                output_root: dir.path().join(output),
                target_stack: Some("TypeScript".into()),
                conversion_steps,
            };

            Self {
                plan: approve(plan),
                dir,
            }
        }

        fn checkpoint(&self, run_id: &str) -> CheckpointStore {
            CheckpointStore::open(self.dir.path().join("checkpoints"), run_id, "orders").unwrap()
        }

        fn journal(&self, run_id: &str) -> RunJournal {
            RunJournal::open(self.dir.path().join("logs"), run_id).unwrap()
        }

        fn output(&self, target: &str) -> PathBuf {
            self.plan.output_root.join(target)
        }

        async fn run(
            &self,
            engine: &ConversionEngine,
            run_id: &str,
            router: Option<&ProviderRouter>,
        ) -> Result<RunSummary, EngineError> {
            let mut checkpoint = self.checkpoint(run_id);
            let mut journal = self.journal(run_id);
            engine.execute(&self.plan, &mut checkpoint, router, &mut journal).await
        }

        fn actions(&self, run_id: &str) -> Vec<ActionRecord> {
            RunJournal::read_all(self.journal(run_id).path()).unwrap()
        }
    }

    fn step(id: &str, source: &str, target: &str) -> ConversionStep {
        ConversionStep {
            id: id.into(),
            description: format!("convert {}", source),
            source: source.into(),
            target: target.into(),
            mapping_id: None,
            rules: vec![],
            rationale: "port".into(),
            confidence: None,
        }
    }

    fn approve(plan: Plan) -> ApprovedPlan {
        match ApprovalGate::new(ForcedApproval::new())
            .request_approval(plan, "plan.yaml", "")
            .unwrap()
        {
            ApprovalDecision::Approved(approved) => approved,
            ApprovalDecision::Pending(_) => panic!("forced approval never pends"),
        }
    }

    fn agent() -> ExecutionContext {
        ExecutionContext::AgentAttended {
            agent: "test-agent".into(),
        }
    }

    const ABC: [(&str, &str, &str); 3] = [
        ("A1", "a.py", "a.ts"),
        ("B1", "b.py", "b.ts"),
        ("C1", "c.py", "c.ts"),
    ];

    #[tokio::test]
    async fn test_all_steps_written() {
        let fx = Fixture::new(&ABC);
        let provider = Arc::new(MockProvider::ok("m", "```ts\nexport {};\n```"));
        let router = ProviderRouter::new(provider.clone());
        let engine = ConversionEngine::builder().build();

        let summary = fx.run(&engine, "run-1", Some(&router)).await.unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.completed_steps, vec!["A1", "B1", "C1"]);
        assert_eq!(provider.calls(), 3);
        assert_eq!(std::fs::read_to_string(fx.output("a.ts")).unwrap(), "export {};\n");

        let state = fx.checkpoint("run-1").current_state();
        assert!(state.pending_steps.is_empty());
        assert_eq!(state.last_completed_step.as_deref(), Some("C1"));

        let actions: Vec<JournalAction> = fx.actions("run-1").iter().map(|r| r.action).collect();
        assert_eq!(
            &actions[..5],
            &[
                JournalAction::StepStarted,
                JournalAction::ReadFile,
                JournalAction::WroteFile,
                JournalAction::StepCompleted,
                JournalAction::StepStarted,
            ]
        );
        assert_eq!(actions.last(), Some(&JournalAction::RunFinished));
    }

    #[tokio::test]
    async fn test_middle_step_ambiguous_run_continues() {
        let mut fx = Fixture::new(&ABC);
        let mut plan = fx.plan.plan().clone();
        plan.conversion_steps[1].confidence = Some(0.3);
        fx.plan = approve(plan);

        let provider = Arc::new(MockProvider::ok("m", "converted"));
        let router = ProviderRouter::new(provider.clone());
        let engine = ConversionEngine::builder().build();

        let summary = fx.run(&engine, "run-abc", Some(&router)).await.unwrap();
        assert_eq!(summary.status, RunStatus::CompletedWithFlags);
        assert_eq!(summary.completed_steps, vec!["A1", "C1"]);
        assert_eq!(summary.flagged_steps.len(), 1);
        assert_eq!(summary.flagged_steps[0].step, "B1");
        assert_eq!(summary.flagged_steps[0].kind, FlagKind::Ambiguous);
        assert!(summary.to_string().contains("--run-id run-abc"));

        assert!(fx.output("a.ts").exists());
        assert!(!fx.output("b.ts").exists());
        assert!(fx.output("c.ts").exists());
        assert_eq!(provider.calls(), 2);

        let checkpoint = fx.checkpoint("run-abc");
        assert!(checkpoint.is_blocked("B1"));
        assert!(checkpoint.block_reason("B1").unwrap().contains("confidence"));
        assert!(!checkpoint
            .current_state()
            .completed_steps
            .contains(&"B1".to_string()));

        let records = fx.actions("run-abc");
        let halted = records
            .iter()
            .find(|r| r.action == JournalAction::HaltedAmbiguous)
            .unwrap();
        assert_eq!(halted.plan_step_ref.as_deref(), Some("B1"));
        assert_eq!(
            records.last().unwrap().transformation.as_deref(),
            Some("status: completed_with_flags")
        );
    }

    #[tokio::test]
    async fn test_agent_run_on_scaffold_flags_only_middle_step() {
        let mut fx = Fixture::new(&ABC);
        let mut plan = fx.plan.plan().clone();
        plan.conversion_steps[1].confidence = Some(0.3);
        fx.plan = approve(plan);

        let offline = Arc::new(MockProvider::unavailable("offline"));
        let router = ProviderRouter::new(offline.clone());
        let engine = ConversionEngine::builder().context(agent()).build();

        let summary = fx.run(&engine, "run-agent-abc", Some(&router)).await.unwrap();
        assert_eq!(summary.status, RunStatus::CompletedWithFlags);
        assert_eq!(
            (summary.total, summary.completed, summary.flagged),
            (3, 2, 1)
        );
        assert_eq!(summary.flagged_steps[0].step, "B1");
        assert_eq!(offline.calls(), 0);

        let state = fx.checkpoint("run-agent-abc").current_state();
        assert_eq!(state.completed_steps, vec!["A1", "C1"]);
        assert!(!state.completed_steps.contains(&"B1".to_string()));
        assert_eq!(state.blocked_steps, vec!["B1"]);
        assert!(std::fs::read_to_string(fx.output("c.ts"))
            .unwrap()
            .contains("source of C1"));
    }

    #[tokio::test]
    async fn test_target_with_inner_parent_dir_is_written() {
        let fx = Fixture::new(&[("A1", "a.py", "app/../lib/a.ts")]);
        let provider = Arc::new(MockProvider::ok("m", "converted"));
        let router = ProviderRouter::new(provider.clone());
        let engine = ConversionEngine::builder().build();

        let summary = fx.run(&engine, "run-dots", Some(&router)).await.unwrap();
        assert_eq!(summary.completed_steps, vec!["A1"]);
        assert!(summary.flagged_steps.is_empty());
        assert_eq!(
            std::fs::read_to_string(fx.plan.output_root.join("lib/a.ts")).unwrap(),
            "converted\n"
        );
    }

    #[tokio::test]
    async fn test_resume_never_reruns_settled_steps() {
        let fx = Fixture::new(&ABC);
        let provider = Arc::new(MockProvider::ok("m", "converted"));
        let router = ProviderRouter::new(provider.clone());
        let engine = ConversionEngine::builder().build();

        // An earlier invocation finished A1 before being killed.
        fx.checkpoint("run-r")
            .mark_completed("A1", &fx.plan.step_ids())
            .unwrap();

        let summary = fx.run(&engine, "run-r", Some(&router)).await.unwrap();
        assert_eq!(provider.calls(), 2);
        assert_eq!(summary.skipped_steps, vec!["A1"]);
        assert_eq!(summary.completed_steps, vec!["B1", "C1"]);
        assert!(!fx.output("a.ts").exists());

        let again = fx.run(&engine, "run-r", Some(&router)).await.unwrap();
        assert_eq!(provider.calls(), 2);
        assert_eq!(again.skipped, 3);
        assert_eq!(again.completed + again.flagged + again.skipped, 3);
    }

    #[tokio::test]
    async fn test_resume_reports_unresolved_blocks() {
        let fx = Fixture::new(&ABC);
        let engine = ConversionEngine::builder().disable_llm(true).build();
        fx.checkpoint("run-u").mark_blocked("B1", "needs review").unwrap();

        let summary = fx.run(&engine, "run-u", None).await.unwrap();
        assert_eq!(summary.status, RunStatus::CompletedWithFlags);
        assert_eq!(summary.flagged_steps[0].kind, FlagKind::Unresolved);
        assert_eq!(summary.flagged_steps[0].reason, "needs review");
        assert!(!fx.output("b.ts").exists());
    }

    #[tokio::test]
    async fn test_idempotent_against_fresh_checkpoints() {
        let first = Fixture::new(&ABC);
        let second = Fixture::new(&ABC);
        let engine = ConversionEngine::builder().disable_llm(true).build();

        let a = first.run(&engine, "run-i", None).await.unwrap();
        let b = second.run(&engine, "run-i", None).await.unwrap();
        assert_eq!(a, b);

        for (_, _, target) in ABC {
            assert_eq!(
                std::fs::read_to_string(first.output(target)).unwrap(),
                std::fs::read_to_string(second.output(target)).unwrap()
            );
        }
    }

    #[tokio::test]
    async fn test_human_context_without_backend_is_fatal() {
        let fx = Fixture::new(&ABC);
        let engine = ConversionEngine::builder()
            .context(ExecutionContext::HumanAttended)
            .build();

        let err = fx.run(&engine, "run-f", None).await.unwrap_err();
        match err {
            EngineError::FatalConfiguration(message) => {
                assert!(message.contains("A1"));
                assert!(message.contains("ANTHROPIC_API_KEY"));
            }
            other => panic!("expected fatal configuration, got {other:?}"),
        }
        assert!(!fx.output("a.ts").exists());
        assert!(!fx.checkpoint("run-f").is_settled("A1"));

        let last = fx.actions("run-f").pop().unwrap();
        assert_eq!(last.action, JournalAction::RunFinished);
        assert_eq!(last.transformation.as_deref(), Some("status: aborted"));
    }

    #[tokio::test]
    async fn test_undetermined_context_call_failure_is_fatal() {
        let fx = Fixture::new(&ABC);
        let router = ProviderRouter::new(Arc::new(MockProvider::failing("m", "down")));
        let engine = ConversionEngine::builder().build();

        let err = fx.run(&engine, "run-u2", Some(&router)).await.unwrap_err();
        assert!(matches!(err, EngineError::FatalConfiguration(ref m) if m.contains("down")));
    }

    #[tokio::test]
    async fn test_agent_context_falls_back_to_scaffold() {
        let fx = Fixture::new(&ABC);
        let router = ProviderRouter::new(Arc::new(MockProvider::failing("m", "down")));
        let engine = ConversionEngine::builder().context(agent()).build();

        let summary = fx.run(&engine, "run-s", Some(&router)).await.unwrap();
        assert_eq!(summary.status, RunStatus::Completed);

        let written = std::fs::read_to_string(fx.output("a.ts")).unwrap();
        assert!(written.starts_with("// SCAFFOLD: a.py -> a.ts"));
        assert!(written.contains("source of A1"));

        let templates = fx
            .actions("run-s")
            .into_iter()
            .filter(|r| r.action == JournalAction::ResolvedTemplate)
            .count();
        assert_eq!(templates, 3);
    }

    #[tokio::test]
    async fn test_fallback_without_scaffold_is_ambiguous() {
        let fx = Fixture::new(&ABC);
        let engine = ConversionEngine::builder()
            .context(agent())
            .scaffold(Arc::new(NoScaffold))
            .build();

        let summary = fx.run(&engine, "run-n", None).await.unwrap();
        assert_eq!(summary.flagged, 3);
        assert!(summary.flagged_steps[0].reason.contains("produced no output"));
    }

    #[tokio::test]
    async fn test_no_llm_uses_scaffold_even_for_humans() {
        let fx = Fixture::new(&ABC);
        let provider = Arc::new(MockProvider::ok("m", "converted"));
        let router = ProviderRouter::new(provider.clone());
        let engine = ConversionEngine::builder()
            .context(ExecutionContext::HumanAttended)
            .disable_llm(true)
            .build();

        let summary = fx.run(&engine, "run-d", Some(&router)).await.unwrap();
        assert_eq!(summary.completed, 3);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let fx = Fixture::with_output(&ABC, "not-created");
        let engine = ConversionEngine::builder().disable_llm(true).dry_run(true).build();

        let summary = fx.run(&engine, "run-dry", None).await.unwrap();
        assert_eq!(summary.completed, 3);
        assert!(!fx.plan.output_root.exists());

        let wrote = fx
            .actions("run-dry")
            .into_iter()
            .filter(|r| r.action == JournalAction::WroteFile)
            .collect::<Vec<_>>();
        assert_eq!(wrote.len(), 3);
        assert!(wrote[0]
            .deviation_from_plan
            .as_deref()
            .unwrap()
            .contains("dry run"));
    }

    #[tokio::test]
    async fn test_traversal_target_is_blocked() {
        let fx = Fixture::new(&[("A1", "a.py", "../../etc/passwd"), ("B1", "b.py", "b.ts")]);
        let provider = Arc::new(MockProvider::ok("m", "converted"));
        let router = ProviderRouter::new(provider.clone());
        let engine = ConversionEngine::builder().build();

        let summary = fx.run(&engine, "run-t", Some(&router)).await.unwrap();
        assert_eq!(summary.flagged_steps[0].kind, FlagKind::Boundary);
        assert_eq!(summary.completed_steps, vec!["B1"]);
        // Rejected before generation.
        assert_eq!(provider.calls(), 1);
        assert!(fx
            .actions("run-t")
            .iter()
            .any(|r| r.action == JournalAction::RejectedOutOfBoundary));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_is_blocked() {
        let fx = Fixture::new(&[("A1", "a.py", "link/escaped.ts")]);
        let outside = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(&fx.plan.output_root).unwrap();
        std::os::unix::fs::symlink(outside.path(), fx.plan.output_root.join("link")).unwrap();

        let router = ProviderRouter::new(Arc::new(MockProvider::ok("m", "converted")));
        let engine = ConversionEngine::builder().build();

        let summary = fx.run(&engine, "run-l", Some(&router)).await.unwrap();
        assert_eq!(summary.flagged_steps[0].kind, FlagKind::Boundary);
        assert!(!outside.path().join("escaped.ts").exists());
        assert!(fx.checkpoint("run-l").is_blocked("A1"));
    }

    #[tokio::test]
    async fn test_ambiguous_model_response() {
        let fx = Fixture::new(&[("A1", "a.py", "a.ts")]);
        let router = ProviderRouter::new(Arc::new(MockProvider::ok(
            "m",
            "AMBIGUOUS: session handling is implicit",
        )));
        let engine = ConversionEngine::builder().build();

        let summary = fx.run(&engine, "run-amb", Some(&router)).await.unwrap();
        assert_eq!(summary.flagged_steps[0].kind, FlagKind::Ambiguous);
        assert!(summary.flagged_steps[0]
            .reason
            .contains("session handling is implicit"));
        assert!(!fx.output("a.ts").exists());
    }

    #[tokio::test]
    async fn test_missing_source_is_ambiguous() {
        let fx = Fixture::new(&[("A1", "a.py", "a.ts")]);
        std::fs::remove_file(fx.plan.feature_root.join("a.py")).unwrap();
        let engine = ConversionEngine::builder().disable_llm(true).build();

        let summary = fx.run(&engine, "run-m", None).await.unwrap();
        assert!(summary.flagged_steps[0].reason.contains("cannot read source"));
    }

    #[tokio::test]
    async fn test_blocking_rule_halts_before_generation() {
        let fx = Fixture::new(&[("A1", "a.py", "a.ts")]);
        let mut plan = fx.plan.plan().clone();
        plan.conversion_steps[0].rules = vec!["R-AUTH".into()];
        std::fs::write(plan.feature_root.join("a.py"), "from flask_login import login_user\n").unwrap();
        let plan = approve(plan);

        let rules = GuardrailSet::new(
            [GuardrailRule {
                id: "R-AUTH".into(),
                name: "Auth".into(),
                description: "Auth must go through the gateway".into(),
                enforcement: Enforcement::Blocking,
                applies_to: vec![],
                flagged_libraries: vec!["flask_login".into()],
                halt_patterns: vec![],
            }],
            0.7,
        )
        .unwrap();

        let provider = Arc::new(MockProvider::ok("m", "converted"));
        let router = ProviderRouter::new(provider.clone());
        let engine = ConversionEngine::builder().guardrails(rules).build();

        let mut checkpoint = fx.checkpoint("run-g");
        let mut journal = fx.journal("run-g");
        let summary = engine
            .execute(&plan, &mut checkpoint, Some(&router), &mut journal)
            .await
            .unwrap();

        assert!(summary.flagged_steps[0].reason.starts_with("R-AUTH"));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_prompt_carries_source_and_scaffold_hint() {
        let fx = Fixture::new(&[("A1", "a.py", "a.ts")]);
        let provider = Arc::new(MockProvider::ok("m", "converted"));
        let router = ProviderRouter::new(provider.clone());
        let engine = ConversionEngine::builder().build();

        fx.run(&engine, "run-p", Some(&router)).await.unwrap();
        let message = provider.last_user_message().unwrap();
        assert!(message.contains("Conversion Step: A1"));
        assert!(message.contains("SCAFFOLD HINT"));
        assert!(message.contains("source of A1"));
    }
}
