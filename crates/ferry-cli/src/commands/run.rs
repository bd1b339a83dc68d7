//! `ferry run`: approve, then execute or resume a plan.

use anyhow::Context;
use chrono::Utc;
use clap::{Args, ValueEnum};
use ferry_core::{
    detect_context, ApprovalDecision, ApprovalError, ApprovalGate, ApprovalStrategy,
    CheckpointStore, ContextOverride, EnvSnapshot, ForcedApproval, GuardrailSet,
    InteractiveApproval, MarkerApproval, Plan, ProcfsProbe, RunJournal,
};
use ferry_runtime::{
    resolve_fallback_config, resolve_provider_config, ConversionEngine, EngineError,
    FailoverPolicy, ProviderRegistry, ProviderRouter,
};
use std::ffi::OsString;
use std::path::PathBuf;
use uuid::Uuid;

use super::{Outcome, ProviderArgs};

/// How the plan gets signed off.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalMode {
    /// Show the plan and ask on the terminal
    Prompt,
    /// Approve once a marker file exists
    Marker,
    /// Approve without asking
    Auto,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Plan file (YAML or JSON)
    #[arg(long, short)]
    pub plan: PathBuf,

    /// Guardrail rules file (YAML or JSON)
    #[arg(long, short)]
    pub guardrails: Option<PathBuf>,

    /// Write converted files here instead of the plan's output_root
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    #[arg(long, default_value = ".ferry/checkpoints")]
    pub checkpoints_dir: PathBuf,

    #[arg(long, default_value = ".ferry/logs")]
    pub logs_dir: PathBuf,

    /// Resume this run instead of starting a new one
    #[arg(long)]
    pub run_id: Option<String>,

    /// Generate and log, but write nothing
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long, value_enum, default_value_t = ApprovalMode::Prompt)]
    pub approval: ApprovalMode,

    /// Marker file for --approval marker [default: <plan>.approved]
    #[arg(long)]
    pub approval_marker: Option<PathBuf>,

    /// Skip generation and emit scaffold output
    #[arg(long)]
    pub no_llm: bool,

    /// Force the execution context instead of detecting it
    #[arg(long)]
    pub context: Option<ContextOverride>,

    #[command(flatten)]
    pub provider: ProviderArgs,
}

impl RunArgs {
    fn marker_path(&self) -> PathBuf {
        match &self.approval_marker {
            Some(path) => path.clone(),
            None => {
                let mut raw: OsString = self.plan.clone().into_os_string();
                raw.push(".approved");
                PathBuf::from(raw)
            }
        }
    }

    fn strategy(&self) -> Box<dyn ApprovalStrategy> {
        match self.approval {
            ApprovalMode::Prompt => Box::new(InteractiveApproval::stdio()),
            ApprovalMode::Marker => Box::new(MarkerApproval::new(self.marker_path())),
            ApprovalMode::Auto => Box::new(ForcedApproval::new()),
        }
    }
}

/// `conv-<UTC timestamp>-<6 hex chars>`
pub fn new_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("conv-{}-{}", Utc::now().format("%Y%m%d-%H%M%S"), &suffix[..6])
}

pub(crate) fn build_router(env: &EnvSnapshot, args: &ProviderArgs) -> anyhow::Result<ProviderRouter> {
    let overrides = args.overrides();
    let primary = resolve_provider_config(env, &overrides).context("resolving LLM provider")?;
    let fallback =
        resolve_fallback_config(env, &overrides).context("resolving fallback provider")?;

    let registry = ProviderRegistry::with_defaults();
    let mut router = ProviderRouter::from_configs(&registry, &primary, fallback.as_ref());
    if let Some(hops) = args.max_failover_hops {
        router = router.with_policy(FailoverPolicy {
            max_failover_hops: hops,
        });
    }

    if !router.is_available() {
        tracing::warn!(provider = %router.primary(), "No configured provider is available");
    }
    Ok(router)
}

pub async fn execute(args: RunArgs) -> anyhow::Result<Outcome> {
    let plan_text = std::fs::read_to_string(&args.plan)
        .with_context(|| format!("reading plan {}", args.plan.display()))?;
    let mut plan = Plan::from_file(&args.plan)
        .with_context(|| format!("loading plan {}", args.plan.display()))?;
    if let Some(dir) = &args.output_dir {
        plan.output_root = dir.clone();
    }

    let guardrails = match &args.guardrails {
        Some(path) => GuardrailSet::from_file(path)
            .with_context(|| format!("loading guardrails {}", path.display()))?,
        None => GuardrailSet::default(),
    };

    let env = EnvSnapshot::capture();
    let context = detect_context(args.context, &env, &ProcfsProbe);
    tracing::info!(context = %context, "Execution context");

    let plan_ref = args.plan.display().to_string();
    let mut gate = ApprovalGate::new(args.strategy());
    let approved = match gate.request_approval(plan, &plan_ref, &plan_text) {
        Ok(ApprovalDecision::Approved(approved)) => approved,
        Ok(ApprovalDecision::Pending(_)) => {
            println!(
                "Plan {plan_ref} is awaiting approval. Create {} to approve it.",
                args.marker_path().display()
            );
            return Ok(Outcome::Pending);
        }
        Err(ApprovalError::Rejected { feedback }) => {
            println!("Plan rejected. Nothing was executed.");
            if let Some(feedback) = feedback {
                println!("Feedback: {feedback}");
            }
            return Ok(Outcome::Rejected);
        }
        Err(e) => return Err(e.into()),
    };
    drop(gate);

    let run_id = match &args.run_id {
        Some(id) => id.clone(),
        None => new_run_id(),
    };
    let mut checkpoint = CheckpointStore::open(&args.checkpoints_dir, &run_id, &approved.feature_name)?;
    let mut journal = RunJournal::open(&args.logs_dir, &run_id)?;

    let router = if args.no_llm {
        None
    } else {
        Some(build_router(&env, &args.provider)?)
    };

    let engine = ConversionEngine::builder()
        .guardrails(guardrails)
        .context(context)
        .dry_run(args.dry_run)
        .disable_llm(args.no_llm)
        .build();

    match engine
        .execute(&approved, &mut checkpoint, router.as_ref(), &mut journal)
        .await
    {
        Ok(summary) => {
            print!("{summary}");
            if let Some(router) = &router {
                let stats = router.stats();
                println!(
                    "LLM: {} calls ({} fallback, {} failed), {} tokens",
                    stats.calls,
                    stats.fallback_calls,
                    stats.failures,
                    stats.total_tokens()
                );
            }
            println!("Checkpoint: {}", checkpoint.path().display());
            println!("Log: {}", journal.path().display());
            Ok(Outcome::Success)
        }
        Err(EngineError::FatalConfiguration(message)) => {
            eprintln!("{message}");
            eprintln!("Fix the configuration and resume with --run-id {run_id}");
            Ok(Outcome::Failure)
        }
        Err(e) => Err(e.into()),
    }
}
