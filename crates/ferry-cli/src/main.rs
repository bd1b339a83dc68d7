//! ferry CLI - run approved code-conversion plans step by step.
//!
//! Exit codes: 0 run finished (possibly with flagged steps), 1 failure,
//! 2 plan rejected, 3 plan pending approval.

mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// ferry - resumable, guarded code conversion
#[derive(Parser, Debug)]
#[command(
    name = "ferry",
    author,
    version,
    about = "Resumable, guarded code-conversion pipeline",
    long_about = "ferry executes an approved conversion plan one step at a time, delegating code generation to a configurable LLM backend.\nProgress is checkpointed after every step so an interrupted run resumes where it stopped."
)]
struct Args {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute or resume a conversion plan
    ///
    /// The plan must pass the approval gate first. Pass --run-id to resume a
    /// previous run; completed and blocked steps are skipped.
    Run(commands::run::RunArgs),

    /// Show the checkpoint of a run
    Status(commands::status::StatusArgs),

    /// List compiled-in backends and the resolved provider configuration
    Providers(commands::providers::ProvidersArgs),
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "ferry=debug,info" } else { "ferry=info,warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let result = match args.command {
        Command::Run(run_args) => commands::run::execute(run_args).await,
        Command::Status(status_args) => commands::status::execute(status_args),
        Command::Providers(provider_args) => commands::providers::execute(provider_args),
    };

    match result {
        Ok(outcome) => outcome.into(),
        Err(e) => {
            eprintln!("Error: {e:#}");
            commands::Outcome::Failure.into()
        }
    }
}
