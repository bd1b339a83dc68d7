//! `ferry status`: inspect a run's checkpoint and journal.

use anyhow::{bail, Context};
use clap::Args;
use ferry_core::checkpoint::validate_run_id;
use ferry_core::{CheckpointStore, RunJournal};
use std::path::PathBuf;

use super::Outcome;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Run to inspect
    #[arg(long)]
    pub run_id: String,

    #[arg(long, default_value = ".ferry/checkpoints")]
    pub checkpoints_dir: PathBuf,

    #[arg(long, default_value = ".ferry/logs")]
    pub logs_dir: PathBuf,

    /// Print the raw checkpoint as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: StatusArgs) -> anyhow::Result<Outcome> {
    println!("{}", render(&args)?);
    Ok(Outcome::Success)
}

fn render(args: &StatusArgs) -> anyhow::Result<String> {
    validate_run_id(&args.run_id)?;
    let path = args
        .checkpoints_dir
        .join(format!("{}-checkpoint.json", args.run_id));
    if !path.exists() {
        bail!("no checkpoint for run '{}' in {}", args.run_id, args.checkpoints_dir.display());
    }

    let store = CheckpointStore::open(&args.checkpoints_dir, &args.run_id, "")?;
    if args.json {
        return serde_json::to_string_pretty(&store.current_state())
            .context("serializing checkpoint");
    }

    let mut out = store.summary();
    let log = args
        .logs_dir
        .join(format!("{}-conversion-log.jsonl", args.run_id));
    if log.exists() {
        let records = RunJournal::read_all(&log)?;
        out.push_str(&format!("\n  Journal: {} ({} entries)", log.display(), records.len()));
        if let Some(last) = records.last() {
            out.push_str(&format!(
                "\n  Last action: {:?} at {}",
                last.action,
                last.timestamp.to_rfc3339()
            ));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(dir: &TempDir, run_id: &str) -> StatusArgs {
        StatusArgs {
            run_id: run_id.to_string(),
            checkpoints_dir: dir.path().join("checkpoints"),
            logs_dir: dir.path().join("logs"),
            json: false,
        }
    }

    #[test]
    fn test_unknown_run_is_error() {
        let dir = TempDir::new().unwrap();
        let err = render(&args(&dir, "conv-missing")).unwrap_err();
        assert!(err.to_string().contains("no checkpoint"));
    }

    #[test]
    fn test_unsafe_run_id_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(render(&args(&dir, "../escape")).is_err());
    }

    #[test]
    fn test_renders_checkpoint_and_journal() {
        let dir = TempDir::new().unwrap();
        let status = args(&dir, "conv-1");

        let mut store = CheckpointStore::open(&status.checkpoints_dir, "conv-1", "orders").unwrap();
        store
            .register_steps(&["A1".to_string(), "B1".to_string()])
            .unwrap();
        store.mark_blocked("B1", "ambiguous mapping").unwrap();
        let mut journal = RunJournal::open(&status.logs_dir, "conv-1").unwrap();
        journal.finalize("completed_with_flags").unwrap();

        let text = render(&status).unwrap();
        assert!(text.contains("B1 (ambiguous mapping)"));
        assert!(text.contains("1 entries"));
        assert!(text.contains("RunFinished"));

        let json = render(&StatusArgs { json: true, ..status }).unwrap();
        assert!(json.contains("\"run_id\": \"conv-1\""));
    }
}
