//! Append-only run journal.
//!
//! Every action the engine takes is appended as one JSON line to
//! `<logs>/<run_id>-conversion-log.jsonl` and synced before the call returns.
//! Sequence numbers continue across resumed runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::checkpoint::{validate_run_id, CheckpointError};

/// Errors from journal I/O.
#[derive(Error, Debug)]
pub enum JournalError {
    #[error("Journal I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode journal record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    InvalidRunId(#[from] CheckpointError),
}

/// Kinds of journaled actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalAction {
    StepStarted,
    ReadFile,
    ResolvedTemplate,
    WroteFile,
    HaltedAmbiguous,
    RejectedOutOfBoundary,
    StepCompleted,
    Skipped,
    RunFinished,
}

/// One journal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Monotonic per run, starting at 1
    pub sequence: u64,

    pub timestamp: DateTime<Utc>,

    pub action: JournalAction,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_file: Option<String>,

    /// Comma-joined rule ids
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_applied: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_step_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deviation_from_plan: Option<String>,
}

/// Builder-style entry handed to [`RunJournal::record`].
#[derive(Debug, Clone, Default)]
pub struct JournalEntry {
    source_file: Option<String>,
    target_file: Option<String>,
    rule_applied: Option<String>,
    transformation: Option<String>,
    rationale: Option<String>,
    plan_step_ref: Option<String>,
    deviation_from_plan: Option<String>,
}

impl JournalEntry {
    /// Entry tied to a plan step.
    pub fn for_step(step_id: impl Into<String>) -> Self {
        Self {
            plan_step_ref: Some(step_id.into()),
            ..Self::default()
        }
    }

    pub fn source(mut self, path: impl Into<String>) -> Self {
        self.source_file = Some(path.into());
        self
    }

    pub fn target(mut self, path: impl Into<String>) -> Self {
        self.target_file = Some(path.into());
        self
    }

    pub fn rules(mut self, rule_ids: &[String]) -> Self {
        if !rule_ids.is_empty() {
            self.rule_applied = Some(rule_ids.join(", "));
        }
        self
    }

    pub fn transformation(mut self, text: impl Into<String>) -> Self {
        self.transformation = Some(text.into());
        self
    }

    pub fn rationale(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if !text.is_empty() {
            self.rationale = Some(text);
        }
        self
    }

    pub fn deviation(mut self, text: impl Into<String>) -> Self {
        self.deviation_from_plan = Some(text.into());
        self
    }
}

/// Appends [`ActionRecord`]s for one run.
#[derive(Debug)]
pub struct RunJournal {
    path: PathBuf,
    file: File,
    next_sequence: u64,
}

impl RunJournal {
    /// Open (or create) the journal for `run_id` under `dir`.
    pub fn open(dir: impl AsRef<Path>, run_id: &str) -> Result<Self, JournalError> {
        validate_run_id(run_id)?;
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|source| JournalError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = dir.join(format!("{}-conversion-log.jsonl", run_id));
        let io_err = |source| JournalError::Io {
            path: path.clone(),
            source,
        };

        let existing = match File::open(&path) {
            Ok(f) => BufReader::new(f)
                .lines()
                .map_while(Result::ok)
                .filter(|l| !l.trim().is_empty())
                .count() as u64,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(io_err(e)),
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;

        if existing > 0 {
            tracing::debug!(path = %path.display(), records = existing, "Appending to existing journal");
        }

        Ok(Self {
            path,
            file,
            next_sequence: existing + 1,
        })
    }

    /// Append one record and sync it to disk.
    pub fn record(
        &mut self,
        action: JournalAction,
        entry: JournalEntry,
    ) -> Result<ActionRecord, JournalError> {
        let record = ActionRecord {
            sequence: self.next_sequence,
            timestamp: Utc::now(),
            action,
            source_file: entry.source_file,
            target_file: entry.target_file,
            rule_applied: entry.rule_applied,
            transformation: entry.transformation,
            rationale: entry.rationale,
            plan_step_ref: entry.plan_step_ref,
            deviation_from_plan: entry.deviation_from_plan,
        };

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let io_err = |source| JournalError::Io {
            path: self.path.clone(),
            source,
        };
        self.file.write_all(line.as_bytes()).map_err(io_err)?;
        self.file.sync_data().map_err(io_err)?;

        self.next_sequence += 1;
        Ok(record)
    }

    /// Record the run outcome (`completed`, `completed_with_flags`, `aborted`).
    pub fn finalize(&mut self, status: &str) -> Result<ActionRecord, JournalError> {
        self.record(
            JournalAction::RunFinished,
            JournalEntry::default().transformation(format!("status: {}", status)),
        )
    }

    /// Read every record of a journal file.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<ActionRecord>, JournalError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| JournalError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(JournalError::from))
            .collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records written so far, including earlier sessions.
    pub fn len(&self) -> u64 {
        self.next_sequence - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
