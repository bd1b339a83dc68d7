//! Durable per-run checkpoint store.
//!
//! One JSON record per run id, rewritten in full after every mutation and
//! before the mutating call returns. A killed process loses at most the step
//! that was in flight. Keep the flush unbuffered.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

lazy_static! {
    static ref RUN_ID_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").unwrap();
}

/// Errors from the checkpoint store.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid run id '{0}': use letters, digits, '.', '_' or '-'")]
    InvalidRunId(String),

    #[error("Checkpoint {path} belongs to run '{found}', expected '{expected}'")]
    RunIdMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Step '{step_id}' is already {existing}; it cannot be marked {requested}")]
    Conflict {
        step_id: String,
        existing: &'static str,
        requested: &'static str,
    },
}

/// Check that a run id is safe to embed in a file name.
pub fn validate_run_id(run_id: &str) -> Result<(), CheckpointError> {
    if RUN_ID_PATTERN.is_match(run_id) {
        Ok(())
    } else {
        Err(CheckpointError::InvalidRunId(run_id.to_string()))
    }
}

/// Persisted checkpoint record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunCheckpoint {
    pub run_id: String,

    #[serde(default)]
    pub feature: String,

    pub last_completed_step: Option<String>,

    #[serde(default)]
    pub completed_steps: Vec<String>,

    #[serde(default)]
    pub pending_steps: Vec<String>,

    #[serde(default)]
    pub blocked_steps: Vec<String>,

    /// Reason recorded by the most recent block
    pub block_reason: Option<String>,

    /// Reason per blocked step
    #[serde(default)]
    pub block_reasons: BTreeMap<String, String>,

    pub checkpoint_at: Option<DateTime<Utc>>,
}

impl RunCheckpoint {
    fn empty(run_id: &str, feature: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            feature: feature.to_string(),
            last_completed_step: None,
            completed_steps: Vec::new(),
            pending_steps: Vec::new(),
            blocked_steps: Vec::new(),
            block_reason: None,
            block_reasons: BTreeMap::new(),
            checkpoint_at: None,
        }
    }

    /// Steps that are neither completed nor blocked, in the given order.
    pub fn pending_of(&self, all_step_ids: &[String]) -> Vec<String> {
        all_step_ids
            .iter()
            .filter(|id| !self.completed_steps.contains(id) && !self.blocked_steps.contains(id))
            .cloned()
            .collect()
    }
}

/// Checkpoint store for one run id.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    state: RunCheckpoint,
    known_steps: Vec<String>,
}

impl CheckpointStore {
    /// Open the checkpoint for `run_id` in `dir`, loading it if present.
    pub fn open(
        dir: impl AsRef<Path>,
        run_id: &str,
        feature: &str,
    ) -> Result<Self, CheckpointError> {
        validate_run_id(run_id)?;
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|source| CheckpointError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = dir.join(format!("{run_id}-checkpoint.json"));
        let state = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| CheckpointError::Io {
                path: path.clone(),
                source,
            })?;
            let state: RunCheckpoint =
                serde_json::from_str(&raw).map_err(|source| CheckpointError::Corrupt {
                    path: path.clone(),
                    source,
                })?;
            if state.run_id != run_id {
                return Err(CheckpointError::RunIdMismatch {
                    path,
                    expected: run_id.to_string(),
                    found: state.run_id,
                });
            }
            tracing::info!(
                run_id,
                path = %path.display(),
                last_completed = ?state.last_completed_step,
                completed = state.completed_steps.len(),
                blocked = state.blocked_steps.len(),
                "Resuming from checkpoint"
            );
            state
        } else {
            RunCheckpoint::empty(run_id, feature)
        };

        let known_steps = state
            .completed_steps
            .iter()
            .chain(state.blocked_steps.iter())
            .chain(state.pending_steps.iter())
            .cloned()
            .collect();

        Ok(Self {
            path,
            state,
            known_steps,
        })
    }

    /// Whether a previous invocation completed this step.
    pub fn is_completed(&self, step_id: &str) -> bool {
        self.state.completed_steps.iter().any(|s| s == step_id)
    }

    /// Whether this step is blocked for the run.
    pub fn is_blocked(&self, step_id: &str) -> bool {
        self.state.blocked_steps.iter().any(|s| s == step_id)
    }

    /// Recorded reason for a blocked step.
    pub fn block_reason(&self, step_id: &str) -> Option<&str> {
        self.state.block_reasons.get(step_id).map(String::as_str)
    }

    /// Whether the step reached a terminal state.
    pub fn is_settled(&self, step_id: &str) -> bool {
        self.is_completed(step_id) || self.is_blocked(step_id)
    }

    /// Record the plan's step ids and flush the recomputed pending list.
    pub fn register_steps(&mut self, all_step_ids: &[String]) -> Result<(), CheckpointError> {
        self.known_steps = all_step_ids.to_vec();
        self.state.pending_steps = self.state.pending_of(&self.known_steps);
        self.flush()
    }

    /// Record a step as completed. There is no way to undo this.
    pub fn mark_completed(
        &mut self,
        step_id: &str,
        all_step_ids: &[String],
    ) -> Result<(), CheckpointError> {
        if self.is_blocked(step_id) {
            return Err(CheckpointError::Conflict {
                step_id: step_id.to_string(),
                existing: "blocked",
                requested: "completed",
            });
        }

        if !self.is_completed(step_id) {
            self.state.completed_steps.push(step_id.to_string());
        }
        self.state.last_completed_step = Some(step_id.to_string());
        self.known_steps = all_step_ids.to_vec();
        self.state.pending_steps = self.state.pending_of(&self.known_steps);
        self.flush()
    }

    /// Record a step as blocked with a reason.
    pub fn mark_blocked(&mut self, step_id: &str, reason: &str) -> Result<(), CheckpointError> {
        if self.is_completed(step_id) {
            return Err(CheckpointError::Conflict {
                step_id: step_id.to_string(),
                existing: "completed",
                requested: "blocked",
            });
        }

        if !self.is_blocked(step_id) {
            self.state.blocked_steps.push(step_id.to_string());
        }
        self.state.block_reason = Some(reason.to_string());
        self.state
            .block_reasons
            .insert(step_id.to_string(), reason.to_string());
        self.state.pending_steps = self.state.pending_of(&self.known_steps);
        self.flush()
    }

    /// Snapshot of the current state.
    pub fn current_state(&self) -> RunCheckpoint {
        self.state.clone()
    }

    pub fn run_id(&self) -> &str {
        &self.state.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Multi-line status text for the CLI.
    pub fn summary(&self) -> String {
        let s = &self.state;
        let blocked: Vec<String> = s
            .blocked_steps
            .iter()
            .map(|id| match s.block_reasons.get(id) {
                Some(reason) => format!("{id} ({reason})"),
                None => id.clone(),
            })
            .collect();
        format!(
            "Checkpoint [{}]:\n  Last completed: {}\n  Completed: {:?}\n  Pending:   {:?}\n  Blocked:   {:?}\n  As of: {}",
            s.run_id,
            s.last_completed_step.as_deref().unwrap_or("-"),
            s.completed_steps,
            s.pending_steps,
            blocked,
            s.checkpoint_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
        )
    }

    fn flush(&mut self) -> Result<(), CheckpointError> {
        debug_assert!(self.disjoint(), "step recorded as both completed and blocked");
        self.state.checkpoint_at = Some(Utc::now());

        let io_err = |source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        };
        let body = serde_json::to_vec_pretty(&self.state).map_err(|source| {
            CheckpointError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;

        let tmp = self.path.with_extension("json.tmp");
        let mut file = File::create(&tmp).map_err(io_err)?;
        file.write_all(&body).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }

    fn disjoint(&self) -> bool {
        let completed: HashSet<&String> = self.state.completed_steps.iter().collect();
        self.state.blocked_steps.iter().all(|b| !completed.contains(b))
    }
}
