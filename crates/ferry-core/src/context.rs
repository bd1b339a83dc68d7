//! Execution-context detection.
//!
//! Works out whether a person or a coding agent is driving the run. The
//! failure policy uses the answer to decide whether a missing backend is fatal.

use crate::env::EnvSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Who is attending the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionContext {
    /// A person at a terminal
    HumanAttended,

    /// An IDE or coding agent; `agent` is its label (e.g., "cursor")
    AgentAttended { agent: String },

    /// No signal either way
    Undetermined,
}

impl ExecutionContext {
    pub fn is_agent(&self) -> bool {
        matches!(self, ExecutionContext::AgentAttended { .. })
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionContext::HumanAttended => write!(f, "human"),
            ExecutionContext::AgentAttended { agent } => write!(f, "agent:{}", agent),
            ExecutionContext::Undetermined => write!(f, "undetermined"),
        }
    }
}

/// Explicit context override from `--context` or `FERRY_CONTEXT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextOverride {
    Human,
    Agent,
}

impl FromStr for ContextOverride {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "human" => Ok(ContextOverride::Human),
            "agent" => Ok(ContextOverride::Agent),
            other => Err(format!("unknown context '{}': expected human or agent", other)),
        }
    }
}

/// Environment signals, checked in order: (variable, required value or any, label).
const AGENT_ENV_SIGNALS: &[(&str, Option<&str>, &str)] = &[
    ("AI_AGENT_MODE", Some("1"), "generic-agent"),
    ("CURSOR_AGENT", Some("1"), "cursor"),
    ("CURSOR_CLI", None, "cursor"),
    ("WINDSURF_AGENT", Some("1"), "windsurf"),
    ("COPILOT_AGENT", Some("1"), "copilot"),
    ("TERM_PROGRAM", Some("cursor"), "cursor"),
    ("TERM_PROGRAM", Some("windsurf"), "windsurf"),
];

/// Parent-process name keywords and the agent label they imply.
const PARENT_PROCESS_KEYWORDS: &[(&str, &str)] = &[
    ("cursor", "cursor"),
    ("windsurf", "windsurf"),
    ("copilot", "copilot"),
    ("code", "vscode"),
];

/// Source of the parent process name.
pub trait ProcessProbe {
    /// Name of the parent process, or `None` when it cannot be determined.
    fn parent_process_name(&self) -> Option<String>;
}

/// Reads `/proc/<ppid>/comm`. Yields `None` on any failure or non-Linux host.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcfsProbe;

impl ProcessProbe for ProcfsProbe {
    fn parent_process_name(&self) -> Option<String> {
        let ppid = parent_pid()?;
        let comm = std::fs::read_to_string(format!("/proc/{}/comm", ppid)).ok()?;
        let name = comm.trim();
        (!name.is_empty()).then(|| name.to_string())
    }
}

fn parent_pid() -> Option<u32> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("PPid:"))
        .and_then(|v| v.trim().parse().ok())
}

/// A probe that never finds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProbe;

impl ProcessProbe for NoProbe {
    fn parent_process_name(&self) -> Option<String> {
        None
    }
}

/// Detect the execution context.
///
/// Priority: explicit override, then `FERRY_CONTEXT`, then environment
/// signals, then the parent process name. No signal yields `Undetermined`.
pub fn detect_context(
    explicit: Option<ContextOverride>,
    env: &EnvSnapshot,
    probe: &dyn ProcessProbe,
) -> ExecutionContext {
    let from_env_override = env.get("FERRY_CONTEXT").and_then(|raw| {
        raw.parse::<ContextOverride>()
            .map_err(|e| tracing::warn!(error = %e, "Ignoring FERRY_CONTEXT"))
            .ok()
    });

    match explicit.or(from_env_override) {
        Some(ContextOverride::Human) => return ExecutionContext::HumanAttended,
        Some(ContextOverride::Agent) => {
            let agent = agent_from_env(env)
                .unwrap_or("generic-agent")
                .to_string();
            return ExecutionContext::AgentAttended { agent };
        }
        None => {}
    }

    if let Some(label) = agent_from_env(env) {
        return ExecutionContext::AgentAttended {
            agent: label.to_string(),
        };
    }

    if let Some(label) = probe.parent_process_name().and_then(|n| agent_from_process(&n)) {
        return ExecutionContext::AgentAttended {
            agent: label.to_string(),
        };
    }

    ExecutionContext::Undetermined
}

fn agent_from_env(env: &EnvSnapshot) -> Option<&'static str> {
    AGENT_ENV_SIGNALS
        .iter()
        .find(|(var, required, _)| match (env.get(var), required) {
            (Some(_), None) => true,
            (Some(actual), Some(required)) => actual == *required,
            (None, _) => false,
        })
        .map(|(_, _, label)| *label)
}

fn agent_from_process(name: &str) -> Option<&'static str> {
    let name = name.to_lowercase();
    PARENT_PROCESS_KEYWORDS
        .iter()
        .find(|(keyword, _)| name.contains(keyword))
        .map(|(_, label)| *label)
}
