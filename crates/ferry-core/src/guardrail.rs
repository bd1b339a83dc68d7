//! Guardrail evaluation.
//!
//! Decides whether a step may proceed to generation. Pure over its inputs:
//! the verdict depends only on the step, the source text and the rule set,
//! and is recomputed for every step on every run.

use crate::boundary::lexically_escapes;
use crate::plan::{ConversionStep, Enforcement, GuardrailRule, GuardrailSet};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Outcome of evaluating a step against its guardrails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum GuardrailVerdict {
    /// The step may proceed
    Pass,

    /// The step cannot proceed without human judgment
    Ambiguous(String),

    /// The step's target escapes the output root
    OutOfBoundary(String),
}

impl GuardrailVerdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, GuardrailVerdict::Pass)
    }
}

/// A rule that matched without halting the step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardrailWarning {
    pub rule_id: String,
    pub detail: String,
}

/// Verdict plus any warning-level hits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardrailOutcome {
    pub verdict: GuardrailVerdict,
    pub warnings: Vec<GuardrailWarning>,
}

/// Evaluate `step` against `rules`, given the source text when it could be read.
///
/// Order: target lexical check, confidence floor, then each referenced rule in
/// step order. The first blocking hit decides the verdict.
pub fn evaluate(
    step: &ConversionStep,
    source_text: &str,
    rules: &GuardrailSet,
) -> GuardrailOutcome {
    let mut warnings = Vec::new();

    if lexically_escapes(&step.target) {
        return GuardrailOutcome {
            verdict: GuardrailVerdict::OutOfBoundary(format!(
                "target '{}' is absolute or climbs above the output root",
                step.target
            )),
            warnings,
        };
    }

    if let Some(confidence) = step.confidence {
        if confidence < rules.confidence_floor() {
            return GuardrailOutcome {
                verdict: GuardrailVerdict::Ambiguous(format!(
                    "planner confidence {:.2} is below the floor {:.2}",
                    confidence,
                    rules.confidence_floor()
                )),
                warnings,
            };
        }
    }

    for unknown in rules.unknown_references(step) {
        tracing::warn!(step_id = %step.id, rule_id = %unknown, "Step references unknown guardrail; skipping");
    }

    for rule in rules.applicable(step) {
        let Some(detail) = rule_hit(rule, source_text) else {
            continue;
        };

        match rule.enforcement {
            Enforcement::Blocking => {
                return GuardrailOutcome {
                    verdict: GuardrailVerdict::Ambiguous(format!("{}: {}", rule.id, detail)),
                    warnings,
                };
            }
            Enforcement::Warning => {
                tracing::warn!(step_id = %step.id, rule_id = %rule.id, detail = %detail, "Guardrail warning");
                warnings.push(GuardrailWarning {
                    rule_id: rule.id.clone(),
                    detail,
                });
            }
        }
    }

    GuardrailOutcome {
        verdict: GuardrailVerdict::Pass,
        warnings,
    }
}

/// Describe why `rule` matches the source, if it does.
fn rule_hit(rule: &GuardrailRule, source_text: &str) -> Option<String> {
    for library in &rule.flagged_libraries {
        if mentions_library(source_text, library) {
            return Some(format!("source uses flagged library '{}'", library));
        }
    }

    for pattern in &rule.halt_patterns {
        match RegexBuilder::new(pattern).multi_line(true).build() {
            Ok(re) => {
                if re.is_match(source_text) {
                    return Some(format!("source matches halt pattern '{}'", pattern));
                }
            }
            // An unusable pattern cannot clear the step.
            Err(e) => return Some(format!("halt pattern '{}' is invalid: {}", pattern, e)),
        }
    }

    None
}

/// Whole-word, case-sensitive mention of a library name.
fn mentions_library(source_text: &str, library: &str) -> bool {
    let library = library.trim();
    if library.is_empty() {
        return false;
    }
    let pattern = format!(r"(^|[^\w.-]){}($|[^\w-])", regex::escape(library));
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(source_text),
        Err(_) => source_text.contains(library),
    }
}
