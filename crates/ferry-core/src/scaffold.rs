//! Deterministic scaffold producers.
//!
//! A scaffold stands in for generated output when generation is disabled or
//! unavailable in an agent-attended run, and is handed to the generator as a
//! hint otherwise. Producers must be pure: same inputs, same text.

use crate::plan::{ConversionStep, GuardrailRule};

/// Produces scaffold text for a step.
pub trait ScaffoldProducer: Send + Sync {
    /// Name recorded in the journal when the scaffold is used.
    fn name(&self) -> &str;

    /// Scaffold for `step`, or `None` when this producer has nothing to offer.
    fn scaffold(
        &self,
        step: &ConversionStep,
        source_text: &str,
        rules: &[&GuardrailRule],
    ) -> Option<String>;
}

/// Echoes the source under a header naming the step and its constraints.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceEchoScaffold;

impl ScaffoldProducer for SourceEchoScaffold {
    fn name(&self) -> &str {
        "source-echo"
    }

    fn scaffold(
        &self,
        step: &ConversionStep,
        source_text: &str,
        rules: &[&GuardrailRule],
    ) -> Option<String> {
        if source_text.trim().is_empty() {
            return None;
        }

        let mut out = String::new();
        out.push_str(&format!("// SCAFFOLD: {} -> {}\n", step.source, step.target));
        out.push_str(&format!("// Step: {}\n", step.id));
        if let Some(mapping) = &step.mapping_id {
            out.push_str(&format!("// Mapping: {}\n", mapping));
        }
        if !step.rationale.is_empty() {
            out.push_str(&format!("// Rationale: {}\n", step.rationale));
        }
        for rule in rules {
            out.push_str(&format!("// {}\n", rule.constraint_line()));
        }
        out.push_str("// Generated without a model; review before use.\n\n");
        out.push_str(source_text);
        if !source_text.ends_with('\n') {
            out.push('\n');
        }

        Some(out)
    }
}

/// Never produces anything. Forces the ambiguous path when generation is unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoScaffold;

impl ScaffoldProducer for NoScaffold {
    fn name(&self) -> &str {
        "none"
    }

    fn scaffold(&self, _: &ConversionStep, _: &str, _: &[&GuardrailRule]) -> Option<String> {
        None
    }
}
