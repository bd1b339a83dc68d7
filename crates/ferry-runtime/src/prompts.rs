//! Prompts for code-conversion calls.
//!
//! The system prompt carries the applicable guardrail rules as hard
//! constraints plus a summary of the target stack. The user message carries
//! one step: ids, paths, rationale, an optional scaffold hint and the source.

use ferry_core::{ConversionStep, GuardrailRule};

/// Prefix a model uses to refuse a step it cannot convert faithfully.
pub const AMBIGUOUS_PREFIX: &str = "AMBIGUOUS:";

/// Target stack summary used when the plan does not name one.
pub const DEFAULT_TARGET_STACK: &str = "the target language and framework implied by the target file path";

/// Base system prompt. `{rules_text}` and `{target_stack_summary}` are filled per step.
pub const CONVERSION_SYSTEM_PROMPT: &str = r#"
You are a code conversion agent executing one step of an approved migration plan.

Convert the source file you are given into the target stack. Preserve behaviour.
Do not add features, rename public interfaces, or restructure beyond what the
step describes.

## Constraints (mandatory)
{rules_text}

## Target stack
{target_stack_summary}

## When you cannot comply
If the source cannot be converted without guessing, or converting it would break
a constraint above, reply with a single line starting with "AMBIGUOUS:" followed
by the reason. Do not output partial code in that case.

## Output
Output only the converted file contents. No markdown fences, no commentary.
"#;

/// Render the applicable rules, one per line.
pub fn rules_text(rules: &[&GuardrailRule]) -> String {
    if rules.is_empty() {
        return "- (no additional rules for this step)".to_string();
    }
    rules
        .iter()
        .map(|rule| rule.constraint_line())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the system prompt for one step.
pub fn system_prompt(rules: &[&GuardrailRule], target_stack: Option<&str>) -> String {
    CONVERSION_SYSTEM_PROMPT
        .replace("{rules_text}", &rules_text(rules))
        .replace(
            "{target_stack_summary}",
            target_stack.unwrap_or(DEFAULT_TARGET_STACK),
        )
        .trim()
        .to_string()
}

/// Build the user message for one step.
pub fn user_message(step: &ConversionStep, source_text: &str, scaffold_hint: Option<&str>) -> String {
    let mut message = format!(
        "Convert the following source file to the target stack.\n\
         Conversion Step: {}\n\
         Source file: `{}`\n\
         Target file: `{}`\n\
         Rationale: {}\n",
        step.id, step.source, step.target, step.rationale
    );

    if let Some(hint) = scaffold_hint.filter(|h| !h.trim().is_empty()) {
        let origin = step.mapping_id.as_deref().unwrap_or("scaffold");
        message.push_str(&format!("\nSCAFFOLD HINT (from {}):\n```\n{}\n```\n", origin, hint));
    }

    message.push_str(&format!(
        "\nSOURCE CODE:\n```\n{}\n```\n\nOutput ONLY the converted code. No markdown fences.",
        source_text
    ));
    message
}

/// If the response is an ambiguity refusal, the reason after the prefix.
pub fn ambiguity_reason(response: &str) -> Option<String> {
    let trimmed = response.trim_start();
    let head = trimmed.get(..AMBIGUOUS_PREFIX.len())?;
    if head.eq_ignore_ascii_case(AMBIGUOUS_PREFIX) {
        Some(trimmed[AMBIGUOUS_PREFIX.len()..].trim().to_string())
    } else {
        None
    }
}

/// Remove a single enclosing markdown fence, if the model added one anyway.
pub fn strip_code_fence(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (```rust) on the opening line.
    match body.split_once('\n') {
        Some((_, code)) => code.trim_end(),
        None => trimmed,
    }
}
