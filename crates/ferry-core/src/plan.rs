//! Conversion plans and guardrail rule sets.
//!
//! Plans are produced upstream by the scoping/planning collaborator and handed
//! to ferry read-only. This module parses them from YAML/JSON and checks the
//! structural invariants the engine relies on.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur when loading plans or guardrail sets.
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Failed to read plan file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Duplicate step ID: {0}")]
    DuplicateStepId(String),

    #[error("Duplicate guardrail ID: {0}")]
    DuplicateRuleId(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Confidence floor must be within 0.0..=1.0, got {0}")]
    InvalidConfidenceFloor(f64),
}

/// A single conversion step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionStep {
    /// Stable identifier, unique within a plan (e.g., "A1", "Step B2")
    pub id: String,

    /// Human-readable description of the step
    #[serde(default)]
    pub description: String,

    /// Source file, relative to the plan's feature root
    #[serde(alias = "source_file")]
    pub source: String,

    /// Target file, relative to the plan's output root
    #[serde(alias = "target_file")]
    pub target: String,

    /// Component mapping used to pick a scaffold template
    #[serde(default)]
    pub mapping_id: Option<String>,

    /// Guardrail rules that apply to this step
    #[serde(default, alias = "rule_ids")]
    pub rules: Vec<String>,

    /// Why the planner chose this conversion
    #[serde(default)]
    pub rationale: String,

    /// Planner confidence (0.0 - 1.0), compared with the confidence floor
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// A conversion plan: ordered steps plus the declared roots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Feature being converted
    pub feature_name: String,

    /// Source root the step sources are relative to
    pub feature_root: PathBuf,

    /// Output boundary; nothing may be written outside it
    pub output_root: PathBuf,

    /// Short description of the target stack, injected into prompts
    #[serde(default)]
    pub target_stack: Option<String>,

    /// Ordered conversion steps
    #[serde(default)]
    pub conversion_steps: Vec<ConversionStep>,
}

impl Plan {
    /// Parse a plan from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, PlanError> {
        let plan: Plan = serde_yaml::from_str(yaml)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Parse a plan from JSON string.
    pub fn from_json(json: &str) -> Result<Self, PlanError> {
        let plan: Plan = serde_json::from_str(json)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Load a plan file, picking the format from its extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PlanError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        if is_json(path) {
            Self::from_json(&contents)
        } else {
            Self::from_yaml(&contents)
        }
    }

    /// Ids of every step, in plan order.
    pub fn step_ids(&self) -> Vec<String> {
        self.conversion_steps.iter().map(|s| s.id.clone()).collect()
    }

    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&ConversionStep> {
        self.conversion_steps.iter().find(|s| s.id == id)
    }

    fn validate(&self) -> Result<(), PlanError> {
        if self.feature_name.is_empty() {
            return Err(PlanError::MissingField("feature_name".to_string()));
        }

        let mut seen = HashSet::new();
        for step in &self.conversion_steps {
            if step.id.trim().is_empty() {
                return Err(PlanError::MissingField("conversion_steps[].id".to_string()));
            }
            if step.target.is_empty() {
                return Err(PlanError::MissingField(format!(
                    "conversion_steps[{}].target",
                    step.id
                )));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(PlanError::DuplicateStepId(step.id.clone()));
            }
        }

        Ok(())
    }
}

/// A plan that has passed the approval gate.
///
/// Only [`crate::approval::ApprovalGate`] can construct one, so the engine
/// cannot be handed a plan that was rejected or is still pending.
#[derive(Debug, Clone)]
pub struct ApprovedPlan {
    plan: Plan,
    approved_via: &'static str,
}

impl ApprovedPlan {
    pub(crate) fn new(plan: Plan, approved_via: &'static str) -> Self {
        Self { plan, approved_via }
    }

    /// The approved plan.
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Name of the approval strategy that signed off.
    pub fn approved_via(&self) -> &'static str {
        self.approved_via
    }
}

impl std::ops::Deref for ApprovedPlan {
    type Target = Plan;

    fn deref(&self) -> &Plan {
        &self.plan
    }
}

/// How strictly a guardrail is enforced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Enforcement {
    /// A hit halts the step as ambiguous
    #[default]
    Blocking,

    /// A hit is logged and the step proceeds
    Warning,
}

/// A guardrail rule as resolved by the config collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuardrailRule {
    /// Unique identifier (e.g., "RULE-003")
    pub id: String,

    /// Human label
    #[serde(default)]
    pub name: String,

    /// Constraint text handed to the generator
    #[serde(default)]
    pub description: String,

    /// Enforcement severity
    #[serde(default)]
    pub enforcement: Enforcement,

    /// Layers this rule applies to (informational)
    #[serde(default)]
    pub applies_to: Vec<String>,

    /// Libraries whose presence in a source halts the step
    #[serde(default)]
    pub flagged_libraries: Vec<String>,

    /// Regexes whose match in a source halts the step
    #[serde(default)]
    pub halt_patterns: Vec<String>,
}

impl GuardrailRule {
    /// Render the rule as a single constraint line.
    pub fn constraint_line(&self) -> String {
        let label = if self.name.is_empty() { "unnamed" } else { &self.name };
        format!("- {} ({}): {}", self.id, label, self.description)
    }
}

fn default_confidence_floor() -> f64 {
    0.7
}

#[derive(Debug, Clone, Deserialize)]
struct GuardrailFile {
    #[serde(default)]
    guardrails: Vec<GuardrailRule>,

    #[serde(default)]
    ambiguity_thresholds: Option<Thresholds>,

    #[serde(default)]
    confidence_floor: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct Thresholds {
    confidence_floor: f64,
}

/// Guardrail rules keyed by id, plus the confidence floor.
#[derive(Debug, Clone)]
pub struct GuardrailSet {
    rules: BTreeMap<String, GuardrailRule>,
    confidence_floor: f64,
}

impl Default for GuardrailSet {
    fn default() -> Self {
        Self {
            rules: BTreeMap::new(),
            confidence_floor: default_confidence_floor(),
        }
    }
}

impl GuardrailSet {
    /// Build a set from rules, rejecting duplicate ids.
    pub fn new(
        rules: impl IntoIterator<Item = GuardrailRule>,
        confidence_floor: f64,
    ) -> Result<Self, PlanError> {
        if !(0.0..=1.0).contains(&confidence_floor) {
            return Err(PlanError::InvalidConfidenceFloor(confidence_floor));
        }

        let mut map = BTreeMap::new();
        for rule in rules {
            if map.contains_key(&rule.id) {
                return Err(PlanError::DuplicateRuleId(rule.id));
            }
            map.insert(rule.id.clone(), rule);
        }

        Ok(Self {
            rules: map,
            confidence_floor,
        })
    }

    /// Parse a rules file (YAML or JSON by extension).
    ///
    /// Accepts either a top-level `confidence_floor` or the
    /// `ambiguity_thresholds.confidence_floor` layout.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PlanError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let file: GuardrailFile = if is_json(path) {
            serde_json::from_str(&contents)?
        } else {
            serde_yaml::from_str(&contents)?
        };

        let floor = file
            .confidence_floor
            .or(file.ambiguity_thresholds.map(|t| t.confidence_floor))
            .unwrap_or_else(default_confidence_floor);

        Self::new(file.guardrails, floor)
    }

    /// Rules referenced by a step that exist in this set, in step order.
    pub fn applicable(&self, step: &ConversionStep) -> Vec<&GuardrailRule> {
        step.rules.iter().filter_map(|id| self.rules.get(id)).collect()
    }

    /// Referenced rule ids that this set does not know.
    pub fn unknown_references<'a>(&self, step: &'a ConversionStep) -> Vec<&'a str> {
        step.rules
            .iter()
            .filter(|id| !self.rules.contains_key(*id))
            .map(String::as_str)
            .collect()
    }

    /// Look up a rule.
    pub fn get(&self, id: &str) -> Option<&GuardrailRule> {
        self.rules.get(id)
    }

    pub fn confidence_floor(&self) -> f64 {
        self.confidence_floor
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_PLAN: &str = r#"
feature_name: "ActionHistory"
feature_root: "/src/action-history"
output_root: "/out"
conversion_steps:
  - id: "A1"
    source_file: "list.component.ts"
    target_file: "ActionHistoryList.tsx"
    rule_ids: ["RULE-001", "RULE-003"]
    rationale: "Component maps to a page"
  - id: "B1"
    source: "history.service.ts"
    target: "api/history.py"
"#;

    #[test]
    fn test_parse_valid_plan() {
        let plan = Plan::from_yaml(VALID_PLAN).unwrap();
        assert_eq!(plan.feature_name, "ActionHistory");
        assert_eq!(plan.conversion_steps.len(), 2);
        assert_eq!(plan.conversion_steps[0].source, "list.component.ts");
        assert_eq!(plan.conversion_steps[0].rules, vec!["RULE-001", "RULE-003"]);
        assert_eq!(plan.step_ids(), vec!["A1", "B1"]);
        assert!(plan.step("B1").is_some());
    }

    #[test]
    fn test_duplicate_step_ids() {
        let yaml = r#"
feature_name: "F"
feature_root: "/src"
output_root: "/out"
conversion_steps:
  - { id: "A1", source: "a", target: "a" }
  - { id: "A1", source: "b", target: "b" }
"#;
        assert!(matches!(
            Plan::from_yaml(yaml),
            Err(PlanError::DuplicateStepId(id)) if id == "A1"
        ));
    }

    #[test]
    fn test_empty_target_rejected() {
        let json = r#"{
            "feature_name": "F",
            "feature_root": "/src",
            "output_root": "/out",
            "conversion_steps": [{"id": "A1", "source": "a", "target": ""}]
        }"#;
        assert!(matches!(Plan::from_json(json), Err(PlanError::MissingField(_))));
    }

    #[test]
    fn test_guardrail_set_lookup() {
        let rules = vec![
            GuardrailRule {
                id: "RULE-001".to_string(),
                name: "Typed models".to_string(),
                description: "Use typed models".to_string(),
                enforcement: Enforcement::Blocking,
                applies_to: vec!["all".to_string()],
                flagged_libraries: vec![],
                halt_patterns: vec![],
            },
        ];
        let set = GuardrailSet::new(rules, 0.8).unwrap();
        let plan = Plan::from_yaml(VALID_PLAN).unwrap();
        let step = &plan.conversion_steps[0];

        assert_eq!(set.applicable(step).len(), 1);
        assert_eq!(set.unknown_references(step), vec!["RULE-003"]);
        assert_eq!(set.confidence_floor(), 0.8);
        assert!(set.get("RULE-001").unwrap().constraint_line().contains("Typed models"));
    }

    #[test]
    fn test_guardrail_set_rejects_bad_floor() {
        assert!(matches!(
            GuardrailSet::new(Vec::new(), 1.5),
            Err(PlanError::InvalidConfidenceFloor(_))
        ));
    }

    #[test]
    fn test_guardrail_file_threshold_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.yaml");
        fs::write(
            &path,
            r#"
ambiguity_thresholds:
  confidence_floor: 0.6
guardrails:
  - id: "RULE-008"
    name: "External library halt"
    description: "Halt on unmapped libraries"
    flagged_libraries: ["ngx-charts"]
"#,
        )
        .unwrap();

        let set = GuardrailSet::from_file(&path).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.confidence_floor(), 0.6);
        assert_eq!(set.get("RULE-008").unwrap().enforcement, Enforcement::Blocking);
    }
}
