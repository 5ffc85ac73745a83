use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bundle & rules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A declarative rule bundle authored for one clinic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleBundle {
    pub schema_version: String,
    pub bundle_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinic_id: Option<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Fields outside the core shape (description, generated_at, …)
    /// survive a round trip so the canonical digest covers them.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    pub precedence: i64,
    #[serde(default)]
    pub salience: i64,
    /// Absent conditions mean "matches everything".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<ConditionNode>,
    pub effect: Effect,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explain_template: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Effects
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Rule effect. DENY / ESCALATE / REQUIRE_FIELD / LIMIT_OCCURRENCE are
/// hard (enforced by the gate); ADJUST_SCORE / WARN are soft (scoring).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Effect {
    #[serde(rename = "DENY")]
    Deny {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason_code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explain_template: Option<String>,
    },
    #[serde(rename = "ESCALATE")]
    Escalate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason_code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explain_template: Option<String>,
    },
    #[serde(rename = "REQUIRE_FIELD")]
    RequireField {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explain_template: Option<String>,
    },
    #[serde(rename = "LIMIT_OCCURRENCE")]
    LimitOccurrence {
        /// Counter key template; `{clinic_id}` / `{patient_id}` /
        /// `{doctor_id}` placeholders are filled at reserve time.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        window_seconds: u64,
        max_occurrences: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explain_template: Option<String>,
    },
    #[serde(rename = "ADJUST_SCORE")]
    AdjustScore {
        delta: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explain_template: Option<String>,
    },
    #[serde(rename = "WARN")]
    Warn {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explain_template: Option<String>,
    },
}

impl Effect {
    pub fn is_hard(&self) -> bool {
        matches!(
            self,
            Effect::Deny { .. }
                | Effect::Escalate { .. }
                | Effect::RequireField { .. }
                | Effect::LimitOccurrence { .. }
        )
    }

    pub fn explain_template(&self) -> Option<&str> {
        match self {
            Effect::Deny { explain_template, .. }
            | Effect::Escalate { explain_template, .. }
            | Effect::RequireField { explain_template, .. }
            | Effect::LimitOccurrence { explain_template, .. }
            | Effect::AdjustScore { explain_template, .. }
            | Effect::Warn { explain_template, .. } => explain_template.as_deref(),
        }
    }

    /// The wire name of the effect type.
    pub fn kind(&self) -> &'static str {
        match self {
            Effect::Deny { .. } => "DENY",
            Effect::Escalate { .. } => "ESCALATE",
            Effect::RequireField { .. } => "REQUIRE_FIELD",
            Effect::LimitOccurrence { .. } => "LIMIT_OCCURRENCE",
            Effect::AdjustScore { .. } => "ADJUST_SCORE",
            Effect::Warn { .. } => "WARN",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conditions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Conditions tree: boolean combinators over leaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionNode {
    All { all: Vec<ConditionNode> },
    Any { any: Vec<ConditionNode> },
    None { none: Vec<ConditionNode> },
    Not { not: Box<ConditionNode> },
    Leaf(Leaf),
}

/// A leaf comparison against a dotted context path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leaf {
    pub field: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default = "d_true")]
    pub case_sensitive: bool,
}

fn d_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    Between,
    IsNull,
    IsNotNull,
    Regex,
}

impl Operator {
    pub const ALL: &'static [&'static str] = &[
        "equals",
        "not_equals",
        "greater_than",
        "greater_or_equal",
        "less_than",
        "less_or_equal",
        "contains",
        "not_contains",
        "starts_with",
        "ends_with",
        "in",
        "not_in",
        "between",
        "is_null",
        "is_not_null",
        "regex",
    ];
}

/// Resolve a dotted path against a context object. Missing intermediate
/// keys resolve to `None`.
pub fn resolve_path<'a>(context: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = context;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}
