//! Runtime compiler for rule bundles.
//!
//! Transforms validated bundles into fast in-memory evaluators that
//! separate hard enforcement (deny/escalate/require/limit) from soft
//! preferences. Compilation never returns a partial result: either the
//! bundle is clean, or every problem comes back at once.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::canonical::bundle_digest;
use crate::model::{ConditionNode, Effect, Leaf, Operator, Rule, RuleBundle, resolve_path};
use crate::validator::{validate_bundle, Problem};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compiled forms
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(thiserror::Error, Debug)]
pub enum CompileError {
    #[error("rule bundle failed validation: {}", format_problems(.0))]
    Invalid(Vec<Problem>),
}

fn format_problems(problems: &[Problem]) -> String {
    problems
        .iter()
        .map(Problem::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A rule compiled for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule_id: String,
    pub precedence: i64,
    pub salience: i64,
    pub effect: Effect,
    pub explain_template: Option<String>,
    condition: CompiledCondition,
}

impl CompiledRule {
    /// Evaluate this rule's conditions against a context object.
    pub fn matches(&self, context: &Value) -> bool {
        self.condition.matches(context)
    }

    /// The explanation surfaced to callers: the rule's own template,
    /// falling back to the effect payload's.
    pub fn explanation(&self) -> Option<&str> {
        self.explain_template
            .as_deref()
            .or_else(|| self.effect.explain_template())
    }
}

/// A compiled policy: hard and soft rules, each sorted by
/// (precedence asc, salience desc, rule_id asc).
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    pub bundle_id: String,
    pub schema_version: String,
    pub hard_rules: Vec<CompiledRule>,
    pub soft_rules: Vec<CompiledRule>,
    /// SHA-256 of the canonical bundle encoding.
    pub digest: String,
    /// The bundle exactly as given; its canonical encoding equals the
    /// input's.
    pub source: Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Condition evaluation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
enum CompiledCondition {
    All(Vec<CompiledCondition>),
    Any(Vec<CompiledCondition>),
    NoneOf(Vec<CompiledCondition>),
    Not(Box<CompiledCondition>),
    Leaf(CompiledLeaf),
}

#[derive(Debug, Clone)]
struct CompiledLeaf {
    field: String,
    operator: Operator,
    value: Option<Value>,
    case_sensitive: bool,
    regex: Option<regex::Regex>,
}

impl CompiledCondition {
    fn matches(&self, context: &Value) -> bool {
        match self {
            CompiledCondition::All(children) => children.iter().all(|c| c.matches(context)),
            CompiledCondition::Any(children) => children.iter().any(|c| c.matches(context)),
            CompiledCondition::NoneOf(children) => !children.iter().any(|c| c.matches(context)),
            CompiledCondition::Not(child) => !child.matches(context),
            CompiledCondition::Leaf(leaf) => leaf.matches(context),
        }
    }
}

impl CompiledLeaf {
    fn matches(&self, context: &Value) -> bool {
        let candidate = resolve_path(context, &self.field);

        match self.operator {
            Operator::IsNull => return candidate.is_none(),
            Operator::IsNotNull => return candidate.is_some(),
            _ => {}
        }

        // Any comparison against a missing/null candidate fails.
        let Some(candidate) = candidate else {
            return false;
        };

        if self.operator == Operator::Regex {
            let text = stringify(candidate);
            return self
                .regex
                .as_ref()
                .is_some_and(|re| re.is_match(&text));
        }

        let Some(value) = self.value.as_ref() else {
            return false;
        };

        match self.operator {
            Operator::Equals => self.eq_values(candidate, value),
            Operator::NotEquals => !self.eq_values(candidate, value),
            Operator::GreaterThan => compare(candidate, value).is_some_and(|o| o.is_gt()),
            Operator::GreaterOrEqual => compare(candidate, value).is_some_and(|o| o.is_ge()),
            Operator::LessThan => compare(candidate, value).is_some_and(|o| o.is_lt()),
            Operator::LessOrEqual => compare(candidate, value).is_some_and(|o| o.is_le()),
            Operator::Contains => stringify(candidate).contains(&stringify(value)),
            Operator::NotContains => !stringify(candidate).contains(&stringify(value)),
            Operator::StartsWith => stringify(candidate).starts_with(&stringify(value)),
            Operator::EndsWith => stringify(candidate).ends_with(&stringify(value)),
            Operator::In => coerce_iter(value).iter().any(|v| *v == candidate),
            Operator::NotIn => !coerce_iter(value).iter().any(|v| *v == candidate),
            Operator::Between => match value.as_array() {
                Some(bounds) if bounds.len() == 2 => {
                    compare(candidate, &bounds[0]).is_some_and(|o| o.is_ge())
                        && compare(candidate, &bounds[1]).is_some_and(|o| o.is_le())
                }
                _ => false,
            },
            Operator::IsNull | Operator::IsNotNull | Operator::Regex => unreachable!(),
        }
    }

    fn eq_values(&self, candidate: &Value, value: &Value) -> bool {
        if let (Some(c), Some(v)) = (candidate.as_str(), value.as_str()) {
            if !self.case_sensitive {
                return c.to_lowercase() == v.to_lowercase();
            }
            return c == v;
        }
        // Numeric equality across integer/float representations.
        if let (Some(c), Some(v)) = (candidate.as_f64(), value.as_f64()) {
            return c == v;
        }
        candidate == value
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compare(candidate: &Value, value: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(c), Some(v)) = (candidate.as_f64(), value.as_f64()) {
        return c.partial_cmp(&v);
    }
    if let (Some(c), Some(v)) = (candidate.as_str(), value.as_str()) {
        return Some(c.cmp(v));
    }
    None
}

fn coerce_iter(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn compile_condition(node: &ConditionNode) -> CompiledCondition {
    match node {
        ConditionNode::All { all } => {
            CompiledCondition::All(all.iter().map(compile_condition).collect())
        }
        ConditionNode::Any { any } => {
            CompiledCondition::Any(any.iter().map(compile_condition).collect())
        }
        ConditionNode::None { none } => {
            CompiledCondition::NoneOf(none.iter().map(compile_condition).collect())
        }
        ConditionNode::Not { not } => CompiledCondition::Not(Box::new(compile_condition(not))),
        ConditionNode::Leaf(leaf) => CompiledCondition::Leaf(compile_leaf(leaf)),
    }
}

fn compile_leaf(leaf: &Leaf) -> CompiledLeaf {
    let regex = match (leaf.operator, leaf.value.as_ref().and_then(Value::as_str)) {
        (Operator::Regex, Some(pattern)) => regex::RegexBuilder::new(pattern)
            .case_insensitive(!leaf.case_sensitive)
            .build()
            .ok(),
        _ => None,
    };

    // Lowercase string equality operands once, at compile time.
    let value = match (leaf.operator, &leaf.value) {
        (Operator::Equals | Operator::NotEquals, Some(Value::String(s)))
            if !leaf.case_sensitive =>
        {
            Some(Value::String(s.to_lowercase()))
        }
        _ => leaf.value.clone(),
    };

    CompiledLeaf {
        field: leaf.field.clone(),
        operator: leaf.operator,
        value,
        case_sensitive: leaf.case_sensitive,
        regex,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compiler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Compile rule bundles into runtime evaluators, cached by digest.
#[derive(Default)]
pub struct PolicyCompiler {
    cache: RwLock<HashMap<String, Arc<CompiledPolicy>>>,
}

impl PolicyCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a bundle, or return every validation problem.
    pub fn compile(&self, bundle: &Value) -> Result<CompiledPolicy, CompileError> {
        let problems = validate_bundle(bundle);
        if !problems.is_empty() {
            return Err(CompileError::Invalid(problems));
        }

        // Shape is clean; the typed parse cannot fail now.
        let typed: RuleBundle = serde_json::from_value(bundle.clone())
            .map_err(|e| CompileError::Invalid(vec![Problem::new("<root>", e.to_string())]))?;

        let mut hard = Vec::new();
        let mut soft = Vec::new();
        for rule in &typed.rules {
            let compiled = compile_rule(rule);
            if compiled.effect.is_hard() {
                hard.push(compiled);
            } else {
                soft.push(compiled);
            }
        }
        sort_rules(&mut hard);
        sort_rules(&mut soft);

        Ok(CompiledPolicy {
            bundle_id: typed.bundle_id,
            schema_version: typed.schema_version,
            hard_rules: hard,
            soft_rules: soft,
            digest: bundle_digest(bundle),
            source: bundle.clone(),
        })
    }

    /// Digest-keyed compile: a bundle already compiled in this process
    /// is returned from cache without re-walking it.
    pub fn get_or_compile(&self, bundle: &Value) -> Result<Arc<CompiledPolicy>, CompileError> {
        let digest = bundle_digest(bundle);
        if let Some(hit) = self.cache.read().get(&digest) {
            return Ok(hit.clone());
        }

        let compiled = Arc::new(self.compile(bundle)?);
        self.cache
            .write()
            .insert(digest, compiled.clone());
        Ok(compiled)
    }

    /// Drop all cached policies. Test hook.
    pub fn flush(&self) {
        self.cache.write().clear();
    }
}

fn compile_rule(rule: &Rule) -> CompiledRule {
    let condition = match &rule.conditions {
        Some(node) => compile_condition(node),
        // No conditions: matches everything.
        None => CompiledCondition::All(Vec::new()),
    };

    CompiledRule {
        rule_id: rule.rule_id.clone(),
        precedence: rule.precedence,
        salience: rule.salience,
        effect: rule.effect.clone(),
        explain_template: rule.explain_template.clone(),
        condition,
    }
}

fn sort_rules(rules: &mut [CompiledRule]) {
    rules.sort_by(|a, b| {
        a.precedence
            .cmp(&b.precedence)
            .then(b.salience.cmp(&a.salience))
            .then(a.rule_id.cmp(&b.rule_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bundle(rules: Vec<Value>) -> Value {
        json!({
            "schema_version": "1.0.0",
            "bundle_id": "b1",
            "rules": rules,
        })
    }

    fn deny_rule(id: &str, precedence: i64, salience: i64) -> Value {
        json!({
            "rule_id": id,
            "precedence": precedence,
            "salience": salience,
            "effect": {"type": "DENY"},
        })
    }

    #[test]
    fn partition_union_equals_bundle() {
        let b = bundle(vec![
            deny_rule("r1", 1, 0),
            json!({
                "rule_id": "r2",
                "precedence": 2,
                "effect": {"type": "ADJUST_SCORE", "delta": -5.0},
            }),
            json!({
                "rule_id": "r3",
                "precedence": 3,
                "effect": {"type": "WARN", "message": "note"},
            }),
            json!({
                "rule_id": "r4",
                "precedence": 4,
                "effect": {"type": "LIMIT_OCCURRENCE", "window_seconds": 86400, "max_occurrences": 5},
            }),
        ]);
        let policy = PolicyCompiler::new().compile(&b).unwrap();
        let mut ids: Vec<&str> = policy
            .hard_rules
            .iter()
            .chain(&policy.soft_rules)
            .map(|r| r.rule_id.as_str())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["r1", "r2", "r3", "r4"]);
        assert_eq!(policy.hard_rules.len(), 2);
        assert_eq!(policy.soft_rules.len(), 2);
    }

    #[test]
    fn hard_rules_sorted_by_precedence_salience_id() {
        let b = bundle(vec![
            deny_rule("zz", 5, 0),
            deny_rule("aa", 5, 9),
            deny_rule("mm", 1, 0),
        ]);
        // Duplicate precedence fails validation, so salience/id tie-break
        // is exercised through a bundle that skips validation.
        let problems = validate_bundle(&b);
        assert!(!problems.is_empty());

        let typed: RuleBundle = serde_json::from_value(b).unwrap();
        let mut compiled: Vec<CompiledRule> = typed.rules.iter().map(compile_rule).collect();
        sort_rules(&mut compiled);
        let ids: Vec<&str> = compiled.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["mm", "aa", "zz"]);
    }

    #[test]
    fn ordering_is_deterministic_across_compiles() {
        let b = bundle(vec![
            deny_rule("r3", 30, 0),
            deny_rule("r1", 10, 0),
            deny_rule("r2", 20, 0),
        ]);
        let compiler = PolicyCompiler::new();
        let first: Vec<String> = compiler
            .compile(&b)
            .unwrap()
            .hard_rules
            .iter()
            .map(|r| r.rule_id.clone())
            .collect();
        let second: Vec<String> = compiler
            .compile(&b)
            .unwrap()
            .hard_rules
            .iter()
            .map(|r| r.rule_id.clone())
            .collect();
        assert_eq!(first, second);
        assert_eq!(first, vec!["r1", "r2", "r3"]);
    }

    #[test]
    fn invalid_bundle_reports_all_problems() {
        let b = bundle(vec![deny_rule("r1", 1, 0), deny_rule("r1", 1, 0)]);
        let err = PolicyCompiler::new().compile(&b).unwrap_err();
        let CompileError::Invalid(problems) = err;
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn source_survives_compilation_byte_for_byte() {
        let b = bundle(vec![deny_rule("r1", 1, 0)]);
        let policy = PolicyCompiler::new().compile(&b).unwrap();
        assert_eq!(
            crate::canonical::canonical_json(&policy.source),
            crate::canonical::canonical_json(&b)
        );
    }

    #[test]
    fn cache_returns_same_arc_for_same_digest() {
        let b = bundle(vec![deny_rule("r1", 1, 0)]);
        let compiler = PolicyCompiler::new();
        let first = compiler.get_or_compile(&b).unwrap();
        let second = compiler.get_or_compile(&b).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    // ── leaf semantics ────────────────────────────────────────────

    fn eval(leaf: Value, context: Value) -> bool {
        let node: ConditionNode = serde_json::from_value(leaf).unwrap();
        compile_condition(&node).matches(&context)
    }

    #[test]
    fn equals_is_case_insensitive_when_asked() {
        let leaf = json!({"field": "doctor", "operator": "equals", "value": "Shtern", "case_sensitive": false});
        assert!(eval(leaf.clone(), json!({"doctor": "SHTERN"})));
        let strict = json!({"field": "doctor", "operator": "equals", "value": "Shtern"});
        assert!(!eval(strict, json!({"doctor": "SHTERN"})));
    }

    #[test]
    fn null_candidate_fails_every_comparison_except_is_null() {
        let ctx = json!({"slot": {}});
        assert!(!eval(
            json!({"field": "slot.score", "operator": "greater_than", "value": 1}),
            ctx.clone()
        ));
        assert!(eval(
            json!({"field": "slot.score", "operator": "is_null"}),
            ctx.clone()
        ));
        assert!(!eval(
            json!({"field": "slot.score", "operator": "is_not_null"}),
            ctx
        ));
    }

    #[test]
    fn between_and_in_operators() {
        let ctx = json!({"hour": 14, "dow": "tue"});
        assert!(eval(
            json!({"field": "hour", "operator": "between", "value": [9, 18]}),
            ctx.clone()
        ));
        assert!(!eval(
            json!({"field": "hour", "operator": "between", "value": [15, 18]}),
            ctx.clone()
        ));
        assert!(eval(
            json!({"field": "dow", "operator": "in", "value": ["mon", "tue"]}),
            ctx.clone()
        ));
        assert!(eval(
            json!({"field": "dow", "operator": "not_in", "value": ["sat", "sun"]}),
            ctx
        ));
    }

    #[test]
    fn regex_honors_case_sensitivity_flag() {
        let ctx = json!({"service": "Deep Cleaning"});
        assert!(eval(
            json!({"field": "service", "operator": "regex", "value": "cleaning", "case_sensitive": false}),
            ctx.clone()
        ));
        assert!(!eval(
            json!({"field": "service", "operator": "regex", "value": "cleaning"}),
            ctx
        ));
    }

    #[test]
    fn empty_all_matches_everything() {
        let b = bundle(vec![json!({
            "rule_id": "r1",
            "precedence": 1,
            "conditions": {"all": []},
            "effect": {"type": "DENY"},
        })]);
        let policy = PolicyCompiler::new().compile(&b).unwrap();
        assert!(policy.hard_rules[0].matches(&json!({})));
    }
}
