//! Rule bundle validation.
//!
//! Shape checks first (the typed equivalent of the schema pass), then
//! semantic checks. Every problem found is accumulated; callers never
//! see only the first failure.

use std::collections::HashMap;

use serde_json::Value;

use crate::model::Operator;

/// One validation issue, addressed by its JSON location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub location: String,
    pub message: String,
}

impl Problem {
    pub fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// Validate an in-memory bundle and return every issue discovered.
pub fn validate_bundle(bundle: &Value) -> Vec<Problem> {
    let mut problems = Vec::new();

    let Some(root) = bundle.as_object() else {
        problems.push(Problem::new("<root>", "bundle must be a JSON object"));
        return problems;
    };

    require_string(root, "schema_version", &mut problems);
    require_string(root, "bundle_id", &mut problems);

    let rules = match root.get("rules") {
        Some(Value::Array(rules)) => rules,
        Some(_) => {
            problems.push(Problem::new("rules", "must be an array"));
            return problems;
        }
        None => {
            problems.push(Problem::new("rules", "is required"));
            return problems;
        }
    };

    for (idx, rule) in rules.iter().enumerate() {
        check_rule_shape(idx, rule, &mut problems);
    }

    // Semantic checks run even when shape problems were found.
    problems.extend(semantic_checks(rules));

    problems
}

fn require_string(obj: &serde_json::Map<String, Value>, key: &str, problems: &mut Vec<Problem>) {
    match obj.get(key) {
        Some(Value::String(s)) if !s.is_empty() => {}
        Some(Value::String(_)) => problems.push(Problem::new(key, "must not be empty")),
        Some(_) => problems.push(Problem::new(key, "must be a string")),
        None => problems.push(Problem::new(key, "is required")),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shape checks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn check_rule_shape(idx: usize, rule: &Value, problems: &mut Vec<Problem>) {
    let loc = |suffix: &str| format!("rules[{idx}].{suffix}");

    let Some(rule) = rule.as_object() else {
        problems.push(Problem::new(format!("rules[{idx}]"), "must be an object"));
        return;
    };

    match rule.get("rule_id") {
        Some(Value::String(s)) if !s.is_empty() => {}
        _ => problems.push(Problem::new(loc("rule_id"), "must be a non-empty string")),
    }

    match rule.get("precedence") {
        Some(v) if v.is_i64() || v.is_u64() => {}
        Some(_) => problems.push(Problem::new(loc("precedence"), "must be an integer")),
        None => problems.push(Problem::new(loc("precedence"), "is required")),
    }

    if let Some(salience) = rule.get("salience") {
        if !(salience.is_i64() || salience.is_u64()) {
            problems.push(Problem::new(loc("salience"), "must be an integer"));
        }
    }

    match rule.get("effect") {
        Some(effect) => check_effect(&loc("effect"), effect, problems),
        None => problems.push(Problem::new(loc("effect"), "is required")),
    }

    if let Some(conditions) = rule.get("conditions") {
        check_condition(&loc("conditions"), conditions, problems);
    }

    if let Some(deps) = rule.get("dependencies") {
        match deps.as_array() {
            Some(deps) => {
                for (i, dep) in deps.iter().enumerate() {
                    if !dep.is_string() {
                        problems.push(Problem::new(
                            format!("rules[{idx}].dependencies[{i}]"),
                            "must be a string rule id",
                        ));
                    }
                }
            }
            None => problems.push(Problem::new(loc("dependencies"), "must be an array")),
        }
    }
}

fn check_effect(loc: &str, effect: &Value, problems: &mut Vec<Problem>) {
    let Some(effect) = effect.as_object() else {
        problems.push(Problem::new(loc, "must be an object"));
        return;
    };

    let effect_type = match effect.get("type").and_then(Value::as_str) {
        Some(t) => t,
        None => {
            problems.push(Problem::new(format!("{loc}.type"), "is required"));
            return;
        }
    };

    match effect_type {
        "DENY" | "ESCALATE" | "WARN" => {}
        "REQUIRE_FIELD" => {
            if effect.get("field").and_then(Value::as_str).is_none() {
                problems.push(Problem::new(
                    format!("{loc}.field"),
                    "REQUIRE_FIELD needs a string field path",
                ));
            }
        }
        "ADJUST_SCORE" => {
            if effect.get("delta").and_then(Value::as_f64).is_none() {
                problems.push(Problem::new(
                    format!("{loc}.delta"),
                    "ADJUST_SCORE needs a numeric delta",
                ));
            }
        }
        "LIMIT_OCCURRENCE" => {
            for field in ["window_seconds", "max_occurrences"] {
                match effect.get(field).and_then(Value::as_u64) {
                    Some(n) if n > 0 => {}
                    _ => problems.push(Problem::new(
                        format!("{loc}.{field}"),
                        "LIMIT_OCCURRENCE needs a positive integer",
                    )),
                }
            }
        }
        other => problems.push(Problem::new(
            format!("{loc}.type"),
            format!("unknown effect type '{other}'"),
        )),
    }
}

fn check_condition(loc: &str, node: &Value, problems: &mut Vec<Problem>) {
    let Some(obj) = node.as_object() else {
        problems.push(Problem::new(loc, "must be an object"));
        return;
    };

    for combinator in ["all", "any", "none"] {
        if let Some(children) = obj.get(combinator) {
            match children.as_array() {
                Some(children) => {
                    for (i, child) in children.iter().enumerate() {
                        check_condition(&format!("{loc}.{combinator}[{i}]"), child, problems);
                    }
                }
                None => problems.push(Problem::new(
                    format!("{loc}.{combinator}"),
                    "must be an array of conditions",
                )),
            }
            return;
        }
    }

    if let Some(child) = obj.get("not") {
        check_condition(&format!("{loc}.not"), child, problems);
        return;
    }

    // Leaf node.
    if obj.get("field").and_then(Value::as_str).is_none() {
        problems.push(Problem::new(
            format!("{loc}.field"),
            "leaf condition needs a string field path",
        ));
    }

    match obj.get("operator").and_then(Value::as_str) {
        Some(op) if Operator::ALL.contains(&op) => {
            if op == "between" {
                let ok = obj
                    .get("value")
                    .and_then(Value::as_array)
                    .is_some_and(|v| v.len() == 2);
                if !ok {
                    problems.push(Problem::new(
                        format!("{loc}.value"),
                        "between needs a two-element [lower, upper] array",
                    ));
                }
            }
            if op == "regex" {
                match obj.get("value").and_then(Value::as_str) {
                    Some(pattern) => {
                        if let Err(e) = regex::Regex::new(pattern) {
                            problems.push(Problem::new(
                                format!("{loc}.value"),
                                format!("invalid regex: {e}"),
                            ));
                        }
                    }
                    None => problems.push(Problem::new(
                        format!("{loc}.value"),
                        "regex needs a string pattern",
                    )),
                }
            }
        }
        Some(op) => problems.push(Problem::new(
            format!("{loc}.operator"),
            format!("unknown operator '{op}'"),
        )),
        None => problems.push(Problem::new(
            format!("{loc}.operator"),
            "is required on a leaf condition",
        )),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Semantic checks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn semantic_checks(rules: &[Value]) -> Vec<Problem> {
    let mut problems = Vec::new();
    let mut seen_ids: HashMap<&str, usize> = HashMap::new();
    let mut seen_precedence: HashMap<i64, String> = HashMap::new();

    for (idx, rule) in rules.iter().enumerate() {
        let Some(rule) = rule.as_object() else {
            continue;
        };

        if let Some(rule_id) = rule.get("rule_id").and_then(Value::as_str) {
            if let Some(first) = seen_ids.get(rule_id) {
                problems.push(Problem::new(
                    format!("rules[{idx}].rule_id"),
                    format!("duplicate rule_id '{rule_id}' also used at rules[{first}].rule_id"),
                ));
            } else {
                seen_ids.insert(rule_id, idx);
            }
        }

        if let Some(precedence) = rule.get("precedence").and_then(Value::as_i64) {
            if let Some(holder) = seen_precedence.get(&precedence) {
                problems.push(Problem::new(
                    format!("rules[{idx}].precedence"),
                    format!("precedence {precedence} reused by rule '{holder}' — precedences must be unique"),
                ));
            } else {
                let holder = rule
                    .get("rule_id")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or_else(|| format!("index-{idx}"));
                seen_precedence.insert(precedence, holder);
            }
        }
    }

    for (idx, rule) in rules.iter().enumerate() {
        let Some(rule) = rule.as_object() else {
            continue;
        };
        let Some(deps) = rule.get("dependencies").and_then(Value::as_array) else {
            continue;
        };
        for dep in deps {
            if let Some(dep) = dep.as_str() {
                if !seen_ids.contains_key(dep) {
                    problems.push(Problem::new(
                        format!("rules[{idx}].dependencies"),
                        format!("unknown dependency '{dep}' — rule id not present in bundle"),
                    ));
                }
            }
        }
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(id: &str, precedence: i64) -> Value {
        json!({
            "rule_id": id,
            "precedence": precedence,
            "effect": {"type": "DENY"},
        })
    }

    #[test]
    fn clean_bundle_has_no_problems() {
        let bundle = json!({
            "schema_version": "1.0.0",
            "bundle_id": "b1",
            "rules": [rule("r1", 1), rule("r2", 2)],
        });
        assert!(validate_bundle(&bundle).is_empty());
    }

    #[test]
    fn duplicate_rule_id_reports_both_sites() {
        let bundle = json!({
            "schema_version": "1.0.0",
            "bundle_id": "b1",
            "rules": [rule("r1", 1), rule("r1", 2)],
        });
        let problems = validate_bundle(&bundle);
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].location, "rules[1].rule_id");
        assert!(problems[0].message.contains("rules[0]"));
    }

    #[test]
    fn duplicate_precedence_is_rejected() {
        let bundle = json!({
            "schema_version": "1.0.0",
            "bundle_id": "b1",
            "rules": [rule("r1", 1), rule("r2", 1)],
        });
        let problems = validate_bundle(&bundle);
        assert!(problems.iter().any(|p| p.location == "rules[1].precedence"));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut r = rule("r1", 1);
        r["dependencies"] = json!(["r9"]);
        let bundle = json!({
            "schema_version": "1.0.0",
            "bundle_id": "b1",
            "rules": [r],
        });
        let problems = validate_bundle(&bundle);
        assert!(problems
            .iter()
            .any(|p| p.message.contains("unknown dependency 'r9'")));
    }

    #[test]
    fn problems_accumulate() {
        let bundle = json!({
            "bundle_id": "",
            "rules": [
                {"precedence": "high", "effect": {"type": "NUKE"}},
                {"rule_id": "r2", "precedence": 2, "effect": {"type": "ADJUST_SCORE"}},
            ],
        });
        let problems = validate_bundle(&bundle);
        // schema_version missing, empty bundle_id, missing rule_id, bad
        // precedence, unknown effect, missing delta — all in one pass.
        assert!(problems.len() >= 5, "got: {problems:?}");
    }

    #[test]
    fn bad_regex_and_bad_between_are_caught() {
        let bundle = json!({
            "schema_version": "1.0.0",
            "bundle_id": "b1",
            "rules": [{
                "rule_id": "r1",
                "precedence": 1,
                "conditions": {"all": [
                    {"field": "a", "operator": "regex", "value": "(["},
                    {"field": "b", "operator": "between", "value": [1]},
                ]},
                "effect": {"type": "DENY"},
            }],
        });
        let problems = validate_bundle(&bundle);
        assert!(problems.iter().any(|p| p.message.contains("invalid regex")));
        assert!(problems.iter().any(|p| p.message.contains("two-element")));
    }
}
