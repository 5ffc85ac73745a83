//! Tool-call state gate.
//!
//! Pre-call validation against the live constraint block: excluded
//! doctors and services hard-block (with a suggested rewrite when the
//! patient named a replacement), a desired-service mismatch hard-blocks,
//! and dates outside the bound time window get a proposed correction.
//! Blocks are explained back to the LLM, never shown to the patient.

use serde_json::{Map, Value};

use mg_constraints::ConstraintBlock;

/// Outcome of gating one tool call.
#[derive(Debug, Clone)]
pub enum GateOutcome {
    Allow,
    /// Allowed, but with corrections the executor applies before
    /// dispatch (e.g. a date pulled into the bound window).
    AllowWithFixes(Map<String, Value>),
    /// Refused. `reason` goes back to the LLM; `fixes` suggest
    /// arguments that would pass.
    Block {
        reason: String,
        fixes: Map<String, Value>,
    },
}

pub struct ToolStateGate;

impl ToolStateGate {
    /// Validate a scheduling tool call against the constraint block.
    pub fn validate(arguments: &Value, constraints: &ConstraintBlock) -> GateOutcome {
        let mut errors: Vec<String> = Vec::new();
        let mut fixes = Map::new();

        let service_name = arguments.get("service_name").and_then(Value::as_str);
        let service_id = arguments.get("service_id").and_then(Value::as_str);
        let doctor_name = arguments.get("doctor_name").and_then(Value::as_str);
        let doctor_id = arguments.get("doctor_id").and_then(Value::as_str);

        // Service exclusions.
        if constraints.should_exclude_service(service_name, service_id) {
            errors.push(format!(
                "service '{}' is excluded by the patient; do not offer it again",
                service_name.unwrap_or("?")
            ));
            if let Some(desired) = &constraints.desired_service {
                fixes.insert("service_name".into(), Value::String(desired.clone()));
            }
        } else if let (Some(desired), Some(named)) =
            (&constraints.desired_service, service_name)
        {
            // Desired service is a hard bind, not a hint.
            if !named.to_lowercase().contains(&desired.to_lowercase()) {
                errors.push(format!(
                    "service mismatch: tool uses '{named}' but the patient asked for '{desired}'"
                ));
                fixes.insert("service_name".into(), Value::String(desired.clone()));
            }
        }

        // Doctor exclusions.
        if constraints.should_exclude_doctor(doctor_name, doctor_id) {
            errors.push(format!(
                "doctor '{}' is excluded by the patient; do not offer them again",
                doctor_name.unwrap_or("?")
            ));
            if let Some(desired) = &constraints.desired_doctor {
                fixes.insert("doctor_name".into(), Value::String(desired.clone()));
            }
        }

        // Time window.
        if let (Some(window), Some(date)) = (
            &constraints.time_window,
            arguments.get("preferred_date").and_then(Value::as_str),
        ) {
            if date < window.start.as_str() || date > window.end.as_str() {
                tracing::warn!(
                    date,
                    window = %window.display,
                    "preferred_date outside the bound time window"
                );
                fixes.insert(
                    "preferred_date".into(),
                    Value::String(window.start.clone()),
                );
            }
        }

        if !errors.is_empty() {
            GateOutcome::Block {
                reason: errors.join("; "),
                fixes,
            }
        } else if !fixes.is_empty() {
            GateOutcome::AllowWithFixes(fixes)
        } else {
            GateOutcome::Allow
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mg_constraints::TimeWindow;
    use serde_json::json;

    fn block_with(f: impl FnOnce(&mut ConstraintBlock)) -> ConstraintBlock {
        let mut block = ConstraintBlock::default();
        f(&mut block);
        block
    }

    #[test]
    fn excluded_doctor_blocks_with_rewrite() {
        let constraints = block_with(|b| {
            b.excluded_doctors.insert("Дан".into());
            b.desired_doctor = Some("Андреа".into());
        });
        let outcome = ToolStateGate::validate(
            &json!({"doctor_name": "Дана", "service_name": "чистка"}),
            &constraints,
        );
        let GateOutcome::Block { reason, fixes } = outcome else {
            panic!("expected block");
        };
        assert!(reason.contains("excluded"));
        assert_eq!(fixes["doctor_name"], "Андреа");
    }

    #[test]
    fn excluded_doctor_by_id_blocks_without_name() {
        let constraints = block_with(|b| {
            b.excluded_doctor_ids.insert("doc-1".into());
        });
        let outcome =
            ToolStateGate::validate(&json!({"doctor_id": "doc-1"}), &constraints);
        assert!(matches!(outcome, GateOutcome::Block { .. }));
    }

    #[test]
    fn desired_service_mismatch_hard_blocks() {
        let constraints = block_with(|b| {
            b.desired_service = Some("виниры".into());
        });
        let outcome = ToolStateGate::validate(
            &json!({"service_name": "пломба"}),
            &constraints,
        );
        let GateOutcome::Block { fixes, .. } = outcome else {
            panic!("expected block");
        };
        assert_eq!(fixes["service_name"], "виниры");
    }

    #[test]
    fn matching_desired_service_passes() {
        let constraints = block_with(|b| {
            b.desired_service = Some("cleaning".into());
        });
        let outcome = ToolStateGate::validate(
            &json!({"service_name": "Deep Cleaning"}),
            &constraints,
        );
        assert!(matches!(outcome, GateOutcome::Allow));
    }

    #[test]
    fn date_outside_window_gets_corrected_not_blocked() {
        let constraints = block_with(|b| {
            b.time_window = Some(TimeWindow {
                start: "2025-11-25".into(),
                end: "2025-11-25".into(),
                display: "завтра".into(),
            });
        });
        let outcome = ToolStateGate::validate(
            &json!({"preferred_date": "2025-12-01"}),
            &constraints,
        );
        let GateOutcome::AllowWithFixes(fixes) = outcome else {
            panic!("expected fixes");
        };
        assert_eq!(fixes["preferred_date"], "2025-11-25");
    }

    #[test]
    fn clean_call_passes_untouched() {
        let outcome = ToolStateGate::validate(
            &json!({"service_name": "cleaning", "preferred_date": "2025-11-25"}),
            &ConstraintBlock::default(),
        );
        assert!(matches!(outcome, GateOutcome::Allow));
    }
}
