//! Default starter pack of scheduling rules applied to new clinics.
//!
//! A baseline bundle implementing common guardrails and preferences;
//! used as the active policy for clinics without an authored bundle
//! and as a known-good fixture in tests.

use serde_json::{json, Value};

/// Return the default starter pack rule bundle.
pub fn starter_pack_bundle(bundle_id: &str) -> Value {
    json!({
        "schema_version": "1.0.0",
        "bundle_id": bundle_id,
        "description": "Baseline scheduling guardrails and preferences",
        "metadata": {"bundle_type": "starter_pack"},
        "rules": [
            {
                "rule_id": "HARD_WORKING_HOURS",
                "precedence": 5,
                "conditions": {
                    "all": [
                        {
                            "field": "appointment.within_working_hours",
                            "operator": "equals",
                            "value": false
                        }
                    ]
                },
                "effect": {
                    "type": "DENY",
                    "reason_code": "OUT_OF_HOURS",
                    "explain_template": "Appointment must be scheduled within clinic working hours."
                }
            },
            {
                "rule_id": "HARD_ESCALATE_EMERGENCY",
                "precedence": 10,
                "conditions": {
                    "all": [
                        {"field": "request.is_emergency", "operator": "equals", "value": true}
                    ]
                },
                "effect": {
                    "type": "ESCALATE",
                    "reason_code": "EMERGENCY",
                    "explain_template": "Emergency requests are routed to staff immediately."
                }
            },
            {
                "rule_id": "HARD_DAILY_LIMIT",
                "precedence": 20,
                "conditions": {
                    "all": [
                        {"field": "patient.patient_id", "operator": "is_not_null"}
                    ]
                },
                "effect": {
                    "type": "LIMIT_OCCURRENCE",
                    "key": "limit:{clinic_id}:{patient_id}:daily",
                    "window_seconds": 86400,
                    "max_occurrences": 5,
                    "explain_template": "Daily booking limit reached; a coordinator will follow up."
                }
            },
            {
                "rule_id": "SOFT_PACK_MORNINGS",
                "precedence": 100,
                "conditions": {
                    "all": [
                        {"field": "slot.hour", "operator": "less_than", "value": 12}
                    ]
                },
                "effect": {"type": "ADJUST_SCORE", "delta": 5.0}
            },
            {
                "rule_id": "SOFT_WARN_LATE_EVENING",
                "precedence": 110,
                "conditions": {
                    "all": [
                        {"field": "slot.hour", "operator": "greater_or_equal", "value": 19}
                    ]
                },
                "effect": {
                    "type": "WARN",
                    "message": "Late-evening slot",
                    "explain_template": "This slot is close to closing time."
                }
            }
        ]
    })
}
