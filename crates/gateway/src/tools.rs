//! Tool schemas exposed to the LLM.
//!
//! A closed set: every tool has a typed argument struct, a JSON schema
//! for the model, and a declared dependency list the executor enforces.
//! The "unknown tool" case is one enumerated error, not a dynamic path.

use serde::Deserialize;
use serde_json::json;

use mg_domain::llm::ToolDefinition;

/// Static description of one tool.
pub struct ToolSchema {
    pub name: &'static str,
    /// Tools that must have produced a successful result earlier in
    /// this turn before this one may run.
    pub depends_on: &'static [&'static str],
    /// Scheduling tools pass through the constraint state gate.
    pub is_scheduling: bool,
}

pub const TOOLS: &[ToolSchema] = &[
    ToolSchema {
        name: "get_services",
        depends_on: &[],
        is_scheduling: false,
    },
    ToolSchema {
        name: "check_availability",
        depends_on: &[],
        is_scheduling: true,
    },
    ToolSchema {
        name: "book_appointment",
        depends_on: &["check_availability"],
        is_scheduling: true,
    },
    ToolSchema {
        name: "reschedule_appointment",
        depends_on: &["check_availability"],
        is_scheduling: true,
    },
    ToolSchema {
        name: "cancel_appointment",
        depends_on: &[],
        is_scheduling: false,
    },
];

pub fn schema(name: &str) -> Option<&'static ToolSchema> {
    TOOLS.iter().find(|t| t.name == name)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Typed arguments
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
pub struct CheckAvailabilityArgs {
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub doctor_id: Option<String>,
    #[serde(default)]
    pub doctor_name: Option<String>,
    /// ISO date "YYYY-MM-DD".
    #[serde(default)]
    pub preferred_date: Option<String>,
    /// "morning" | "afternoon" | "evening".
    #[serde(default)]
    pub time_of_day: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookAppointmentArgs {
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
    /// Local clinic time "YYYY-MM-DDTHH:MM:SS".
    pub datetime_str: String,
    #[serde(default)]
    pub doctor_id: Option<String>,
    #[serde(default)]
    pub doctor_name: Option<String>,
    #[serde(default)]
    pub patient_info: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleArgs {
    #[serde(default)]
    pub appointment_id: Option<String>,
    /// New local clinic time "YYYY-MM-DDTHH:MM:SS".
    pub datetime_str: String,
    #[serde(default)]
    pub doctor_id: Option<String>,
    #[serde(default)]
    pub doctor_name: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelArgs {
    #[serde(default)]
    pub appointment_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Definitions sent to the LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn build_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "get_services".into(),
            description: "List the clinic's services with durations and prices.".into(),
            parameters: json!({
                "type": "object",
                "properties": {}
            }),
        },
        ToolDefinition {
            name: "check_availability".into(),
            description: "Find open appointment slots for a service. Call this before booking.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "service_id": { "type": "string", "description": "Service UUID if known" },
                    "service_name": { "type": "string", "description": "Service name as the patient said it" },
                    "doctor_id": { "type": "string", "description": "Doctor UUID if known" },
                    "doctor_name": { "type": "string", "description": "Doctor name as the patient said it" },
                    "preferred_date": { "type": "string", "description": "ISO date YYYY-MM-DD" },
                    "time_of_day": { "type": "string", "enum": ["morning", "afternoon", "evening"] }
                },
                "required": []
            }),
        },
        ToolDefinition {
            name: "book_appointment".into(),
            description: "Book a specific slot returned by check_availability.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "service_id": { "type": "string" },
                    "service_name": { "type": "string" },
                    "datetime_str": { "type": "string", "description": "Slot start in clinic time, YYYY-MM-DDTHH:MM:SS" },
                    "doctor_id": { "type": "string" },
                    "doctor_name": { "type": "string" },
                    "patient_info": { "type": "object", "description": "Patient name / phone details" }
                },
                "required": ["datetime_str"]
            }),
        },
        ToolDefinition {
            name: "reschedule_appointment".into(),
            description: "Move the patient's upcoming appointment to a new slot from check_availability.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "appointment_id": { "type": "string" },
                    "datetime_str": { "type": "string", "description": "New start in clinic time, YYYY-MM-DDTHH:MM:SS" },
                    "doctor_id": { "type": "string" },
                    "doctor_name": { "type": "string" },
                    "service_name": { "type": "string" }
                },
                "required": ["datetime_str"]
            }),
        },
        ToolDefinition {
            name: "cancel_appointment".into(),
            description: "Cancel the patient's upcoming appointment.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "appointment_id": { "type": "string" },
                    "reason": { "type": "string" }
                },
                "required": []
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_definition_has_a_schema_entry() {
        for definition in build_tool_definitions() {
            assert!(
                schema(&definition.name).is_some(),
                "missing schema for {}",
                definition.name
            );
        }
    }

    #[test]
    fn booking_depends_on_availability() {
        let book = schema("book_appointment").unwrap();
        assert_eq!(book.depends_on, &["check_availability"]);
        assert!(book.is_scheduling);
    }

    #[test]
    fn unknown_tool_has_no_schema() {
        assert!(schema("send_invoice").is_none());
    }

    #[test]
    fn args_parse_with_partial_fields() {
        let args: CheckAvailabilityArgs = serde_json::from_value(json!({
            "doctor_name": "Shtern",
            "preferred_date": "2025-11-25"
        }))
        .unwrap();
        assert_eq!(args.doctor_name.as_deref(), Some("Shtern"));
        assert!(args.service_id.is_none());
    }
}
