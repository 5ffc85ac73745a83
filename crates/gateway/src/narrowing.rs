//! Preference narrowing.
//!
//! Advisory step between constraint extraction and generation: given
//! the current constraint block, either pick the clarifying question
//! the assistant should ask, or pre-bind a `check_availability` call.
//! The decision becomes a "booking control block" in the system prompt;
//! the LLM may phrase things its own way but must respect the DO /
//! DO-NOT lines.

use serde_json::{json, Value};

use mg_constraints::ConstraintBlock;
use mg_sessions::EpisodeState;

/// Typed clarifying-question selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClarifyTemplate {
    WhichService,
    WhichDay,
    ConfirmSlot,
}

impl ClarifyTemplate {
    pub fn as_str(self) -> &'static str {
        match self {
            ClarifyTemplate::WhichService => "which_service",
            ClarifyTemplate::WhichDay => "which_day",
            ClarifyTemplate::ConfirmSlot => "confirm_slot",
        }
    }
}

#[derive(Debug, Clone)]
pub enum NarrowingInstruction {
    /// Ask one specific clarifying question.
    AskClarifying {
        template: ClarifyTemplate,
        args: Value,
    },
    /// Enough is bound: check availability with these arguments.
    CheckAvailability { args: Value },
}

/// Derive the narrowing instruction for this turn.
pub fn narrow(constraints: &ConstraintBlock, episode: &EpisodeState) -> NarrowingInstruction {
    let service_bound = constraints.desired_service.is_some()
        || constraints.desired_service_id.is_some()
        || episode.last_service_mentioned.is_some();

    if !service_bound {
        return NarrowingInstruction::AskClarifying {
            template: ClarifyTemplate::WhichService,
            args: json!({}),
        };
    }

    let Some(window) = &constraints.time_window else {
        return NarrowingInstruction::AskClarifying {
            template: ClarifyTemplate::WhichDay,
            args: json!({
                "service": constraints.desired_service,
            }),
        };
    };

    let mut args = json!({
        "preferred_date": window.start,
    });
    if let Some(service) = &constraints.desired_service {
        args["service_name"] = json!(service);
    }
    if let Some(service_id) = &constraints.desired_service_id {
        args["service_id"] = json!(service_id);
    } else if let Some(service_id) = &episode.last_service_mentioned {
        args["service_id"] = json!(service_id);
    }
    if let Some(doctor) = &constraints.desired_doctor {
        args["doctor_name"] = json!(doctor);
    }

    NarrowingInstruction::CheckAvailability { args }
}

/// Render the booking control block injected into the system prompt.
pub fn control_block(
    instruction: &NarrowingInstruction,
    constraints: &ConstraintBlock,
) -> String {
    let mut lines = vec!["## Booking control".to_owned()];

    match instruction {
        NarrowingInstruction::AskClarifying { template, .. } => {
            lines.push(format!(
                "DO: ask the patient one clarifying question ({}).",
                template.as_str()
            ));
            lines.push("DO NOT: call scheduling tools before that answer.".into());
        }
        NarrowingInstruction::CheckAvailability { args } => {
            lines.push(format!(
                "DO: call check_availability with arguments close to {args}."
            ));
            lines.push("DO NOT: invent times; only offer slots the tool returned.".into());
        }
    }

    if !constraints.excluded_doctors.is_empty() {
        let excluded: Vec<&str> = constraints
            .excluded_doctors
            .iter()
            .map(String::as_str)
            .collect();
        lines.push(format!(
            "DO NOT: mention or book these doctors: {}.",
            excluded.join(", ")
        ));
    }
    if !constraints.excluded_services.is_empty() {
        let excluded: Vec<&str> = constraints
            .excluded_services
            .iter()
            .map(String::as_str)
            .collect();
        lines.push(format!(
            "DO NOT: offer these services: {}.",
            excluded.join(", ")
        ));
    }
    if let Some(window) = &constraints.time_window {
        lines.push(format!(
            "DO: keep proposals within {} – {} ({}).",
            window.start, window.end, window.display
        ));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use mg_constraints::TimeWindow;

    #[test]
    fn no_service_asks_which_service() {
        let instruction = narrow(&ConstraintBlock::default(), &EpisodeState::default());
        assert!(matches!(
            instruction,
            NarrowingInstruction::AskClarifying {
                template: ClarifyTemplate::WhichService,
                ..
            }
        ));
    }

    #[test]
    fn service_without_window_asks_which_day() {
        let mut constraints = ConstraintBlock::default();
        constraints.desired_service = Some("cleaning".into());
        let instruction = narrow(&constraints, &EpisodeState::default());
        assert!(matches!(
            instruction,
            NarrowingInstruction::AskClarifying {
                template: ClarifyTemplate::WhichDay,
                ..
            }
        ));
    }

    #[test]
    fn bound_service_and_window_prebinds_check() {
        let mut constraints = ConstraintBlock::default();
        constraints.desired_service = Some("cleaning".into());
        constraints.desired_doctor = Some("Shtern".into());
        constraints.time_window = Some(TimeWindow {
            start: "2025-11-25".into(),
            end: "2025-11-25".into(),
            display: "tomorrow".into(),
        });

        let NarrowingInstruction::CheckAvailability { args } =
            narrow(&constraints, &EpisodeState::default())
        else {
            panic!("expected CheckAvailability");
        };
        assert_eq!(args["preferred_date"], "2025-11-25");
        assert_eq!(args["doctor_name"], "Shtern");
    }

    #[test]
    fn control_block_lists_exclusions() {
        let mut constraints = ConstraintBlock::default();
        constraints.excluded_doctors.insert("Дан".into());
        let instruction = narrow(&constraints, &EpisodeState::default());
        let block = control_block(&instruction, &constraints);
        assert!(block.contains("DO NOT: mention or book these doctors: Дан."));
    }
}
