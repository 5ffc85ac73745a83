//! State echo — the short confirmation of locked-in constraints that is
//! prepended to the assistant's reply whenever constraints changed this
//! turn, so the patient sees exactly what the system registered.

use mg_domain::Language;

use crate::block::ConstraintBlock;

pub struct StateEchoFormatter;

impl StateEchoFormatter {
    /// Render the echo for a block, or `None` when there is nothing to
    /// confirm.
    pub fn format(block: &ConstraintBlock, language: Language) -> Option<String> {
        if block.is_empty() {
            return None;
        }

        let mut lines = Vec::new();

        if let Some(service) = &block.desired_service {
            lines.push(match language {
                Language::Ru => format!("• Услуга — **{service}**"),
                Language::Es => format!("• Servicio: **{service}**"),
                Language::He => format!("• שירות: **{service}**"),
                Language::En => format!("• Service: **{service}**"),
            });
        }
        if let Some(doctor) = &block.desired_doctor {
            lines.push(match language {
                Language::Ru => format!("• Предпочитаемый врач — **{doctor}**"),
                Language::Es => format!("• Doctor preferido: **{doctor}**"),
                Language::He => format!("• רופא מועדף: **{doctor}**"),
                Language::En => format!("• Preferred doctor: **{doctor}**"),
            });
        }

        let mut exclusions: Vec<&str> = block
            .excluded_doctors
            .iter()
            .chain(&block.excluded_services)
            .map(String::as_str)
            .collect();
        exclusions.sort_unstable();
        // The same entity often lands in both exclusion sets.
        exclusions.dedup();
        if !exclusions.is_empty() {
            let items = exclusions.join(", ");
            lines.push(match language {
                Language::Ru => format!("• Не предлагаю: {items}"),
                Language::Es => format!("• No sugeriré: {items}"),
                Language::He => format!("• לא אציע: {items}"),
                Language::En => format!("• Will not suggest: {items}"),
            });
        }

        if let Some(window) = &block.time_window {
            lines.push(match language {
                Language::Ru => format!("• Период — **{}**", window.display),
                Language::Es => format!("• Período: **{}**", window.display),
                Language::He => format!("• טווח זמן: **{}**", window.display),
                Language::En => format!("• Time window: **{}**", window.display),
            });
        }

        if lines.is_empty() {
            return None;
        }

        let (header, footer) = match language {
            Language::Ru => ("Понял. Фиксирую:", "Проверяю доступность..."),
            Language::Es => ("Entendido. Anoto:", "Verificando disponibilidad..."),
            Language::He => ("הבנתי. רושם:", "בודק זמינות..."),
            Language::En => ("Understood. Locking in:", "Checking availability..."),
        };

        Some(format!("{header}\n{}\n{footer}", lines.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::TimeWindow;

    #[test]
    fn empty_block_yields_no_echo() {
        assert!(StateEchoFormatter::format(&ConstraintBlock::default(), Language::En).is_none());
    }

    #[test]
    fn full_block_renders_all_lines() {
        let mut block = ConstraintBlock::default();
        block.desired_service = Some("виниры".into());
        block.excluded_doctors.insert("Дан".into());
        block.time_window = Some(TimeWindow {
            start: "2025-11-25".into(),
            end: "2025-11-25".into(),
            display: "завтра".into(),
        });

        let echo = StateEchoFormatter::format(&block, Language::Ru).unwrap();
        assert!(echo.starts_with("Понял. Фиксирую:"));
        assert!(echo.contains("виниры"));
        assert!(echo.contains("Не предлагаю: Дан"));
        assert!(echo.contains("завтра"));
        assert!(echo.ends_with("Проверяю доступность..."));
    }

    #[test]
    fn exclusions_only_block_still_echoes() {
        let mut block = ConstraintBlock::default();
        block.excluded_services.insert("filling".into());
        let echo = StateEchoFormatter::format(&block, Language::En).unwrap();
        assert!(echo.contains("Will not suggest: filling"));
    }
}
