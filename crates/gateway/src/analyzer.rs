//! Heuristic response analysis — no LLM, pattern matching only.
//!
//! Decides the turn status (who acts next), whether the assistant
//! promised a follow-up, and extracts the question asked, feeding the
//! session turn status and the follow-up scheduler.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    UserTurn,
    AgentActionPending,
    Resolved,
}

impl TurnStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnStatus::UserTurn => "user_turn",
            TurnStatus::AgentActionPending => "agent_action_pending",
            TurnStatus::Resolved => "resolved",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResponseAnalysis {
    pub turn_status: TurnStatus,
    pub promises_followup: bool,
    pub followup_action: Option<String>,
    pub asks_question: bool,
    pub question_text: Option<String>,
}

const FOLLOWUP_INDICATORS: &[&str] = &[
    "let me check",
    "i'll check",
    "get back to you",
    "let me verify",
    "i'll verify",
    "i'll find out",
    "checking with",
    "consulting",
    "looking into",
    "let me see",
    "i'll see",
    "need to check",
    "уточню",
    "проверю",
    "вернусь с ответом",
    "voy a verificar",
    "le confirmo",
];

const CLOSING_INDICATORS: &[&str] = &[
    "goodbye",
    "bye",
    "take care",
    "have a great",
    "до свидания",
    "всего доброго",
    "hasta luego",
];

/// Analyze the assistant's final text.
pub fn analyze(response: &str) -> ResponseAnalysis {
    let lower = response.to_lowercase();

    let mut followup_action = None;
    for indicator in FOLLOWUP_INDICATORS {
        if let Some(index) = lower.find(indicator) {
            // The relevant sentence, capped at 100 chars. Indexing into
            // `lower` keeps byte offsets consistent with the match.
            let tail: String = lower[index..].chars().take(100).collect();
            followup_action = Some(tail.split('.').next().unwrap_or(&tail).to_owned());
            break;
        }
    }
    let promises_followup = followup_action.is_some();

    let asks_question = response.contains('?');
    let question_text = if asks_question {
        response
            .split('?')
            .filter(|s| !s.trim().is_empty())
            .next_back()
            .map(|s| format!("{}?", s.trim()))
    } else {
        None
    };

    let turn_status = if promises_followup {
        TurnStatus::AgentActionPending
    } else if asks_question {
        TurnStatus::UserTurn
    } else if CLOSING_INDICATORS.iter().any(|c| lower.contains(c)) {
        TurnStatus::Resolved
    } else {
        TurnStatus::UserTurn
    };

    ResponseAnalysis {
        turn_status,
        promises_followup,
        followup_action,
        asks_question,
        question_text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn followup_promise_marks_agent_pending() {
        let analysis = analyze("Let me check with the doctor and get back to you.");
        assert_eq!(analysis.turn_status, TurnStatus::AgentActionPending);
        assert!(analysis.promises_followup);
        assert!(analysis
            .followup_action
            .as_deref()
            .unwrap()
            .starts_with("let me check"));
    }

    #[test]
    fn question_marks_user_turn() {
        let analysis = analyze("Which day works for you? Morning or afternoon?");
        assert_eq!(analysis.turn_status, TurnStatus::UserTurn);
        assert_eq!(
            analysis.question_text.as_deref(),
            Some("Morning or afternoon?")
        );
    }

    #[test]
    fn farewell_resolves() {
        let analysis = analyze("You're all set. Take care!");
        assert_eq!(analysis.turn_status, TurnStatus::Resolved);
    }

    #[test]
    fn plain_statement_defaults_to_user_turn() {
        let analysis = analyze("Your appointment is confirmed for tomorrow.");
        assert_eq!(analysis.turn_status, TurnStatus::UserTurn);
        assert!(!analysis.asks_question);
    }
}
