//! Session split scoring.
//!
//! Each inbound message is scored against the previous activity; the
//! score decides whether the conversation continues, soft-resets
//! (new session + summary continuity), or hard-resets (new session,
//! profile-only carryover).

/// Outcome of the boundary check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    /// Continue the current session.
    None,
    /// New session; inject the previous session's summary as context.
    Soft,
    /// New session; carry only profile-tier data (language, allergies,
    /// hard bans).
    Hard,
}

impl std::fmt::Display for ResetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ResetKind::None => "none",
            ResetKind::Soft => "soft",
            ResetKind::Hard => "hard",
        })
    }
}

/// Signals feeding the split score.
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitSignals {
    pub time_gap_hours: f64,
    /// Semantic distance 0–1 between the new message and the session
    /// topic, when available.
    pub topic_drift: Option<f64>,
    pub hard_correction: bool,
    /// A terminal event (booked, cancelled) closed out the episode.
    pub outcome_event: bool,
    pub explicit_reset: bool,
}

// Signal weights. The 72h gap and the event signals are each
// sufficient for a hard reset on their own; the 4h gap alone lands
// exactly on the soft threshold.
const WEIGHT_GAP_4H: f64 = 0.5;
const WEIGHT_GAP_24H: f64 = 0.3;
const WEIGHT_GAP_48H: f64 = 0.6;
const WEIGHT_GAP_72H: f64 = 1.0;
const WEIGHT_DRIFT_MEDIUM: f64 = 0.4;
const WEIGHT_DRIFT_HIGH: f64 = 0.8;
const WEIGHT_HARD_CORRECTION: f64 = 0.7;
const WEIGHT_OUTCOME_EVENT: f64 = 1.0;
const WEIGHT_EXPLICIT_RESET: f64 = 1.0;

const SOFT_THRESHOLD: f64 = 0.5;
const HARD_THRESHOLD: f64 = 1.0;

/// Compute the split score and the reset it implies.
pub fn split_score(signals: SplitSignals) -> (f64, ResetKind) {
    let mut score = 0.0;

    // Time gap tiers are exclusive; only the deepest one counts.
    if signals.time_gap_hours >= 72.0 {
        score += WEIGHT_GAP_72H;
    } else if signals.time_gap_hours >= 48.0 {
        score += WEIGHT_GAP_48H;
    } else if signals.time_gap_hours >= 24.0 {
        score += WEIGHT_GAP_24H;
    } else if signals.time_gap_hours >= 4.0 {
        score += WEIGHT_GAP_4H;
    }

    if let Some(drift) = signals.topic_drift {
        if drift > 0.7 {
            score += WEIGHT_DRIFT_HIGH;
        } else if drift > 0.4 {
            score += WEIGHT_DRIFT_MEDIUM;
        }
    }

    if signals.hard_correction {
        score += WEIGHT_HARD_CORRECTION;
    }
    if signals.outcome_event {
        score += WEIGHT_OUTCOME_EVENT;
    }
    if signals.explicit_reset {
        score += WEIGHT_EXPLICIT_RESET;
    }

    let kind = if score >= HARD_THRESHOLD {
        ResetKind::Hard
    } else if score >= SOFT_THRESHOLD {
        ResetKind::Soft
    } else {
        ResetKind::None
    };

    tracing::debug!(
        score,
        reset = %kind,
        gap_hours = signals.time_gap_hours,
        drift = ?signals.topic_drift,
        "split score computed"
    );

    (score, kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gap(hours: f64) -> SplitSignals {
        SplitSignals {
            time_gap_hours: hours,
            ..Default::default()
        }
    }

    #[test]
    fn short_gap_continues() {
        let (score, kind) = split_score(gap(1.0));
        assert_eq!(score, 0.0);
        assert_eq!(kind, ResetKind::None);
    }

    #[test]
    fn four_hour_gap_soft_resets() {
        let (score, kind) = split_score(gap(5.0));
        assert_eq!(score, 0.5);
        assert_eq!(kind, ResetKind::Soft);
    }

    #[test]
    fn gap_tiers_are_exclusive() {
        assert_eq!(split_score(gap(30.0)).0, 0.3);
        assert_eq!(split_score(gap(50.0)).0, 0.6);
    }

    #[test]
    fn three_day_gap_hard_resets() {
        let (score, kind) = split_score(gap(72.0));
        assert_eq!(score, 1.0);
        assert_eq!(kind, ResetKind::Hard);
    }

    #[test]
    fn outcome_event_alone_hard_resets() {
        let (_, kind) = split_score(SplitSignals {
            outcome_event: true,
            ..Default::default()
        });
        assert_eq!(kind, ResetKind::Hard);
    }

    #[test]
    fn explicit_reset_alone_hard_resets() {
        let (_, kind) = split_score(SplitSignals {
            explicit_reset: true,
            ..Default::default()
        });
        assert_eq!(kind, ResetKind::Hard);
    }

    #[test]
    fn correction_alone_is_soft() {
        let (score, kind) = split_score(SplitSignals {
            hard_correction: true,
            ..Default::default()
        });
        assert_eq!(score, 0.7);
        assert_eq!(kind, ResetKind::Soft);
    }

    #[test]
    fn drift_stacks_with_gap() {
        let (score, kind) = split_score(SplitSignals {
            time_gap_hours: 25.0,
            topic_drift: Some(0.9),
            ..Default::default()
        });
        assert!((score - 1.1).abs() < 1e-9);
        assert_eq!(kind, ResetKind::Hard);
    }
}
