use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::morphology;

/// Fuzzy-match threshold for doctor names.
const DOCTOR_FUZZY_DISTANCE: usize = 2;
/// Service names are common nouns; a tighter threshold avoids
/// "cleaning" swallowing "whitening".
const SERVICE_FUZZY_DISTANCE: usize = 1;

/// A bound time window for scheduling, in the clinic's calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// ISO date, inclusive.
    pub start: String,
    /// ISO date, inclusive.
    pub end: String,
    /// Human-readable form in the patient's language.
    pub display: String,
}

/// Conversation constraints that MUST be enforced in all tool calls.
///
/// These are guardrails, not hints; they override all other context.
/// Desired fields replace on update, exclusion sets only grow until a
/// meta-reset clears the block.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConstraintBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_doctor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_doctor_id: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub excluded_doctors: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub excluded_doctor_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub excluded_services: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub excluded_service_ids: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// True for the first turn after a session boundary.
    #[serde(default)]
    pub fresh_session: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl ConstraintBlock {
    /// Whether a doctor must not be suggested or booked.
    ///
    /// Matches by id, by case-insensitive name, by nominative variants
    /// in both directions, and finally by bounded edit distance.
    pub fn should_exclude_doctor(&self, name: Option<&str>, id: Option<&str>) -> bool {
        if id.is_some_and(|id| self.excluded_doctor_ids.contains(id)) {
            return true;
        }
        let Some(name) = name.filter(|n| !n.trim().is_empty()) else {
            return false;
        };
        excluded_by_name(
            name,
            &self.excluded_doctors,
            DOCTOR_FUZZY_DISTANCE,
        )
    }

    /// Whether a service must not be suggested or booked.
    pub fn should_exclude_service(&self, name: Option<&str>, id: Option<&str>) -> bool {
        if id.is_some_and(|id| self.excluded_service_ids.contains(id)) {
            return true;
        }
        let Some(name) = name.filter(|n| !n.trim().is_empty()) else {
            return false;
        };
        excluded_by_name(
            name,
            &self.excluded_services,
            SERVICE_FUZZY_DISTANCE,
        )
    }

    /// Whether any enforceable constraint is present.
    pub fn is_empty(&self) -> bool {
        self.desired_service.is_none()
            && self.desired_doctor.is_none()
            && self.excluded_doctors.is_empty()
            && self.excluded_services.is_empty()
            && self.excluded_doctor_ids.is_empty()
            && self.excluded_service_ids.is_empty()
            && self.time_window.is_none()
    }
}

fn excluded_by_name(name: &str, excluded: &BTreeSet<String>, fuzzy: usize) -> bool {
    let name_lower = name.trim().to_lowercase();
    if excluded.iter().any(|e| e.to_lowercase() == name_lower) {
        return true;
    }

    // Candidate variants against the excluded set.
    for variant in morphology::nominative_variants(name) {
        let variant_lower = variant.to_lowercase();
        if excluded.iter().any(|e| e.to_lowercase() == variant_lower) {
            tracing::debug!(%name, %variant, "morphology match in exclusions");
            return true;
        }
    }

    // Excluded-name variants against the candidate (reverse direction).
    for entry in excluded {
        for variant in morphology::nominative_variants(entry) {
            if variant.to_lowercase() == name_lower {
                tracing::debug!(%name, excluded = %entry, "reverse morphology match");
                return true;
            }
        }
    }

    for entry in excluded {
        if morphology::fuzzy_match(name, entry, fuzzy) {
            tracing::debug!(%name, excluded = %entry, "fuzzy match in exclusions");
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_with_excluded_doctor(name: &str) -> ConstraintBlock {
        let mut block = ConstraintBlock::default();
        block.excluded_doctors.insert(name.to_owned());
        block
    }

    #[test]
    fn excludes_by_id_regardless_of_name() {
        let mut block = ConstraintBlock::default();
        block.excluded_doctor_ids.insert("doc-1".into());
        assert!(block.should_exclude_doctor(Some("Anyone"), Some("doc-1")));
        assert!(!block.should_exclude_doctor(Some("Anyone"), Some("doc-2")));
    }

    #[test]
    fn excludes_case_insensitively() {
        let block = block_with_excluded_doctor("Дан");
        assert!(block.should_exclude_doctor(Some("дан"), None));
    }

    #[test]
    fn excludes_inflected_form_of_banned_name() {
        // Banned "Марк", tool call says "Марку" (dative).
        let block = block_with_excluded_doctor("Марк");
        assert!(block.should_exclude_doctor(Some("Марку"), None));
    }

    #[test]
    fn excludes_when_ban_itself_was_inflected() {
        // Patient said "забудь Дана" → ban stored as "Дана"; tool call
        // uses the nominative "Дан".
        let block = block_with_excluded_doctor("Дана");
        assert!(block.should_exclude_doctor(Some("Дан"), None));
    }

    #[test]
    fn excludes_typos_within_distance() {
        let block = block_with_excluded_doctor("Shtern");
        assert!(block.should_exclude_doctor(Some("Shtren"), None));
    }

    #[test]
    fn service_threshold_is_tighter() {
        let mut block = ConstraintBlock::default();
        block.excluded_services.insert("cleaning".into());
        assert!(block.should_exclude_service(Some("claening"), None));
        assert!(!block.should_exclude_service(Some("clening x"), None));
    }

    #[test]
    fn empty_name_never_matches() {
        let block = block_with_excluded_doctor("Дан");
        assert!(!block.should_exclude_doctor(Some("  "), None));
        assert!(!block.should_exclude_doctor(None, None));
    }

    #[test]
    fn round_trips_through_json() {
        let mut block = block_with_excluded_doctor("Дан");
        block.desired_service = Some("виниры".into());
        block.time_window = Some(TimeWindow {
            start: "2025-11-25".into(),
            end: "2025-11-25".into(),
            display: "завтра".into(),
        });
        let json = serde_json::to_string(&block).unwrap();
        let back: ConstraintBlock = serde_json::from_str(&json).unwrap();
        assert!(back.should_exclude_doctor(Some("Дан"), None));
        assert_eq!(back.desired_service.as_deref(), Some("виниры"));
    }
}
