//! Constraint extraction from user messages.
//!
//! Keyword-driven and intentionally conservative: a false negative
//! costs one clarifying question, a false constraint injection poisons
//! every later tool call. Every extracted entity passes a validation
//! gauntlet (length, token count, sentence-fragment blacklist, verbal
//! suffixes) before it is allowed anywhere near the constraint block.

use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;

use mg_domain::Language;

use crate::block::TimeWindow;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pattern tables
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn meta_reset_phrases(language: Language) -> &'static [&'static str] {
    match language {
        Language::Ru => &[
            "забудь всё",
            "забудь все",
            "забудь про всё",
            "забудь про все",
            "начать заново",
            "сбросить",
            "начни сначала",
            "previous intents",
        ],
        Language::En => &[
            "forget everything",
            "start over",
            "reset",
            "previous intents",
            "clear context",
            "start fresh",
        ],
        Language::Es => &["olvida todo", "empezar de nuevo", "resetear", "borrar todo"],
        Language::He => &["שכח הכל", "התחל מחדש", "איפוס"],
    }
}

fn forget_keywords(language: Language) -> &'static [&'static str] {
    match language {
        Language::Ru => &["забудь", "забудьте", "не нужен", "не надо", "не хочу"],
        Language::En => &["forget", "don't need", "don't want", "not interested"],
        Language::Es => &["olvida", "no necesito", "no quiero"],
        Language::He => &["שכח", "לא צריך", "לא רוצה"],
    }
}

/// Words that mark a capture as a sentence fragment, not an entity.
fn fragment_blacklist(language: Language) -> &'static [&'static str] {
    match language {
        Language::Ru => &[
            "списке", "врачей", "сказал", "сказала", "записать", "нашли", "выдали",
            "попросил", "попросила", "которого", "которую", "потом", "после",
        ],
        Language::En => &[
            "list", "said", "told", "asked", "found", "showed", "doctor", "doctors",
            "which", "whom", "that", "then", "after",
        ],
        Language::Es => &[
            "lista", "dijo", "preguntó", "encontró", "mostró", "médico", "médicos",
            "cual", "quien", "entonces", "después",
        ],
        Language::He => &["רשימה", "אמר", "אמרה", "ביקש", "מצא", "הראה", "רופא", "רופאים"],
    }
}

const TOMORROW_KEYWORDS: &[&str] = &["завтра", "tomorrow", "mañana", "מחר"];
const TODAY_KEYWORDS: &[&str] = &["сегодня", "today", "hoy", "היום"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Extractor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Date/time pulled from a message, resolved against the clinic day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedWhen {
    /// ISO date, when present.
    pub date: Option<String>,
    /// "HH:00", when present.
    pub time: Option<String>,
    /// Human-readable form in the message's language.
    pub display: String,
}

pub struct ConstraintExtractor {
    time_patterns: Vec<Regex>,
    switch_patterns: Vec<Regex>,
}

impl Default for ConstraintExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstraintExtractor {
    pub fn new() -> Self {
        let time_patterns = [
            r"(\d{1,2})\s*(?:утра|am|часов|часа|ч\.?)", // 11 утра, 11am, 11 часов
            r"в\s*(\d{1,2})(?:\s|$|,|\.|:)",            // в 11
            r"на\s*(\d{1,2})(?:\s|$|,|\.)",             // на 11
            r"at\s*(\d{1,2})",                          // at 11
            r"^(\d{1,2})$",                             // just "11"
            r",\s*(\d{1,2})(?:\s|$)",                   // "Завтра, 11"
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static pattern"))
        .collect();

        // Bounded captures keep full sentences out of the entities.
        let switch_patterns = [
            r"вместо\s+([а-яё\s]{3,25}?)\s+(?:хочу|желаю|нужно|нужна)\s+([а-яё\s]{3,25}?)(?:\s*$|[.,!?])",
            r"не\s+([а-яё\s]{3,20}?),?\s+а\s+([а-яё\s]{3,20}?)(?:\s*$|[.,!?])",
            r"instead of\s+([a-z\s]{3,25}?),?\s+(?:i want|prefer)\s+([a-z\s]{3,25}?)(?:\s*$|[.,!?])",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static pattern"))
        .collect();

        Self {
            time_patterns,
            switch_patterns,
        }
    }

    /// Detect meta-commands that reset conversation context entirely.
    pub fn detect_meta_reset(&self, message: &str, language: Language) -> bool {
        let message = message.to_lowercase();
        for phrase in meta_reset_phrases(language) {
            if message.contains(phrase) {
                tracing::info!(%phrase, "meta-reset detected");
                return true;
            }
        }
        false
    }

    /// Detect "forget about X" patterns. Returns validated entities.
    pub fn detect_forget(&self, message: &str, language: Language) -> Vec<String> {
        let message = message.to_lowercase();
        let mut entities = Vec::new();

        for keyword in forget_keywords(language) {
            if !message.contains(keyword) {
                continue;
            }
            let pattern = format!(
                r"{}\s+(?:про\s+)?([а-яёa-z\s]{{3,25}}?)(?:\s+и\s+|\s*$|[.,!?])",
                regex::escape(keyword)
            );
            let Ok(re) = Regex::new(&pattern) else {
                continue;
            };
            for captures in re.captures_iter(&message) {
                let entity = captures[1].trim().to_owned();
                if entity.is_empty() {
                    continue;
                }
                if self.validate_entity(&entity, language) {
                    if !entities.contains(&entity) {
                        entities.push(entity);
                    }
                } else {
                    tracing::warn!(%entity, "rejected entity in forget pattern");
                }
            }
        }

        entities
    }

    /// Detect "instead of X, want Y". Returns (exclude, desired).
    pub fn detect_switch(&self, message: &str, language: Language) -> Option<(String, String)> {
        let message = message.to_lowercase();
        for re in &self.switch_patterns {
            let Some(captures) = re.captures(&message) else {
                continue;
            };
            let exclude = captures[1].trim().to_owned();
            let desired = captures[2].trim().to_owned();

            if !self.validate_entity(&exclude, language) {
                tracing::warn!(entity = %exclude, "rejected exclude entity in switch");
                continue;
            }
            if !self.validate_entity(&desired, language) {
                tracing::warn!(entity = %desired, "rejected desired entity in switch");
                continue;
            }
            return Some((exclude, desired));
        }
        None
    }

    /// Extract a concrete date and/or hour ("Завтра, 11", "mañana a las 10"),
    /// resolved against `reference` (today in the clinic timezone).
    pub fn extract_date_time(
        &self,
        message: &str,
        reference: NaiveDate,
        language: Language,
    ) -> Option<ExtractedWhen> {
        let message = message.to_lowercase();
        let mut date = None;
        let mut display = String::new();

        if TOMORROW_KEYWORDS.iter().any(|kw| message.contains(kw)) {
            let target = reference + Duration::days(1);
            date = Some(target.format("%Y-%m-%d").to_string());
            display = word_for(language, "tomorrow").to_owned();
        } else if TODAY_KEYWORDS.iter().any(|kw| message.contains(kw)) {
            date = Some(reference.format("%Y-%m-%d").to_string());
            display = word_for(language, "today").to_owned();
        }

        let mut time = None;
        for pattern in &self.time_patterns {
            if let Some(captures) = pattern.captures(&message) {
                if let Ok(hour) = captures[1].parse::<u32>() {
                    if hour <= 23 {
                        time = Some(format!("{hour:02}:00"));
                        if display.is_empty() {
                            display = format!("{hour}:00");
                        } else if language == Language::Ru {
                            display = format!("{display} в {hour}:00");
                        } else {
                            display = format!("{display} at {hour}:00");
                        }
                        break;
                    }
                }
            }
        }

        if date.is_none() && time.is_none() {
            return None;
        }

        let display_text = display.as_str();
        tracing::info!(?date, ?time, when_display = display_text, "extracted date/time");
        Some(ExtractedWhen {
            date,
            time,
            display,
        })
    }

    /// Normalize relative range expressions ("next week") to an absolute
    /// window in the clinic calendar.
    pub fn normalize_time_window(
        &self,
        message: &str,
        reference: NaiveDate,
        language: Language,
    ) -> Option<TimeWindow> {
        let message = message.to_lowercase();
        let keywords: &[&str] = match language {
            Language::Ru => &["следующая неделя", "следующей неделе", "на следующей неделе"],
            Language::En => &["next week"],
            Language::Es => &["la próxima semana", "próxima semana"],
            Language::He => &["שבוע הבא"],
        };

        if !keywords.iter().any(|kw| message.contains(kw)) {
            return None;
        }

        // Next Monday through Sunday; a Monday reference jumps a full week.
        let mut days_until_monday =
            (7 - reference.weekday().num_days_from_monday() as i64) % 7;
        if days_until_monday == 0 {
            days_until_monday = 7;
        }
        let start = reference + Duration::days(days_until_monday);
        let end = start + Duration::days(6);

        let display = match language {
            Language::Ru => format!("{}–{} {}", start.day(), end.day(), month_name_ru(end.month())),
            _ => format!("{}–{}", start.format("%d"), end.format("%d %B")),
        };

        Some(TimeWindow {
            start: start.format("%Y-%m-%d").to_string(),
            end: end.format("%Y-%m-%d").to_string(),
            display,
        })
    }

    /// Validation gauntlet for an extracted entity.
    fn validate_entity(&self, entity: &str, language: Language) -> bool {
        let entity = entity.trim();
        if entity.is_empty() || entity.chars().count() > 50 {
            return false;
        }
        if entity.split_whitespace().count() > 4 {
            return false;
        }

        let lower = entity.to_lowercase();
        for word in fragment_blacklist(language) {
            if lower.contains(word) {
                return false;
            }
        }

        // Russian verbal suffixes: past tense and infinitives.
        if language == Language::Ru {
            for suffix in ["ли", "ла", "ло", "ть", "ти", "чь"] {
                if lower.ends_with(suffix) {
                    return false;
                }
            }
        }

        true
    }
}

fn word_for(language: Language, key: &str) -> &'static str {
    match (language, key) {
        (Language::Ru, "tomorrow") => "завтра",
        (Language::Ru, "today") => "сегодня",
        (Language::Es, "tomorrow") => "mañana",
        (Language::Es, "today") => "hoy",
        (Language::He, "tomorrow") => "מחר",
        (Language::He, "today") => "היום",
        (_, "today") => "today",
        _ => "tomorrow",
    }
}

fn month_name_ru(month: u32) -> &'static str {
    match month {
        1 => "января",
        2 => "февраля",
        3 => "марта",
        4 => "апреля",
        5 => "мая",
        6 => "июня",
        7 => "июля",
        8 => "августа",
        9 => "сентября",
        10 => "октября",
        11 => "ноября",
        12 => "декабря",
        _ => "",
    }
}
