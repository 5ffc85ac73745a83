//! Deterministic language service.
//!
//! Detection is script + keyword based (no external call), cached in KV
//! for 30 days keyed by a hash of the normalized phone. Also owns the
//! localized template fragments used by the fast path and fallback
//! replies, affirmative/negative phrase sets, currency formatting, and
//! fuzzy service-alias matching.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use mg_domain::{Language, Result};
use mg_store::KvStore;

/// Similarity cutoff for fuzzy alias matching.
const ALIAS_FUZZY_THRESHOLD: f64 = 0.88;

pub struct LanguageService {
    kv: Arc<dyn KvStore>,
    cache_ttl: Duration,
}

impl LanguageService {
    pub fn new(kv: Arc<dyn KvStore>, cache_ttl: Duration) -> Self {
        Self { kv, cache_ttl }
    }

    // ── detection ────────────────────────────────────────────────

    /// Detect the message language from script and keywords.
    pub fn detect(&self, text: &str) -> Language {
        let mut cyrillic = 0usize;
        let mut hebrew = 0usize;
        let mut letters = 0usize;
        for c in text.chars() {
            if c.is_alphabetic() {
                letters += 1;
                let cp = c as u32;
                if (0x0400..=0x04FF).contains(&cp) {
                    cyrillic += 1;
                } else if (0x0590..=0x05FF).contains(&cp) {
                    hebrew += 1;
                }
            }
        }
        if letters > 0 {
            if cyrillic * 2 > letters {
                return Language::Ru;
            }
            if hebrew * 2 > letters {
                return Language::He;
            }
        }

        let lower = text.to_lowercase();
        if lower.chars().any(|c| "ñ¿¡".contains(c))
            || ["cuánto", "cuanto", "hola", "gracias", "cita", "precio", "quiero"]
                .iter()
                .any(|kw| lower.contains(kw))
        {
            return Language::Es;
        }
        if ["the", "what", "how", "when", "appointment", "book", "price", "hello"]
            .iter()
            .any(|kw| contains_word(&lower, kw))
        {
            return Language::En;
        }

        Language::default()
    }

    /// Detect and remember per phone. The cached value wins so the
    /// conversation language doesn't flap on short messages.
    pub async fn detect_and_cache(&self, text: &str, phone: &str) -> Result<Language> {
        let key = Self::cache_key(phone);
        if let Some(code) = self.kv.get(&key).await? {
            return Ok(Language::from_code(&code));
        }

        let detected = self.detect(text);
        self.kv.set_ex(&key, detected.code(), self.cache_ttl).await?;
        Ok(detected)
    }

    /// Test hook: drop a phone's cached detection.
    pub async fn flush_cached(&self, phone: &str) -> Result<()> {
        self.kv.delete(&Self::cache_key(phone)).await
    }

    fn cache_key(phone: &str) -> String {
        let normalized: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        format!("lang:{}", hex::encode(hasher.finalize()))
    }

    // ── alias matching ───────────────────────────────────────────

    /// Match a service alias in the message: exact containment first,
    /// then fuzzy token-window comparison.
    pub fn match_service_alias(
        &self,
        message: &str,
        aliases: &HashMap<String, Uuid>,
    ) -> Option<(Uuid, f64)> {
        let normalized = normalize_text(message);
        let mut best: Option<(Uuid, f64)> = None;

        for (alias, service_id) in aliases {
            let alias_norm = normalize_text(alias);
            if alias_norm.is_empty() {
                continue;
            }

            let score = if contains_word(&normalized, &alias_norm) {
                1.0
            } else {
                best_window_similarity(&normalized, &alias_norm)
            };

            if score >= ALIAS_FUZZY_THRESHOLD
                && best.map_or(true, |(_, s)| score > s)
            {
                best = Some((*service_id, score));
            }
        }

        best
    }

    // ── affirmative / negative ───────────────────────────────────

    pub fn is_affirmative(&self, message: &str, language: Language) -> bool {
        let normalized = normalize_text(message);
        affirmative_phrases(language)
            .iter()
            .any(|p| normalized == *p || contains_word(&normalized, p))
    }

    pub fn is_negative(&self, message: &str, language: Language) -> bool {
        let normalized = normalize_text(message);
        negative_phrases(language)
            .iter()
            .any(|p| normalized == *p || contains_word(&normalized, p))
    }

    // ── templates ────────────────────────────────────────────────

    pub fn greeting(&self, language: Language, first_name: Option<&str>) -> String {
        let base = match language {
            Language::Ru => "Здравствуйте",
            Language::Es => "¡Hola",
            Language::He => "שלום",
            Language::En => "Hello",
        };
        match first_name {
            Some(name) if language == Language::Es => format!("{base}, {name}!"),
            Some(name) => format!("{base}, {name}!"),
            None if language == Language::Es => format!("{base}!"),
            None => format!("{base}!"),
        }
    }

    /// Price reply for the PRICE lane.
    pub fn price_reply(
        &self,
        language: Language,
        service_name: &str,
        price: f64,
        currency: &str,
    ) -> String {
        let amount = self.format_currency(price, currency, language);
        match language {
            Language::Ru => format!("{service_name} стоит {amount}. Хотите записаться?"),
            Language::Es => format!("{service_name} cuesta {amount}. ¿Le gustaría agendar una cita?"),
            Language::He => format!("{service_name} עולה {amount}. לקבוע תור?"),
            Language::En => format!("{service_name} costs {amount}. Would you like to book an appointment?"),
        }
    }

    /// Service-info reply (duration / preparation).
    pub fn service_info_reply(
        &self,
        language: Language,
        service_name: &str,
        duration_minutes: u32,
    ) -> String {
        match language {
            Language::Ru => format!(
                "{service_name} занимает примерно {duration_minutes} минут. Хотите записаться?"
            ),
            Language::Es => format!(
                "{service_name} dura aproximadamente {duration_minutes} minutos. ¿Le gustaría agendar una cita?"
            ),
            Language::He => {
                format!("{service_name} אורך כ-{duration_minutes} דקות. לקבוע תור?")
            }
            Language::En => format!(
                "{service_name} takes about {duration_minutes} minutes. Would you like to book an appointment?"
            ),
        }
    }

    /// Generic holding phrase: "let me check with the team".
    pub fn holding_reply(&self, language: Language) -> String {
        match language {
            Language::Ru => "Передал ваш запрос команде клиники — скоро вернусь с ответом.".into(),
            Language::Es => "He pasado su consulta al equipo de la clínica, le responderé pronto.".into(),
            Language::He => "העברתי את הבקשה לצוות המרפאה, אחזור אליך בקרוב.".into(),
            Language::En => "Let me check with the team — I'll get back to you shortly.".into(),
        }
    }

    /// Fallback when generation failed or budgets ran out.
    pub fn fallback_reply(&self, language: Language) -> String {
        match language {
            Language::Ru => {
                "Извините, не смог обработать запрос. Попробуйте, пожалуйста, ещё раз.".into()
            }
            Language::Es => {
                "Disculpe, no pude procesar su mensaje. Por favor intente de nuevo.".into()
            }
            Language::He => "מצטער, לא הצלחתי לעבד את הבקשה. נסה שוב בבקשה.".into(),
            Language::En => "Sorry, I couldn't process that. Please try again.".into(),
        }
    }

    pub fn format_currency(&self, amount: f64, currency: &str, language: Language) -> String {
        let symbol = match currency {
            "USD" => "$",
            "EUR" => "€",
            "RUB" => "₽",
            "ILS" => "₪",
            "MXN" => "MX$",
            other => other,
        };
        match language {
            // Decimal comma locales.
            Language::Ru | Language::Es => {
                let formatted = format!("{amount:.2}").replace('.', ",");
                format!("{formatted} {symbol}")
            }
            _ => format!("{symbol}{amount:.2}"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers & phrase tables
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lowercase, trim, strip punctuation, collapse whitespace.
pub fn normalize_text(text: &str) -> String {
    let lower = text.to_lowercase();
    let stripped: String = lower
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack
        .split_whitespace()
        .collect::<Vec<_>>()
        .windows(needle.split_whitespace().count().max(1))
        .any(|window| window.join(" ") == needle)
}

/// Best normalized-Levenshtein similarity between the alias and any
/// window of the same token count in the message.
fn best_window_similarity(message: &str, alias: &str) -> f64 {
    let alias_tokens = alias.split_whitespace().count().max(1);
    let tokens: Vec<&str> = message.split_whitespace().collect();
    let mut best: f64 = 0.0;
    for window in tokens.windows(alias_tokens) {
        let candidate = window.join(" ");
        let score = strsim::normalized_levenshtein(&candidate, alias);
        if score > best {
            best = score;
        }
    }
    best
}

fn affirmative_phrases(language: Language) -> &'static [&'static str] {
    match language {
        Language::Ru => &["да", "давай", "давайте", "хорошо", "ок", "конечно", "ага"],
        Language::Es => &["sí", "si", "claro", "dale", "por supuesto", "ok", "bueno"],
        Language::He => &["כן", "בטח", "בסדר", "אוקיי"],
        Language::En => &["yes", "yeah", "yep", "sure", "ok", "okay", "of course"],
    }
}

fn negative_phrases(language: Language) -> &'static [&'static str] {
    match language {
        Language::Ru => &["нет", "не надо", "не хочу", "потом", "не сейчас"],
        Language::Es => &["no", "no gracias", "después", "ahora no"],
        Language::He => &["לא", "לא תודה", "אחר כך"],
        Language::En => &["no", "nope", "not now", "no thanks", "later"],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mg_store::MemoryKv;

    fn service() -> LanguageService {
        LanguageService::new(Arc::new(MemoryKv::new()), Duration::from_secs(86_400 * 30))
    }

    #[test]
    fn detects_by_script() {
        let svc = service();
        assert_eq!(svc.detect("Запишите меня на завтра"), Language::Ru);
        assert_eq!(svc.detect("שלום, אפשר תור?"), Language::He);
        assert_eq!(svc.detect("cuánto cuesta limpieza?"), Language::Es);
        assert_eq!(svc.detect("how much is a cleaning?"), Language::En);
    }

    #[tokio::test]
    async fn cached_detection_sticks_per_phone() {
        let svc = service();
        let first = svc.detect_and_cache("привет", "+1 (555) 000-1").await.unwrap();
        assert_eq!(first, Language::Ru);
        // A short ambiguous follow-up keeps the cached language.
        let second = svc.detect_and_cache("ok", "+15550001").await.unwrap();
        assert_eq!(second, Language::Ru);

        svc.flush_cached("+15550001").await.unwrap();
        let third = svc.detect_and_cache("ok", "+15550001").await.unwrap();
        assert_ne!(third, Language::Ru);
    }

    #[test]
    fn alias_exact_match_scores_full() {
        let svc = service();
        let id = Uuid::new_v4();
        let aliases = HashMap::from([("limpieza".to_owned(), id)]);
        let (matched, score) = svc
            .match_service_alias("cuánto cuesta limpieza?", &aliases)
            .unwrap();
        assert_eq!(matched, id);
        assert_eq!(score, 1.0);
    }

    #[test]
    fn alias_fuzzy_match_tolerates_typos() {
        let svc = service();
        let id = Uuid::new_v4();
        let aliases = HashMap::from([("limpieza".to_owned(), id)]);
        let (matched, score) = svc
            .match_service_alias("precio de limpeza por favor", &aliases)
            .unwrap();
        assert_eq!(matched, id);
        assert!(score >= 0.88 && score < 1.0);
    }

    #[test]
    fn alias_garbage_does_not_match() {
        let svc = service();
        let aliases = HashMap::from([("limpieza".to_owned(), Uuid::new_v4())]);
        assert!(svc.match_service_alias("hola buenos dias", &aliases).is_none());
    }

    #[test]
    fn affirmative_and_negative_sets() {
        let svc = service();
        assert!(svc.is_affirmative("Да, давайте", Language::Ru));
        assert!(svc.is_negative("no gracias", Language::Es));
        assert!(!svc.is_affirmative("tell me more", Language::En));
    }

    #[test]
    fn currency_formatting_is_locale_aware() {
        let svc = service();
        assert_eq!(svc.format_currency(50.0, "USD", Language::Es), "50,00 $");
        assert_eq!(svc.format_currency(50.0, "USD", Language::En), "$50.00");
        assert_eq!(svc.format_currency(1200.5, "RUB", Language::Ru), "1200,50 ₽");
    }
}
