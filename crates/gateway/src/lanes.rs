//! Message routing lanes.
//!
//! First match wins: pending-action replies, service-info questions,
//! price alias hits, FAQ keywords, scheduling keywords, and finally the
//! COMPLEX lane (full LLM orchestration). FAQ/PRICE/SERVICE_INFO are
//! answered without the LLM.

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use mg_domain::Language;
use mg_sessions::EpisodeState;

use crate::language::{normalize_text, LanguageService};

/// PRICE lane requires this alias confidence.
const PRICE_CONFIDENCE: f64 = 0.90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Faq,
    Price,
    ServiceInfo,
    Scheduling,
    Complex,
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Lane::Faq => "faq",
            Lane::Price => "price",
            Lane::ServiceInfo => "service_info",
            Lane::Scheduling => "scheduling",
            Lane::Complex => "complex",
        })
    }
}

/// Routing decision with the evidence that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct Routing {
    pub lane: Lane,
    pub reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Set when a service-info question has no bound service yet.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub needs_service_clarification: bool,
}

impl Routing {
    fn lane(lane: Lane, reason: &'static str) -> Self {
        Self {
            lane,
            reason,
            service_id: None,
            confidence: None,
            needs_service_clarification: false,
        }
    }
}

pub struct Router<'a> {
    language: &'a LanguageService,
}

impl<'a> Router<'a> {
    pub fn new(language: &'a LanguageService) -> Self {
        Self { language }
    }

    pub fn classify(
        &self,
        message: &str,
        language: Language,
        episode: &EpisodeState,
        service_aliases: &HashMap<String, Uuid>,
    ) -> Routing {
        // 1/2. Pending action replies.
        if episode.pending_action.as_deref() == Some("offer_booking") {
            if self.language.is_affirmative(message, language) {
                return Routing::lane(Lane::Scheduling, "affirmative_to_booking_offer");
            }
            if self.language.is_negative(message, language) {
                return Routing::lane(Lane::Faq, "negative_to_booking_offer");
            }
        }

        // 3. Service-info questions ("how long", "what's included").
        if has_keyword(message, service_info_keywords(language)) {
            let mut routing = Routing::lane(Lane::ServiceInfo, "service_info");
            match &episode.last_service_mentioned {
                Some(service) => {
                    routing.service_id = service.parse().ok();
                }
                None => routing.needs_service_clarification = true,
            }
            return routing;
        }

        // 4. Service alias → PRICE.
        if let Some((service_id, confidence)) =
            self.language.match_service_alias(message, service_aliases)
        {
            if confidence >= PRICE_CONFIDENCE {
                let mut routing = Routing::lane(Lane::Price, "service_alias_match");
                routing.service_id = Some(service_id);
                routing.confidence = Some(confidence);
                return routing;
            }
        }

        // 5. FAQ keywords.
        if has_keyword(message, faq_keywords(language)) {
            return Routing::lane(Lane::Faq, "faq_keywords");
        }

        // 6. Scheduling keywords need a bound service to stay fast.
        if has_keyword(message, scheduling_keywords(language)) {
            if episode.last_service_mentioned.is_some() {
                return Routing::lane(Lane::Scheduling, "scheduling_with_context");
            }
            return Routing::lane(Lane::Complex, "scheduling_no_context");
        }

        // 7. Everything else.
        Routing::lane(Lane::Complex, "default_complex")
    }
}

fn has_keyword(message: &str, keywords: &[&str]) -> bool {
    let normalized = normalize_text(message);
    keywords.iter().any(|kw| normalized.contains(kw))
}

fn scheduling_keywords(language: Language) -> &'static [&'static str] {
    match language {
        Language::Ru => &[
            "запись", "записаться", "назначить", "перенести", "перезаписаться", "отменить",
            "отмена", "когда",
        ],
        Language::Es => &[
            "cita", "agendar", "reservar", "turno", "reprogramar", "cancelar", "anular", "cuando",
        ],
        Language::He => &["תור", "לקבוע", "לבטל", "מתי"],
        Language::En => &[
            "appointment", "book", "schedule", "reschedule", "cancel", "when",
        ],
    }
}

fn faq_keywords(language: Language) -> &'static [&'static str] {
    match language {
        Language::Ru => &[
            "часы", "работаем", "открыто", "закрыто", "график", "адрес", "где", "находится",
            "страховка", "оплата", "картой",
        ],
        Language::Es => &[
            "horario", "horas", "abierto", "cerrado", "dirección", "direccion", "donde",
            "ubicación", "seguro", "pago", "tarjeta",
        ],
        Language::He => &["שעות", "כתובת", "איפה", "ביטוח", "תשלום"],
        Language::En => &[
            "hours", "open", "closed", "address", "where", "located", "insurance", "payment",
            "card",
        ],
    }
}

fn service_info_keywords(language: Language) -> &'static [&'static str] {
    match language {
        Language::Ru => &[
            "сколько времени", "как долго", "длительность", "как проходит", "что входит",
            "подготовка",
        ],
        Language::Es => &[
            "cuánto tiempo", "cuanto tiempo", "cuánto tarda", "duración", "duracion", "cómo es",
            "qué incluye", "que incluye", "preparación",
        ],
        Language::He => &["כמה זמן", "מה כולל", "הכנה"],
        Language::En => &[
            "how long", "duration", "what includes", "what s included", "preparation",
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mg_store::MemoryKv;
    use std::sync::Arc;
    use std::time::Duration;

    fn language_service() -> LanguageService {
        LanguageService::new(Arc::new(MemoryKv::new()), Duration::from_secs(60))
    }

    fn aliases(id: Uuid) -> HashMap<String, Uuid> {
        HashMap::from([("limpieza".to_owned(), id)])
    }

    #[test]
    fn affirmative_after_offer_goes_to_scheduling() {
        let svc = language_service();
        let router = Router::new(&svc);
        let episode = EpisodeState {
            pending_action: Some("offer_booking".into()),
            ..Default::default()
        };
        let routing = router.classify("sí", Language::Es, &episode, &HashMap::new());
        assert_eq!(routing.lane, Lane::Scheduling);
        assert_eq!(routing.reason, "affirmative_to_booking_offer");
    }

    #[test]
    fn negative_after_offer_goes_to_faq() {
        let svc = language_service();
        let router = Router::new(&svc);
        let episode = EpisodeState {
            pending_action: Some("offer_booking".into()),
            ..Default::default()
        };
        let routing = router.classify("no gracias", Language::Es, &episode, &HashMap::new());
        assert_eq!(routing.lane, Lane::Faq);
    }

    #[test]
    fn alias_match_routes_to_price_with_binding() {
        let svc = language_service();
        let router = Router::new(&svc);
        let id = Uuid::new_v4();
        let routing = router.classify(
            "cuánto cuesta limpieza?",
            Language::Es,
            &EpisodeState::default(),
            &aliases(id),
        );
        assert_eq!(routing.lane, Lane::Price);
        assert_eq!(routing.service_id, Some(id));
        assert!(routing.confidence.unwrap() >= 0.90);
    }

    #[test]
    fn service_info_without_context_asks_for_clarification() {
        let svc = language_service();
        let router = Router::new(&svc);
        let routing = router.classify(
            "how long does it take?",
            Language::En,
            &EpisodeState::default(),
            &HashMap::new(),
        );
        assert_eq!(routing.lane, Lane::ServiceInfo);
        assert!(routing.needs_service_clarification);
    }

    #[test]
    fn scheduling_without_bound_service_is_complex() {
        let svc = language_service();
        let router = Router::new(&svc);
        let routing = router.classify(
            "I want to book",
            Language::En,
            &EpisodeState::default(),
            &HashMap::new(),
        );
        assert_eq!(routing.lane, Lane::Complex);
        assert_eq!(routing.reason, "scheduling_no_context");
    }

    #[test]
    fn scheduling_with_bound_service_stays_fast() {
        let svc = language_service();
        let router = Router::new(&svc);
        let episode = EpisodeState {
            last_service_mentioned: Some(Uuid::new_v4().to_string()),
            ..Default::default()
        };
        let routing = router.classify("book me in", Language::En, &episode, &HashMap::new());
        assert_eq!(routing.lane, Lane::Scheduling);
    }

    #[test]
    fn default_is_complex() {
        let svc = language_service();
        let router = Router::new(&svc);
        let routing = router.classify(
            "Book Dr. Shtern tomorrow at 11",
            Language::En,
            &EpisodeState::default(),
            &HashMap::new(),
        );
        // "book" is a scheduling keyword without service context.
        assert_eq!(routing.lane, Lane::Complex);
    }
}
