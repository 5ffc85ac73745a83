//! Fast-path lanes: templated answers without the LLM.
//!
//! PRICE, FAQ, and SERVICE_INFO replies come straight from clinic data
//! and the language templates. Any lookup or rendering failure falls
//! back to the COMPLEX lane instead of surfacing an error to the
//! patient. Every fast-path answer records its own latency and sets the
//! observable `fast_path` marker.

use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use mg_domain::trace::TraceEvent;
use mg_domain::Language;
use mg_scheduling::SchedulingRepo;
use mg_sessions::EpisodeState;

use crate::directory::ClinicProfile;
use crate::language::LanguageService;
use crate::lanes::{Lane, Routing};

/// A rendered fast-path reply.
#[derive(Debug, Clone)]
pub struct FastPathReply {
    pub text: String,
    pub lane: Lane,
    pub latency_ms: u64,
    /// Episode updates to persist (bound service, pending action).
    pub episode: EpisodeState,
}

pub struct FastPath {
    language: Arc<LanguageService>,
    scheduling: Arc<dyn SchedulingRepo>,
}

impl FastPath {
    pub fn new(language: Arc<LanguageService>, scheduling: Arc<dyn SchedulingRepo>) -> Self {
        Self {
            language,
            scheduling,
        }
    }

    /// Try to answer in-lane. `None` means: fall through to COMPLEX.
    pub async fn handle(
        &self,
        routing: &Routing,
        clinic: &ClinicProfile,
        language: Language,
        episode: &EpisodeState,
        first_name: Option<&str>,
    ) -> Option<FastPathReply> {
        let started = Instant::now();

        let reply = match routing.lane {
            Lane::Price => self.handle_price(routing, clinic, language, first_name).await,
            Lane::Faq => self.handle_faq(clinic, language, first_name),
            Lane::ServiceInfo => self.handle_service_info(routing, clinic, language, episode).await,
            _ => None,
        }?;

        let latency_ms = started.elapsed().as_millis() as u64;
        TraceEvent::FastPath {
            lane: routing.lane.to_string(),
            latency_ms,
        }
        .emit();

        Some(FastPathReply {
            latency_ms,
            ..reply
        })
    }

    async fn handle_price(
        &self,
        routing: &Routing,
        clinic: &ClinicProfile,
        language: Language,
        first_name: Option<&str>,
    ) -> Option<FastPathReply> {
        let service_id = routing.service_id?;
        let service = self
            .scheduling
            .service(clinic.clinic_id, service_id)
            .await
            .ok()
            .flatten()?;
        let price = service.price?;

        let greeting = self.language.greeting(language, first_name);
        let body = self
            .language
            .price_reply(language, &service.name, price, &clinic.currency);

        Some(FastPathReply {
            text: format!("{greeting} {body}"),
            lane: Lane::Price,
            latency_ms: 0,
            episode: EpisodeState {
                last_service_mentioned: Some(service_id.to_string()),
                pending_action: Some("offer_booking".into()),
                ..Default::default()
            },
        })
    }

    fn handle_faq(
        &self,
        clinic: &ClinicProfile,
        language: Language,
        first_name: Option<&str>,
    ) -> Option<FastPathReply> {
        if clinic.business_hours.is_empty() && clinic.address.is_empty() {
            return None;
        }

        let greeting = self.language.greeting(language, first_name);
        let mut lines = vec![greeting];
        if !clinic.business_hours.is_empty() {
            lines.push(match language {
                Language::Ru => format!("Мы работаем: {}.", clinic.business_hours),
                Language::Es => format!("Nuestro horario: {}.", clinic.business_hours),
                Language::He => format!("שעות הפעילות שלנו: {}.", clinic.business_hours),
                Language::En => format!("Our hours: {}.", clinic.business_hours),
            });
        }
        if !clinic.address.is_empty() {
            lines.push(match language {
                Language::Ru => format!("Адрес: {}.", clinic.address),
                Language::Es => format!("Dirección: {}.", clinic.address),
                Language::He => format!("כתובת: {}.", clinic.address),
                Language::En => format!("Address: {}.", clinic.address),
            });
        }

        Some(FastPathReply {
            text: lines.join(" "),
            lane: Lane::Faq,
            latency_ms: 0,
            episode: EpisodeState::default(),
        })
    }

    async fn handle_service_info(
        &self,
        routing: &Routing,
        clinic: &ClinicProfile,
        language: Language,
        episode: &EpisodeState,
    ) -> Option<FastPathReply> {
        let service_id: Uuid = routing
            .service_id
            .or_else(|| episode.last_service_mentioned.as_deref()?.parse().ok())?;

        let service = self
            .scheduling
            .service(clinic.clinic_id, service_id)
            .await
            .ok()
            .flatten()?;

        let text =
            self.language
                .service_info_reply(language, &service.name, service.duration_minutes);

        Some(FastPathReply {
            text,
            lane: Lane::ServiceInfo,
            latency_ms: 0,
            episode: EpisodeState {
                last_service_mentioned: Some(service_id.to_string()),
                pending_action: Some("offer_booking".into()),
                ..Default::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mg_scheduling::{MemorySchedulingRepo, Service};
    use mg_store::MemoryKv;
    use std::collections::HashMap;
    use std::time::Duration;

    fn fixture() -> (FastPath, ClinicProfile, Uuid) {
        let repo = Arc::new(MemorySchedulingRepo::new());
        let clinic_id = Uuid::new_v4();
        let service_id = Uuid::new_v4();
        repo.seed_service(
            clinic_id,
            Service {
                id: service_id,
                name: "Limpieza dental".into(),
                duration_minutes: 45,
                price: Some(50.0),
            },
        );
        let language = Arc::new(LanguageService::new(
            Arc::new(MemoryKv::new()),
            Duration::from_secs(60),
        ));
        let clinic = ClinicProfile {
            clinic_id,
            name: "Clinica Sol".into(),
            timezone: "America/New_York".into(),
            business_hours: "9:00–18:00".into(),
            address: "Av. Siempre Viva 123".into(),
            service_aliases: HashMap::from([("limpieza".to_owned(), service_id)]),
            currency: "USD".into(),
        };
        (FastPath::new(language, repo), clinic, service_id)
    }

    #[tokio::test]
    async fn price_lane_renders_localized_price_and_binds_service() {
        let (fastpath, clinic, service_id) = fixture();
        let routing = Routing {
            lane: Lane::Price,
            reason: "service_alias_match",
            service_id: Some(service_id),
            confidence: Some(1.0),
            needs_service_clarification: false,
        };

        let reply = fastpath
            .handle(&routing, &clinic, Language::Es, &EpisodeState::default(), Some("Ana"))
            .await
            .unwrap();

        assert!(reply.text.contains("Limpieza dental"));
        assert!(reply.text.contains("50,00 $"));
        assert_eq!(
            reply.episode.last_service_mentioned.as_deref(),
            Some(service_id.to_string().as_str())
        );
        assert_eq!(reply.episode.pending_action.as_deref(), Some("offer_booking"));
    }

    #[tokio::test]
    async fn price_without_price_data_falls_through() {
        let (fastpath, clinic, _) = fixture();
        let routing = Routing {
            lane: Lane::Price,
            reason: "service_alias_match",
            service_id: Some(Uuid::new_v4()), // unknown service
            confidence: Some(1.0),
            needs_service_clarification: false,
        };
        assert!(fastpath
            .handle(&routing, &clinic, Language::Es, &EpisodeState::default(), None)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn service_info_uses_remembered_service() {
        let (fastpath, clinic, service_id) = fixture();
        let routing = Routing {
            lane: Lane::ServiceInfo,
            reason: "service_info",
            service_id: None,
            confidence: None,
            needs_service_clarification: false,
        };
        let episode = EpisodeState {
            last_service_mentioned: Some(service_id.to_string()),
            ..Default::default()
        };

        let reply = fastpath
            .handle(&routing, &clinic, Language::En, &episode, None)
            .await
            .unwrap();
        assert!(reply.text.contains("45 minutes"));
    }

    #[tokio::test]
    async fn faq_renders_hours_and_address() {
        let (fastpath, clinic, _) = fixture();
        let routing = Routing {
            lane: Lane::Faq,
            reason: "faq_keywords",
            service_id: None,
            confidence: None,
            needs_service_clarification: false,
        };
        let reply = fastpath
            .handle(&routing, &clinic, Language::En, &EpisodeState::default(), None)
            .await
            .unwrap();
        assert!(reply.text.contains("9:00–18:00"));
        assert!(reply.text.contains("Siempre Viva"));
    }
}
