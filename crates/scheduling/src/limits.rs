//! LIMIT_OCCURRENCE counter reservations.
//!
//! Counters are rolling windows in KV. A reservation adds a uniquely
//! tagged member atomically (prune → check cap → insert); the token is
//! kept so any downstream failure can release exactly what it reserved.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use mg_domain::Result;
use mg_policy::Effect;
use mg_store::KvStore;

/// Token for one reserved occurrence; release it on rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitReservationToken {
    pub key: String,
    pub member: String,
}

pub struct LimitCounterStore {
    kv: Arc<dyn KvStore>,
}

impl LimitCounterStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Attempt a reservation. Returns `(allowed, token, count)`.
    pub async fn reserve(
        &self,
        key: &str,
        window: Duration,
        max_occurrences: u64,
    ) -> Result<(bool, Option<LimitReservationToken>, u64)> {
        let member = format!("{}:{}", chrono::Utc::now().timestamp_millis(), Uuid::new_v4());
        let outcome = self
            .kv
            .window_reserve(key, window, max_occurrences, &member)
            .await?;

        if !outcome.allowed {
            return Ok((false, None, outcome.count));
        }
        Ok((
            true,
            Some(LimitReservationToken {
                key: key.to_owned(),
                member,
            }),
            outcome.count,
        ))
    }

    /// Release a previously reserved occurrence.
    pub async fn release(&self, token: &LimitReservationToken) -> Result<()> {
        self.kv.window_release(&token.key, &token.member).await
    }
}

/// Resolve the counter key for a LIMIT_OCCURRENCE rule: fills the key
/// template's placeholders, or derives a default from the rule id.
pub fn limit_key(
    effect: &Effect,
    rule_id: &str,
    clinic_id: Uuid,
    patient_id: Option<Uuid>,
    doctor_id: Uuid,
) -> Option<String> {
    let Effect::LimitOccurrence { key, .. } = effect else {
        return None;
    };

    let template = key
        .clone()
        .unwrap_or_else(|| format!("limit:{{clinic_id}}:{rule_id}"));

    Some(
        template
            .replace("{clinic_id}", &clinic_id.to_string())
            .replace(
                "{patient_id}",
                &patient_id.map(|p| p.to_string()).unwrap_or_else(|| "anon".into()),
            )
            .replace("{doctor_id}", &doctor_id.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use mg_store::MemoryKv;

    #[tokio::test]
    async fn reserve_release_cycle() {
        let store = LimitCounterStore::new(Arc::new(MemoryKv::new()));
        let window = Duration::from_secs(3600);

        let (allowed, token, count) = store.reserve("k", window, 1).await.unwrap();
        assert!(allowed);
        assert_eq!(count, 1);

        let (denied, no_token, count) = store.reserve("k", window, 1).await.unwrap();
        assert!(!denied);
        assert!(no_token.is_none());
        assert_eq!(count, 1);

        store.release(&token.unwrap()).await.unwrap();
        let (allowed, _, _) = store.reserve("k", window, 1).await.unwrap();
        assert!(allowed);
    }

    #[test]
    fn key_template_fills_placeholders() {
        let clinic = Uuid::new_v4();
        let patient = Uuid::new_v4();
        let doctor = Uuid::new_v4();
        let effect = Effect::LimitOccurrence {
            key: Some("limit:{clinic_id}:{patient_id}:daily".into()),
            window_seconds: 86_400,
            max_occurrences: 5,
            explain_template: None,
        };
        let key = limit_key(&effect, "R1", clinic, Some(patient), doctor).unwrap();
        assert_eq!(key, format!("limit:{clinic}:{patient}:daily"));
    }

    #[test]
    fn missing_template_defaults_to_rule_id() {
        let clinic = Uuid::new_v4();
        let effect = Effect::LimitOccurrence {
            key: None,
            window_seconds: 60,
            max_occurrences: 1,
            explain_template: None,
        };
        let key = limit_key(&effect, "CAP", clinic, None, Uuid::new_v4()).unwrap();
        assert_eq!(key, format!("limit:{clinic}:CAP"));
    }

    #[test]
    fn non_limit_effects_have_no_key() {
        let effect = Effect::Deny {
            reason_code: None,
            explain_template: None,
        };
        assert!(limit_key(&effect, "R", Uuid::new_v4(), None, Uuid::new_v4()).is_none());
    }
}
