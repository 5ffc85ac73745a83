//! Clinic and patient directories.
//!
//! Read-mostly lookups consumed by the pipeline: the clinic profile
//! (services, doctors, aliases, FAQ answers) and the patient profile
//! (identity, language, safety data that survives session resets).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mg_domain::{Language, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Clinic profile
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read-only snapshot of a clinic, cached with a short TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicProfile {
    pub clinic_id: Uuid,
    pub name: String,
    /// IANA timezone name.
    pub timezone: String,
    /// Free-text business hours per language, shown in FAQ replies.
    #[serde(default)]
    pub business_hours: String,
    #[serde(default)]
    pub address: String,
    /// alias (lowercased) → service id.
    #[serde(default)]
    pub service_aliases: HashMap<String, Uuid>,
    /// ISO currency code for price replies.
    #[serde(default = "d_currency")]
    pub currency: String,
}

fn d_currency() -> String {
    "USD".into()
}

#[async_trait::async_trait]
pub trait ClinicDirectory: Send + Sync {
    async fn clinic(&self, clinic_id: Uuid) -> Result<Option<ClinicProfile>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Patient profile
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cross-session patient identity. The `hard_*` fields and allergies
/// carry across session resets; everything episode-level does not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientProfile {
    pub patient_id: Uuid,
    pub phone: String,
    pub clinic_id: Uuid,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub preferred_language: Option<Language>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub hard_doctor_bans: Vec<String>,
    #[serde(default)]
    pub hard_service_bans: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait PatientDirectory: Send + Sync {
    async fn find_by_phone(&self, clinic_id: Uuid, phone: &str) -> Result<Option<PatientProfile>>;

    /// Create-or-touch a patient record for an inbound message.
    /// Repeated upserts inside the dedupe window are no-ops.
    async fn upsert(
        &self,
        clinic_id: Uuid,
        phone: &str,
        profile_name: Option<&str>,
        language: Language,
    ) -> Result<PatientProfile>;

    async fn add_hard_doctor_ban(&self, patient_id: Uuid, name: &str) -> Result<()>;

    async fn set_preferred_language(&self, patient_id: Uuid, language: Language) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory implementations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct MemoryClinicDirectory {
    clinics: RwLock<HashMap<Uuid, ClinicProfile>>,
}

impl MemoryClinicDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, profile: ClinicProfile) {
        self.clinics.write().insert(profile.clinic_id, profile);
    }
}

#[async_trait::async_trait]
impl ClinicDirectory for MemoryClinicDirectory {
    async fn clinic(&self, clinic_id: Uuid) -> Result<Option<ClinicProfile>> {
        Ok(self.clinics.read().get(&clinic_id).cloned())
    }
}

pub struct MemoryPatientDirectory {
    patients: RwLock<HashMap<Uuid, PatientProfile>>,
    /// (clinic, phone) → last upsert, for the dedupe window.
    recent_upserts: RwLock<HashMap<(Uuid, String), Instant>>,
    upsert_ttl: Duration,
}

impl MemoryPatientDirectory {
    pub fn new(upsert_ttl: Duration) -> Self {
        Self {
            patients: RwLock::new(HashMap::new()),
            recent_upserts: RwLock::new(HashMap::new()),
            upsert_ttl,
        }
    }

    pub fn seed(&self, profile: PatientProfile) {
        self.patients.write().insert(profile.patient_id, profile);
    }
}

#[async_trait::async_trait]
impl PatientDirectory for MemoryPatientDirectory {
    async fn find_by_phone(&self, clinic_id: Uuid, phone: &str) -> Result<Option<PatientProfile>> {
        Ok(self
            .patients
            .read()
            .values()
            .find(|p| p.clinic_id == clinic_id && p.phone == phone)
            .cloned())
    }

    async fn upsert(
        &self,
        clinic_id: Uuid,
        phone: &str,
        profile_name: Option<&str>,
        language: Language,
    ) -> Result<PatientProfile> {
        let key = (clinic_id, phone.to_owned());
        let recently = self
            .recent_upserts
            .read()
            .get(&key)
            .is_some_and(|at| at.elapsed() < self.upsert_ttl);

        if let Some(existing) = self.find_by_phone(clinic_id, phone).await? {
            if !recently {
                self.recent_upserts.write().insert(key, Instant::now());
            }
            return Ok(existing);
        }

        let profile = PatientProfile {
            patient_id: Uuid::new_v4(),
            phone: phone.to_owned(),
            clinic_id,
            first_name: profile_name.map(str::to_owned),
            last_name: None,
            preferred_language: Some(language),
            allergies: Vec::new(),
            hard_doctor_bans: Vec::new(),
            hard_service_bans: Vec::new(),
            created_at: Utc::now(),
        };
        self.patients
            .write()
            .insert(profile.patient_id, profile.clone());
        self.recent_upserts.write().insert(key, Instant::now());
        tracing::info!(patient_id = %profile.patient_id, "created patient profile");
        Ok(profile)
    }

    async fn add_hard_doctor_ban(&self, patient_id: Uuid, name: &str) -> Result<()> {
        if let Some(profile) = self.patients.write().get_mut(&patient_id) {
            if !profile.hard_doctor_bans.iter().any(|b| b == name) {
                profile.hard_doctor_bans.push(name.to_owned());
            }
        }
        Ok(())
    }

    async fn set_preferred_language(&self, patient_id: Uuid, language: Language) -> Result<()> {
        if let Some(profile) = self.patients.write().get_mut(&patient_id) {
            profile.preferred_language = Some(language);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_returns_existing_profile() {
        let directory = MemoryPatientDirectory::new(Duration::from_secs(60));
        let clinic = Uuid::new_v4();
        let first = directory
            .upsert(clinic, "+15550001", Some("Ana"), Language::Es)
            .await
            .unwrap();
        let second = directory
            .upsert(clinic, "+15550001", None, Language::Es)
            .await
            .unwrap();
        assert_eq!(first.patient_id, second.patient_id);
        assert_eq!(second.first_name.as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn hard_bans_accumulate_without_duplicates() {
        let directory = MemoryPatientDirectory::new(Duration::from_secs(60));
        let clinic = Uuid::new_v4();
        let profile = directory
            .upsert(clinic, "+1", None, Language::En)
            .await
            .unwrap();
        directory.add_hard_doctor_ban(profile.patient_id, "Dan").await.unwrap();
        directory.add_hard_doctor_ban(profile.patient_id, "Dan").await.unwrap();
        let stored = directory.find_by_phone(clinic, "+1").await.unwrap().unwrap();
        assert_eq!(stored.hard_doctor_bans, vec!["Dan".to_owned()]);
    }
}
