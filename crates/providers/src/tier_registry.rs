//! Tier → model resolution.
//!
//! Precedence, highest first:
//!   1. Active A/B experiment assignment for the sticky id.
//!   2. `TIER_<NAME>_MODEL` environment override — the operator's panic
//!      button, deliberately ABOVE the store so on-call can fix a bad
//!      mapping without store access.
//!   3. Clinic-specific store mapping.
//!   4. Global store mapping.
//!   5. Compiled-in default.
//!
//! Resolved models are validated against the capability matrix; an
//! unknown model falls back to the compiled-in default for the tier.
//! Store lookups are memoized for 60 seconds.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use mg_domain::capability::ModelCapability;
use mg_domain::Result;

use crate::tiers::{builtin_capabilities, infer_provider, ModelTier};

const CACHE_TTL: Duration = Duration::from_secs(60);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierMapping {
    pub tier: ModelTier,
    pub model_name: String,
    pub provider: String,
    /// `None` = global mapping.
    pub clinic_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentVariant {
    pub name: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Percentage weight; variant weights are cumulative over 100.
    pub weight: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub tier: ModelTier,
    /// `None` = all clinics; otherwise restricted to the listed ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinic_ids: Option<Vec<String>>,
    /// Ordered variants; order matters for bucket assignment.
    pub variants: Vec<ExperimentVariant>,
}

#[async_trait::async_trait]
pub trait TierStore: Send + Sync {
    async fn clinic_mapping(&self, tier: ModelTier, clinic_id: &str)
        -> Result<Option<TierMapping>>;
    async fn global_mapping(&self, tier: ModelTier) -> Result<Option<TierMapping>>;
    async fn running_experiments(&self) -> Result<Vec<Experiment>>;
    async fn model_capability(&self, model_name: &str) -> Result<Option<ModelCapability>>;
}

/// In-memory tier store; doubles as the fixture for tests.
#[derive(Default)]
pub struct MemoryTierStore {
    mappings: Mutex<Vec<TierMapping>>,
    experiments: Mutex<Vec<Experiment>>,
    capabilities: Mutex<Vec<ModelCapability>>,
}

impl MemoryTierStore {
    pub fn new() -> Self {
        let store = Self::default();
        *store.capabilities.lock() = builtin_capabilities();
        store
    }

    pub fn add_mapping(&self, mapping: TierMapping) {
        self.mappings.lock().push(mapping);
    }

    pub fn add_experiment(&self, experiment: Experiment) {
        self.experiments.lock().push(experiment);
    }

    pub fn add_capability(&self, capability: ModelCapability) {
        self.capabilities.lock().push(capability);
    }
}

#[async_trait::async_trait]
impl TierStore for MemoryTierStore {
    async fn clinic_mapping(
        &self,
        tier: ModelTier,
        clinic_id: &str,
    ) -> Result<Option<TierMapping>> {
        Ok(self
            .mappings
            .lock()
            .iter()
            .find(|m| m.tier == tier && m.clinic_id.as_deref() == Some(clinic_id))
            .cloned())
    }

    async fn global_mapping(&self, tier: ModelTier) -> Result<Option<TierMapping>> {
        Ok(self
            .mappings
            .lock()
            .iter()
            .find(|m| m.tier == tier && m.clinic_id.is_none())
            .cloned())
    }

    async fn running_experiments(&self) -> Result<Vec<Experiment>> {
        Ok(self.experiments.lock().clone())
    }

    async fn model_capability(&self, model_name: &str) -> Result<Option<ModelCapability>> {
        Ok(self
            .capabilities
            .lock()
            .iter()
            .find(|c| c.model_name == model_name)
            .cloned())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierResolution {
    pub tier: ModelTier,
    pub model_name: String,
    pub provider: String,
    /// 'experiment' | 'env' | 'clinic' | 'global' | 'default'
    pub source: &'static str,
    pub experiment_id: Option<String>,
    pub variant: Option<String>,
}

pub struct TierRegistry {
    store: Box<dyn TierStore>,
    mapping_cache: Mutex<HashMap<String, (Option<TierMapping>, Instant)>>,
    experiments_cache: Mutex<Option<(Vec<Experiment>, Instant)>>,
}

impl TierRegistry {
    pub fn new(store: Box<dyn TierStore>) -> Self {
        Self {
            store,
            mapping_cache: Mutex::new(HashMap::new()),
            experiments_cache: Mutex::new(None),
        }
    }

    /// Test hook: drop the memoized mappings and experiments.
    pub fn flush(&self) {
        self.mapping_cache.lock().clear();
        *self.experiments_cache.lock() = None;
    }

    /// Resolve a tier to a concrete model.
    ///
    /// `user_id` is the preferred sticky id (cross-device consistency);
    /// `session_id` is the fallback.
    pub async fn resolve(
        &self,
        tier: ModelTier,
        clinic_id: Option<&str>,
        session_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<TierResolution> {
        // 1. Experiments.
        if let Some(sticky_id) = user_id.or(session_id) {
            if let Some(resolution) = self.check_experiments(tier, clinic_id, sticky_id).await? {
                return self.validate(resolution).await;
            }
        }

        // 2. Environment override.
        if let Ok(model) = std::env::var(tier.env_var()) {
            if !model.is_empty() {
                tracing::warn!(tier = %tier, %model, "ENV override for tier");
                let provider = infer_provider(&model).to_owned();
                return self
                    .validate(TierResolution {
                        tier,
                        model_name: model,
                        provider,
                        source: "env",
                        experiment_id: None,
                        variant: None,
                    })
                    .await;
            }
        }

        // 3. Clinic mapping.
        if let Some(clinic_id) = clinic_id {
            if let Some(mapping) = self
                .cached_mapping(&format!("clinic:{clinic_id}:{tier}"), || {
                    self.store.clinic_mapping(tier, clinic_id)
                })
                .await?
            {
                return self
                    .validate(TierResolution {
                        tier,
                        model_name: mapping.model_name,
                        provider: mapping.provider,
                        source: "clinic",
                        experiment_id: None,
                        variant: None,
                    })
                    .await;
            }
        }

        // 4. Global mapping.
        if let Some(mapping) = self
            .cached_mapping(&format!("global:{tier}"), || self.store.global_mapping(tier))
            .await?
        {
            return self
                .validate(TierResolution {
                    tier,
                    model_name: mapping.model_name,
                    provider: mapping.provider,
                    source: "global",
                    experiment_id: None,
                    variant: None,
                })
                .await;
        }

        // 5. Compiled-in default.
        Ok(default_resolution(tier))
    }

    async fn cached_mapping<F, Fut>(
        &self,
        key: &str,
        fetch: F,
    ) -> Result<Option<TierMapping>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Option<TierMapping>>>,
    {
        {
            let cache = self.mapping_cache.lock();
            if let Some((value, at)) = cache.get(key) {
                if at.elapsed() < CACHE_TTL {
                    return Ok(value.clone());
                }
            }
        }

        let value = fetch().await?;
        self.mapping_cache
            .lock()
            .insert(key.to_owned(), (value.clone(), Instant::now()));
        Ok(value)
    }

    async fn experiments(&self) -> Result<Vec<Experiment>> {
        {
            let cache = self.experiments_cache.lock();
            if let Some((value, at)) = cache.as_ref() {
                if at.elapsed() < CACHE_TTL {
                    return Ok(value.clone());
                }
            }
        }

        let experiments = self.store.running_experiments().await?;
        *self.experiments_cache.lock() = Some((experiments.clone(), Instant::now()));
        Ok(experiments)
    }

    async fn check_experiments(
        &self,
        tier: ModelTier,
        clinic_id: Option<&str>,
        sticky_id: &str,
    ) -> Result<Option<TierResolution>> {
        for experiment in self.experiments().await? {
            if experiment.tier != tier {
                continue;
            }
            if let Some(clinic_ids) = &experiment.clinic_ids {
                let in_scope = clinic_id.is_some_and(|c| clinic_ids.iter().any(|id| id == c));
                if !in_scope {
                    continue;
                }
            }

            let Some(variant) = assign_variant(&experiment.id, sticky_id, &experiment.variants)
            else {
                continue;
            };

            let provider = variant
                .provider
                .clone()
                .unwrap_or_else(|| infer_provider(&variant.model).to_owned());
            return Ok(Some(TierResolution {
                tier,
                model_name: variant.model.clone(),
                provider,
                source: "experiment",
                experiment_id: Some(experiment.id.clone()),
                variant: Some(variant.name.clone()),
            }));
        }
        Ok(None)
    }

    /// Validate against the capability matrix; an unknown or inactive
    /// model falls back to the compiled-in default for the tier.
    async fn validate(&self, resolution: TierResolution) -> Result<TierResolution> {
        match self.store.model_capability(&resolution.model_name).await? {
            Some(capability) if capability.is_active => Ok(resolution),
            _ => {
                tracing::error!(
                    model = %resolution.model_name,
                    tier = %resolution.tier,
                    "model missing from capability matrix, using tier default"
                );
                Ok(default_resolution(resolution.tier))
            }
        }
    }
}

fn default_resolution(tier: ModelTier) -> TierResolution {
    let (model, provider) = tier.default_model();
    TierResolution {
        tier,
        model_name: model.to_owned(),
        provider: provider.to_owned(),
        source: "default",
        experiment_id: None,
        variant: None,
    }
}

/// Deterministic sticky assignment: SHA-256(experiment|sticky) mod 100
/// against cumulative variant weights.
pub fn assign_variant<'a>(
    experiment_id: &str,
    sticky_id: &str,
    variants: &'a [ExperimentVariant],
) -> Option<&'a ExperimentVariant> {
    let mut hasher = Sha256::new();
    hasher.update(format!("{experiment_id}:{sticky_id}").as_bytes());
    let digest = hasher.finalize();
    // First 8 bytes are plenty for a mod-100 bucket.
    let bucket = u64::from_be_bytes(digest[..8].try_into().expect("8 bytes")) % 100;

    let mut cumulative = 0u64;
    for variant in variants {
        cumulative += variant.weight as u64;
        if bucket < cumulative {
            return Some(variant);
        }
    }
    None
}
