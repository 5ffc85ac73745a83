//! LLM provider adapters and tier-based model resolution.
//!
//! Code never names models directly; it asks the [`TierRegistry`] for a
//! semantic tier (`routing`, `tool_calling`, …) and gets back a model +
//! provider that the [`ProviderRegistry`] turns into a cached adapter.

pub mod anthropic;
pub mod google;
pub mod openai_compat;
pub mod registry;
pub mod tier_registry;
pub mod tiers;
pub mod traits;

pub use registry::{ProviderCredentials, ProviderRegistry};
pub use tier_registry::{
    Experiment, ExperimentVariant, MemoryTierStore, TierMapping, TierRegistry, TierResolution,
    TierStore,
};
pub use tiers::ModelTier;
pub use traits::{ChatRequest, ChatResponse, LlmProvider};
