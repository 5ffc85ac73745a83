//! Provider adapter registry.
//!
//! One adapter instance per model, lazily created on first use and
//! cached for the process lifetime. Tests register fakes under any
//! (provider, model) pair and the rest of the system cannot tell the
//! difference.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use mg_domain::error::{Error, Result};

use crate::anthropic::AnthropicProvider;
use crate::google::GoogleProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;

/// API credentials and endpoints per provider family.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: Option<String>,
    pub google_api_key: Option<String>,
    pub google_base_url: Option<String>,
}

impl ProviderCredentials {
    /// Read credentials from the conventional environment variables.
    pub fn from_env() -> Self {
        Self {
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            openai_base_url: std::env::var("OPENAI_BASE_URL").ok(),
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            anthropic_base_url: std::env::var("ANTHROPIC_BASE_URL").ok(),
            google_api_key: std::env::var("GOOGLE_API_KEY").ok(),
            google_base_url: std::env::var("GOOGLE_BASE_URL").ok(),
        }
    }
}

pub struct ProviderRegistry {
    credentials: ProviderCredentials,
    adapters: RwLock<HashMap<String, Arc<dyn LlmProvider>>>,
}

impl ProviderRegistry {
    pub fn new(credentials: ProviderCredentials) -> Self {
        Self {
            credentials,
            adapters: RwLock::new(HashMap::new()),
        }
    }

    /// Register an adapter explicitly (tests, custom endpoints).
    pub fn register(&self, provider: &str, model: &str, adapter: Arc<dyn LlmProvider>) {
        self.adapters
            .write()
            .insert(cache_key(provider, model), adapter);
    }

    /// Get (or lazily create) the adapter for a (provider, model) pair.
    pub fn adapter(&self, provider: &str, model: &str) -> Result<Arc<dyn LlmProvider>> {
        let key = cache_key(provider, model);
        if let Some(adapter) = self.adapters.read().get(&key) {
            return Ok(adapter.clone());
        }

        let adapter = self.create(provider, model)?;
        self.adapters.write().insert(key, adapter.clone());
        Ok(adapter)
    }

    fn create(&self, provider: &str, model: &str) -> Result<Arc<dyn LlmProvider>> {
        match provider {
            "openai" | "glm" | "deepseek" => {
                let key = self.credentials.openai_api_key.clone().ok_or_else(|| {
                    Error::Config(format!("no API key configured for provider '{provider}'"))
                })?;
                let base = self
                    .credentials
                    .openai_base_url
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com/v1".into());
                Ok(Arc::new(OpenAiCompatProvider::new(provider, base, key, model)?))
            }
            "anthropic" => {
                let key = self.credentials.anthropic_api_key.clone().ok_or_else(|| {
                    Error::Config("no API key configured for provider 'anthropic'".into())
                })?;
                let base = self
                    .credentials
                    .anthropic_base_url
                    .clone()
                    .unwrap_or_else(|| "https://api.anthropic.com".into());
                Ok(Arc::new(AnthropicProvider::new(provider, base, key, model)?))
            }
            "google" => {
                let key = self.credentials.google_api_key.clone().ok_or_else(|| {
                    Error::Config("no API key configured for provider 'google'".into())
                })?;
                let base = self
                    .credentials
                    .google_base_url
                    .clone()
                    .unwrap_or_else(|| "https://generativelanguage.googleapis.com".into());
                Ok(Arc::new(GoogleProvider::new(provider, base, key, model)?))
            }
            other => Err(Error::Config(format!("unknown provider '{other}'"))),
        }
    }
}

fn cache_key(provider: &str, model: &str) -> String {
    format!("{provider}/{model}")
}
