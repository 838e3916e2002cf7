//! Provider registration by name.
//!
//! `llm.provider` in the config names a factory; the registry turns the
//! rest of the `llm` section into a live provider.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{LlmProvider, ProviderError};
use crate::config::LlmConfig;

pub trait ProviderFactory: Send + Sync {
    /// Name used in `llm.provider`, e.g. "anthropic".
    fn provider_type(&self) -> &'static str;

    fn create(&self, config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, ProviderError>;

    /// Cheap startup check: credentials present, URLs well formed.
    fn validate_config(&self, config: &LlmConfig) -> Result<(), ProviderError>;

    fn description(&self) -> &'static str {
        "LLM Provider"
    }
}

#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any with the same type.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .insert(factory.provider_type().to_string(), factory);
    }

    fn factory(&self, provider_type: &str) -> Result<&Arc<dyn ProviderFactory>, ProviderError> {
        self.factories.get(provider_type).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "Unknown provider type: '{}'. Available: {:?}",
                provider_type,
                self.available_types()
            ))
        })
    }

    /// Validate, then create the provider named by `config.provider`.
    pub fn create(&self, config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let factory = self.factory(&config.provider)?;
        factory.validate_config(config)?;
        factory.create(config)
    }

    pub fn validate(&self, config: &LlmConfig) -> Result<(), ProviderError> {
        self.factory(&config.provider)?.validate_config(config)
    }

    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    pub fn has_provider(&self, provider_type: &str) -> bool {
        self.factories.contains_key(provider_type)
    }

    /// Registry with every provider compiled into this build.
    #[cfg(feature = "anthropic")]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::AnthropicProviderFactory));
        registry
    }

    #[cfg(not(feature = "anthropic"))]
    pub fn with_defaults() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available_types())
            .finish()
    }
}
