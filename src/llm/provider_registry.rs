//! Provider Registry for managing multiple LLM providers
//!
//! This module provides a registry for managing named LLM providers
//! that can be configured via TOML configuration. Research settings refer to
//! models by their `[models]` name (`planner`, `writer`, ...); the registry
//! resolves the model -> provider chain into a client.

use crate::llm::client::{LLMClient, LLMClientFactoryTrait, Provider};
use crate::types::{AppError, Result};
use crate::utils::toml_config::{DeepReportConfig, ModelConfig, ProviderConfig};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Registry for managing multiple named LLM providers
pub struct ProviderRegistry {
    /// Provider configurations keyed by name
    providers: HashMap<String, ProviderConfig>,
    /// Model configurations keyed by name
    models: HashMap<String, ModelConfig>,
}

impl ProviderRegistry {
    /// Create a new empty provider registry
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            models: HashMap::new(),
        }
    }

    /// Create a provider registry from TOML configuration
    pub fn from_config(config: &DeepReportConfig) -> Self {
        Self {
            providers: config.providers.clone(),
            models: config.models.clone(),
        }
    }

    pub fn register_provider(&mut self, name: &str, config: ProviderConfig) {
        self.providers.insert(name.to_string(), config);
    }

    pub fn register_model(&mut self, name: &str, config: ModelConfig) {
        self.models.insert(name.to_string(), config);
    }

    pub fn get_model(&self, name: &str) -> Option<&ModelConfig> {
        self.models.get(name)
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Get all model names
    pub fn model_names(&self) -> Vec<&str> {
        self.models.keys().map(|s| s.as_str()).collect()
    }

    /// Create an LLM client for a specific model by name
    ///
    /// This resolves the model -> provider chain and creates the appropriate client.
    pub async fn create_client_for_model(&self, model_name: &str) -> Result<Box<dyn LLMClient>> {
        let model_config = self.get_model(model_name).ok_or_else(|| {
            AppError::Configuration(format!("Model '{}' not found in configuration", model_name))
        })?;

        let provider_config = self.providers.get(&model_config.provider).ok_or_else(|| {
            AppError::Configuration(format!(
                "Provider '{}' referenced by model '{}' not found",
                model_config.provider, model_name
            ))
        })?;

        let provider = Provider::from_model_config(model_config, provider_config)?;
        provider.create_client().await
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Factory that creates clients from the configured registry and reuses
/// them across jobs.
pub struct ConfigBasedLLMFactory {
    registry: Arc<ProviderRegistry>,
    clients: parking_lot::Mutex<HashMap<String, Arc<dyn LLMClient>>>,
}

impl ConfigBasedLLMFactory {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            clients: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Create a factory from TOML configuration
    pub fn from_config(config: &DeepReportConfig) -> Self {
        Self::new(Arc::new(ProviderRegistry::from_config(config)))
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }
}

#[async_trait]
impl LLMClientFactoryTrait for ConfigBasedLLMFactory {
    async fn create_for_model(&self, model_name: &str) -> Result<Arc<dyn LLMClient>> {
        if let Some(client) = self.clients.lock().get(model_name) {
            return Ok(client.clone());
        }

        let client: Arc<dyn LLMClient> =
            Arc::from(self.registry.create_client_for_model(model_name).await?);
        debug!(model = model_name, resolved = client.model_name(), "Created LLM client");
        self.clients
            .lock()
            .insert(model_name.to_string(), client.clone());
        Ok(client)
    }
}
