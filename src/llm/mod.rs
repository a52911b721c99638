//! LLM Provider Clients and Abstractions
//!
//! This module provides a unified interface for interacting with the completion
//! backends the research engine uses. Provider-specific implementations sit
//! behind common traits:
//! - [`LLMClient`] - The core trait that all providers implement
//! - [`LLMClientFactoryTrait`] - Hands out clients by configured model name
//! - [`ProviderRegistry`] - Resolves `[models]` entries to `[providers]`
//! - [`structured::generate_structured`] - Schema-checked JSON completions
//!
//! # Supported Providers
//!
//! Enable providers via Cargo features:
//! - `ollama` - Local Ollama server (default)
//! - `openai` - OpenAI API and compatible endpoints

/// Core LLM client trait and provider selection.
pub mod client;
/// Registry for managing multiple LLM provider instances.
pub mod provider_registry;
/// JSON-schema constrained completions.
pub mod structured;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

pub use client::{LLMClient, LLMClientFactoryTrait, ModelParams, Provider};
pub use provider_registry::{ConfigBasedLLMFactory, ProviderRegistry};
