//! Search providers
//!
//! Every backend implements [`SearchProvider`]: given a batch of queries and
//! the provider's parameter block it returns a [`SourceSet`] of ranked sources.
//!
//! - `duckduckgo` - web search via daedra
//! - `tavily` - Tavily search API
//! - `arxiv` - arXiv Atom API
//! - `local` - BM25 over a local document folder
//! - `patent` - BM25 over a local patent record file
//!
//! Provider failures are [`ProviderError`]s. They are recoverable: a failing
//! provider contributes an error block to the research context and the
//! remaining providers carry on.

pub mod arxiv;
pub mod index;
pub mod local;
pub mod patent;
pub mod tavily;
pub mod web;

use crate::research::config::ResearchConfig;
use crate::utils::toml_config::DeepReportConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Recoverable failure of a single search provider
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("could not parse response: {0}")]
    Parse(String),

    #[error("provider misconfigured: {0}")]
    Config(String),

    #[error("index unavailable: {0}")]
    Index(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Parse(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

/// One ranked source returned by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDoc {
    pub title: String,
    pub url: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,
}

/// A cited source: what ends up in a job's reference list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub url: String,
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.title.is_empty() {
            write!(f, "{}", self.url)
        } else {
            write!(f, "[{}]({})", self.title, self.url)
        }
    }
}

/// Ordered list of sources, unique by URL
#[derive(Debug, Clone, Default)]
pub struct SourceSet {
    docs: Vec<SourceDoc>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source. A repeated URL keeps the first entry, filling in its
    /// full text if the first one had none.
    pub fn push(&mut self, doc: SourceDoc) {
        if let Some(existing) = self.docs.iter_mut().find(|d| d.url == doc.url) {
            if existing.full_text.is_none() {
                existing.full_text = doc.full_text;
            }
            return;
        }
        self.docs.push(doc);
    }

    pub fn extend<I: IntoIterator<Item = SourceDoc>>(&mut self, docs: I) {
        for doc in docs {
            self.push(doc);
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceDoc> {
        self.docs.iter()
    }

    pub fn citations(&self) -> Vec<Citation> {
        self.docs
            .iter()
            .map(|d| Citation {
                title: d.title.clone(),
                url: d.url.clone(),
            })
            .collect()
    }

    /// Render the sources as LLM context, truncating each source's full
    /// text to roughly `max_tokens_per_source` tokens.
    pub fn format(&self, max_tokens_per_source: usize) -> String {
        if self.docs.is_empty() {
            return "No sources found.".to_string();
        }

        let mut out = String::from("Sources:\n\n");
        for doc in &self.docs {
            out.push_str(&format!("Source: {}\n===\n", doc.title));
            out.push_str(&format!("URL: {}\n===\n", doc.url));
            out.push_str(&format!(
                "Most relevant content from source: {}\n===\n",
                doc.snippet
            ));
            if let Some(ref text) = doc.full_text {
                out.push_str(&format!(
                    "Full source content limited to {} tokens: {}\n\n",
                    max_tokens_per_source,
                    truncate_to_tokens(text, max_tokens_per_source)
                ));
            }
        }
        out.trim_end().to_string()
    }
}

impl IntoIterator for SourceSet {
    type Item = SourceDoc;
    type IntoIter = std::vec::IntoIter<SourceDoc>;

    fn into_iter(self) -> Self::IntoIter {
        self.docs.into_iter()
    }
}

/// Cut text to about `max_tokens` tokens, assuming four characters a token.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    let limit = max_tokens.saturating_mul(4);
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let cut: String = text.chars().take(limit).collect();
    format!("{}... [truncated]", cut)
}

/// Read a `usize` parameter from a provider's parameter block
pub(crate) fn param_usize(params: &Value, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .unwrap_or(default)
}

pub(crate) fn param_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

/// A pluggable search backend
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Identifier used in configuration and section plans
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    /// How queries for this backend should be phrased; fed to the query
    /// generation prompt.
    fn query_guidelines(&self) -> &str;

    /// Build or refresh anything the provider needs before searching.
    async fn prepare(&self, _job_id: &str, _params: &Value) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn search(&self, queries: &[String], params: &Value)
        -> Result<SourceSet, ProviderError>;

    /// Drop per-job resources created by `prepare`.
    async fn release(&self, _job_id: &str) {}
}

/// Registry of search providers keyed by id
#[derive(Default, Clone)]
pub struct SearchRegistry {
    providers: HashMap<String, Arc<dyn SearchProvider>>,
}

impl SearchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in provider, configured from `config`
    pub fn from_config(config: &DeepReportConfig) -> Self {
        let timeout = std::time::Duration::from_secs(config.search.timeout_secs);
        let index_dir = PathBuf::from(&config.engine.index_dir);

        let mut registry = Self::new();
        registry.register(Arc::new(web::DuckDuckGoSearch::new()));
        registry.register(Arc::new(tavily::TavilySearch::new(
            config.search.tavily_base_url.clone(),
            config.resolve_env(&config.search.tavily_api_key_env),
            timeout,
        )));
        registry.register(Arc::new(arxiv::ArxivSearch::new(
            config.search.arxiv_base_url.clone(),
            timeout,
        )));
        registry.register(Arc::new(local::LocalDocumentSearch::new(index_dir.join("local"))));
        registry.register(Arc::new(patent::PatentSearch::new(index_dir.join("patent"))));
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn SearchProvider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn SearchProvider>> {
        self.providers.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// Providers from `requested` that the job may use and that exist,
    /// falling back to the job's default provider. Order is preserved and
    /// duplicates are dropped.
    pub fn usable(&self, requested: &[String], config: &ResearchConfig) -> Vec<String> {
        let mut seen = HashSet::new();
        let usable: Vec<String> = requested
            .iter()
            .map(|id| id.trim().to_lowercase())
            .filter(|id| config.is_available(id) && self.contains(id))
            .filter(|id| seen.insert(id.clone()))
            .collect();

        if usable.is_empty() {
            vec![config.default_search_provider.clone()]
        } else {
            usable
        }
    }

    /// Prepare every provider available to the job. Failures are logged and
    /// left for the provider to report again at search time.
    pub async fn prepare_all(&self, job_id: &str, config: &ResearchConfig) -> usize {
        let mut prepared = 0;
        for id in &config.available_search_providers {
            let Some(provider) = self.get(id) else {
                continue;
            };
            match provider.prepare(job_id, &config.params_for(id)).await {
                Ok(()) => prepared += 1,
                Err(e) => warn!(job_id, provider = %id, error = %e, "Provider preparation failed"),
            }
        }
        prepared
    }

    pub async fn release_all(&self, job_id: &str) {
        for provider in self.providers.values() {
            provider.release(job_id).await;
        }
    }

    /// Run each provider's queries and concatenate the results under
    /// per-provider headers. A failing provider yields an error block.
    pub async fn search_all(
        &self,
        queries_by_provider: &[(String, Vec<String>)],
        config: &ResearchConfig,
    ) -> ProviderResults {
        let searches = queries_by_provider.iter().map(|(id, queries)| async move {
            let result = match self.get(id) {
                Some(provider) => provider.search(queries, &config.params_for(id)).await,
                None => Err(ProviderError::Config(format!(
                    "unknown search provider '{}'",
                    id
                ))),
            };
            (id, result)
        });
        let outcomes = futures::future::join_all(searches).await;

        let mut results = ProviderResults::default();
        let mut blocks = Vec::with_capacity(outcomes.len());
        for (id, outcome) in outcomes {
            let header = id.to_uppercase();
            match outcome {
                Ok(sources) => {
                    debug!(provider = %id, sources = sources.len(), "Search completed");
                    blocks.push(format!(
                        "=== {} SEARCH RESULTS ===\n{}",
                        header,
                        sources.format(config.max_tokens_per_source)
                    ));
                    results.citations.extend(sources.citations());
                }
                Err(e) => {
                    warn!(provider = %id, error = %e, "Search provider failed");
                    blocks.push(format!("=== {} SEARCH ERROR ===\n{}", header, e));
                    results.failed.push(id.clone());
                }
            }
        }
        results.context = blocks.join("\n\n");
        results
    }
}

/// Combined output of [`SearchRegistry::search_all`]
#[derive(Debug, Clone, Default)]
pub struct ProviderResults {
    pub context: String,
    pub citations: Vec<Citation>,
    pub failed: Vec<String>,
}
