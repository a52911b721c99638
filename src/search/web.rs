//! Web search provider using daedra
//!
//! daedra queries DuckDuckGo and needs no API key, which makes it the default
//! provider for every research step.

use super::{param_usize, ProviderError, SearchProvider, SourceDoc, SourceSet};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

const DEFAULT_MAX_RESULTS: usize = 5;

/// DuckDuckGo web search powered by daedra
pub struct DuckDuckGoSearch;

impl DuckDuckGoSearch {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DuckDuckGoSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    fn id(&self) -> &str {
        "duckduckgo"
    }

    fn description(&self) -> &str {
        "General web search via DuckDuckGo"
    }

    fn query_guidelines(&self) -> &str {
        "Write short natural-language web search queries (3-10 words). Include key \
         technical terms, product or organization names, and a year when recency matters. \
         Do not use boolean operators or field prefixes."
    }

    async fn search(&self, queries: &[String], params: &Value) -> Result<SourceSet, ProviderError> {
        let num_results = param_usize(params, "max_results", DEFAULT_MAX_RESULTS);
        let mut sources = SourceSet::new();
        let mut last_error = None;

        for query in queries {
            let args = daedra::SearchArgs {
                query: query.clone(),
                options: Some(daedra::SearchOptions {
                    num_results,
                    ..Default::default()
                }),
            };

            match daedra::tools::search::perform_search(&args).await {
                Ok(response) => {
                    debug!(query = %query, results = response.data.len(), "DuckDuckGo search");
                    sources.extend(response.data.iter().map(|r| SourceDoc {
                        title: r.title.clone(),
                        url: r.url.clone(),
                        snippet: r.description.clone(),
                        full_text: None,
                    }));
                }
                Err(e) => last_error = Some(ProviderError::Network(e.to_string())),
            }
        }

        // a single failed query is tolerated as long as another one returned
        match last_error {
            Some(err) if sources.is_empty() => Err(err),
            _ => Ok(sources),
        }
    }
}
