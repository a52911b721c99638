//! Tavily search API provider

use super::{param_str, param_usize, ProviderError, SearchProvider, SourceDoc, SourceSet};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct TavilySearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'a str,
    include_raw_content: bool,
}

#[derive(Debug, Deserialize)]
struct TavilySearchResponse {
    #[serde(default)]
    results: Vec<TavilySearchResult>,
}

#[derive(Debug, Deserialize)]
struct TavilySearchResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    raw_content: Option<String>,
}

pub struct TavilySearch {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl TavilySearch {
    pub fn new(base_url: String, api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn search_one(
        &self,
        api_key: &str,
        query: &str,
        params: &Value,
    ) -> Result<Vec<SourceDoc>, ProviderError> {
        let request = TavilySearchRequest {
            api_key,
            query,
            max_results: param_usize(params, "max_results", 5),
            search_depth: param_str(params, "search_depth").unwrap_or("basic"),
            include_raw_content: params
                .get("include_raw_content")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
        };

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        // Tavily reports plan limits with 432
        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 432 {
            return Err(ProviderError::Quota(format!("Tavily returned {}", status)));
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(ProviderError::Config("Tavily rejected the API key".to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Network(format!(
                "Tavily returned {}: {}",
                status, body
            )));
        }

        let body: TavilySearchResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(body
            .results
            .into_iter()
            .map(|r| SourceDoc {
                title: r.title,
                url: r.url,
                snippet: r.content,
                full_text: r.raw_content.filter(|t| !t.trim().is_empty()),
            })
            .collect())
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    fn id(&self) -> &str {
        "tavily"
    }

    fn description(&self) -> &str {
        "Web search tuned for LLM research via the Tavily API"
    }

    fn query_guidelines(&self) -> &str {
        "Write specific natural-language questions or keyword phrases, one topic per query. \
         Prefer precise technical vocabulary and named entities over generic wording."
    }

    async fn search(&self, queries: &[String], params: &Value) -> Result<SourceSet, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Config("Tavily API key is not set".to_string()))?;

        let mut sources = SourceSet::new();
        for query in queries {
            let docs = self.search_one(api_key, query, params).await?;
            debug!(query = %query, results = docs.len(), "Tavily search");
            sources.extend(docs);
        }
        Ok(sources)
    }
}
