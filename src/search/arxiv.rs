//! arXiv provider
//!
//! Queries the public Atom API and parses entries with scraper.

use super::{param_usize, ProviderError, SearchProvider, SourceDoc, SourceSet};
use async_trait::async_trait;
use reqwest::StatusCode;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub struct ArxivSearch {
    client: reqwest::Client,
    base_url: String,
}

impl ArxivSearch {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("deepreport/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client, base_url }
    }

    async fn fetch(&self, query: &str, max_results: usize) -> Result<String, ProviderError> {
        let max_results = max_results.to_string();
        let search_query = format!("all:{}", query);
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("search_query", search_query.as_str()),
                ("start", "0"),
                ("max_results", max_results.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(ProviderError::Quota(format!("arXiv returned {}", status)));
        }
        if !status.is_success() {
            return Err(ProviderError::Network(format!("arXiv returned {}", status)));
        }
        Ok(response.text().await?)
    }
}

fn selector(css: &str) -> Result<Selector, ProviderError> {
    Selector::parse(css).map_err(|e| ProviderError::Parse(format!("bad selector {}: {}", css, e)))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn child_text(entry: &ElementRef<'_>, sel: &Selector) -> Option<String> {
    entry
        .select(sel)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|s| !s.is_empty())
}

/// Parse an arXiv Atom feed into sources
pub fn parse_feed(xml: &str) -> Result<Vec<SourceDoc>, ProviderError> {
    if !xml.contains("<feed") {
        return Err(ProviderError::Parse("response is not an Atom feed".to_string()));
    }

    let document = Html::parse_document(xml);
    let entry_sel = selector("entry")?;
    let title_sel = selector("title")?;
    let id_sel = selector("id")?;
    let summary_sel = selector("summary")?;
    let published_sel = selector("published")?;
    let author_sel = selector("author name")?;

    let docs = document
        .select(&entry_sel)
        .filter_map(|entry| {
            let url = child_text(&entry, &id_sel)?;
            let title = child_text(&entry, &title_sel).unwrap_or_else(|| url.clone());
            let summary = child_text(&entry, &summary_sel).unwrap_or_default();
            let authors: Vec<String> = entry
                .select(&author_sel)
                .map(|a| collapse_whitespace(&a.text().collect::<String>()))
                .collect();

            let mut full_text = String::new();
            if !authors.is_empty() {
                full_text.push_str(&format!("Authors: {}\n", authors.join(", ")));
            }
            if let Some(published) = child_text(&entry, &published_sel) {
                full_text.push_str(&format!("Published: {}\n", published));
            }
            full_text.push('\n');
            full_text.push_str(&summary);

            Some(SourceDoc {
                title,
                url,
                snippet: summary,
                full_text: Some(full_text),
            })
        })
        .collect();

    Ok(docs)
}

#[async_trait]
impl SearchProvider for ArxivSearch {
    fn id(&self) -> &str {
        "arxiv"
    }

    fn description(&self) -> &str {
        "Academic preprints from arXiv"
    }

    fn query_guidelines(&self) -> &str {
        "Write concise academic keyword queries (2-6 terms) using the vocabulary a paper \
         title or abstract would use. Avoid questions, filler words, and dates."
    }

    async fn search(&self, queries: &[String], params: &Value) -> Result<SourceSet, ProviderError> {
        let max_results = param_usize(params, "max_results", 5);
        let mut sources = SourceSet::new();
        for query in queries {
            let xml = self.fetch(query, max_results).await?;
            let docs = parse_feed(&xml)?;
            debug!(query = %query, results = docs.len(), "arXiv search");
            sources.extend(docs);
        }
        Ok(sources)
    }
}
