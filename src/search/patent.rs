//! Patent provider
//!
//! Searches a local patent record file: a JSON array of records with a
//! publication number, title and abstract. Records are indexed whole (no
//! chunking) with the same BM25 corpus the local provider uses.

use super::index::{fingerprint_files, CorpusEntry, IndexCache};
use super::{param_str, param_usize, ProviderError, SearchProvider, SourceDoc, SourceSet};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
struct PatentRecord {
    publication_number: String,
    title: String,
    #[serde(default, rename = "abstract")]
    abstract_text: String,
    #[serde(default)]
    assignee: Option<String>,
    #[serde(default)]
    publication_date: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl PatentRecord {
    fn into_entry(self) -> CorpusEntry {
        let url = self.url.unwrap_or_else(|| {
            format!(
                "https://patents.google.com/patent/{}",
                self.publication_number.replace([' ', '-'], "")
            )
        });
        let mut text = self.abstract_text;
        if let Some(assignee) = self.assignee {
            text.push_str(&format!("\nAssignee: {}", assignee));
        }
        if let Some(date) = self.publication_date {
            text.push_str(&format!("\nPublished: {}", date));
        }
        CorpusEntry {
            title: format!("{}: {}", self.publication_number, self.title),
            url,
            text,
        }
    }
}

pub struct PatentSearch {
    cache: IndexCache,
}

impl PatentSearch {
    pub fn new(index_dir: PathBuf) -> Self {
        Self {
            cache: IndexCache::new(index_dir),
        }
    }

    fn records_path(params: &Value) -> Result<PathBuf, ProviderError> {
        param_str(params, "records_path")
            .map(PathBuf::from)
            .ok_or_else(|| ProviderError::Config("patent provider requires 'records_path'".to_string()))
    }

    async fn ensure_index(
        &self,
        path: PathBuf,
    ) -> Result<std::sync::Arc<super::index::Corpus>, ProviderError> {
        if !path.is_file() {
            return Err(ProviderError::Config(format!(
                "patent records file {} does not exist",
                path.display()
            )));
        }
        let key = path.to_string_lossy().to_string();
        let fingerprint = fingerprint_files(std::slice::from_ref(&path), "patent")?;
        self.cache
            .refresh(&key, fingerprint, move || load_records(&path))
            .await
    }
}

fn load_records(path: &std::path::Path) -> Result<Vec<CorpusEntry>, ProviderError> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| ProviderError::Index(format!("{}: {}", path.display(), e)))?;
    let records: Vec<PatentRecord> = serde_json::from_str(&json)
        .map_err(|e| ProviderError::Parse(format!("invalid patent records: {}", e)))?;
    Ok(records.into_iter().map(PatentRecord::into_entry).collect())
}

#[async_trait]
impl SearchProvider for PatentSearch {
    fn id(&self) -> &str {
        "patent"
    }

    fn description(&self) -> &str {
        "Patent abstracts from a local patent database"
    }

    fn query_guidelines(&self) -> &str {
        "Write claim-style keyword queries (3-6 terms) naming the technical mechanism, \
         component, or process, the way a patent abstract would describe it. Avoid \
         marketing terms and brand names."
    }

    async fn prepare(&self, _job_id: &str, params: &Value) -> Result<(), ProviderError> {
        if param_str(params, "records_path").is_none() {
            return Ok(());
        }
        self.ensure_index(Self::records_path(params)?).await?;
        Ok(())
    }

    async fn search(&self, queries: &[String], params: &Value) -> Result<SourceSet, ProviderError> {
        let path = Self::records_path(params)?;
        let top_k = param_usize(params, "top_k", 10);
        let corpus = match self.cache.current(&path.to_string_lossy()) {
            Some(corpus) => corpus,
            None => self.ensure_index(path).await?,
        };

        let mut sources = SourceSet::new();
        for query in queries {
            sources.extend(corpus.search(query, top_k).into_iter().map(|(entry, _)| SourceDoc {
                title: entry.title.clone(),
                url: entry.url.clone(),
                snippet: entry.text.lines().next().unwrap_or_default().to_string(),
                full_text: Some(entry.text.clone()),
            }));
        }
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_records(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("patents.json");
        std::fs::write(
            &path,
            json!([
                {
                    "publication_number": "US 1234567",
                    "title": "Cryogenic qubit packaging",
                    "abstract": "A dilution refrigerator mount for superconducting qubits.",
                    "assignee": "Acme Quantum"
                },
                {
                    "publication_number": "EP-7654321",
                    "title": "Battery electrode",
                    "abstract": "Lithium anode coating.",
                    "url": "https://example.org/ep7654321"
                }
            ])
            .to_string(),
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn test_search_records() {
        let dir = tempfile::tempdir().unwrap();
        let records = write_records(dir.path());
        let provider = PatentSearch::new(dir.path().join("index"));
        let params = json!({ "records_path": records });

        provider.prepare("job", &params).await.unwrap();
        let sources = provider
            .search(&["superconducting qubits refrigerator".to_string()], &params)
            .await
            .unwrap();

        let docs: Vec<_> = sources.iter().collect();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "US 1234567: Cryogenic qubit packaging");
        assert_eq!(docs[0].url, "https://patents.google.com/patent/US1234567");
        assert!(docs[0].full_text.as_deref().unwrap().contains("Assignee: Acme Quantum"));
    }

    #[tokio::test]
    async fn test_explicit_url_kept() {
        let dir = tempfile::tempdir().unwrap();
        let records = write_records(dir.path());
        let provider = PatentSearch::new(dir.path().join("index"));
        let sources = provider
            .search(&["lithium anode".to_string()], &json!({ "records_path": records }))
            .await
            .unwrap();
        assert_eq!(sources.iter().next().unwrap().url, "https://example.org/ep7654321");
    }

    #[tokio::test]
    async fn test_invalid_records_are_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let provider = PatentSearch::new(dir.path().join("index"));
        let result = provider
            .search(&["q".to_string()], &json!({ "records_path": path }))
            .await;
        assert!(matches!(result, Err(ProviderError::Parse(_))));
    }
}
