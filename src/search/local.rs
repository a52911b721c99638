//! Local document provider
//!
//! Indexes every text-like file under `document_path` into word chunks and
//! searches them with BM25. HTML files are reduced to their visible text.
//! The index is rebuilt only when the set of files (or their size/mtime)
//! changes.

use super::index::{fingerprint_files, CorpusEntry, IndexCache, TextChunker};
use super::{param_str, param_usize, ProviderError, SearchProvider, SourceDoc, SourceSet};
use async_trait::async_trait;
use scraper::Html;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "rst", "csv", "json", "log"];
const HTML_EXTENSIONS: &[&str] = &["html", "htm"];

pub struct LocalDocumentSearch {
    cache: IndexCache,
}

struct LocalParams {
    document_path: PathBuf,
    chunk_size: usize,
    chunk_overlap: usize,
    top_k: usize,
    ephemeral: bool,
}

impl LocalParams {
    fn from_value(params: &Value) -> Result<Self, ProviderError> {
        let document_path = param_str(params, "document_path").ok_or_else(|| {
            ProviderError::Config("local provider requires 'document_path'".to_string())
        })?;
        Ok(Self {
            document_path: PathBuf::from(document_path),
            chunk_size: param_usize(params, "chunk_size", 300),
            chunk_overlap: param_usize(params, "chunk_overlap", 50),
            top_k: param_usize(params, "top_k", 5),
            ephemeral: params
                .get("ephemeral")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        })
    }

    fn key(&self) -> String {
        self.document_path.to_string_lossy().to_string()
    }
}

impl LocalDocumentSearch {
    pub fn new(index_dir: PathBuf) -> Self {
        Self {
            cache: IndexCache::new(index_dir),
        }
    }

    async fn ensure_index(
        &self,
        params: &LocalParams,
    ) -> Result<std::sync::Arc<super::index::Corpus>, ProviderError> {
        let root = params.document_path.clone();
        let files = tokio::task::spawn_blocking(move || collect_files(&root))
            .await
            .map_err(|e| ProviderError::Index(format!("File scan failed: {}", e)))??;
        if files.is_empty() {
            return Err(ProviderError::Index(format!(
                "no readable documents under {}",
                params.document_path.display()
            )));
        }

        let extra = format!("{}/{}", params.chunk_size, params.chunk_overlap);
        let fingerprint = fingerprint_files(&files, &extra)?;
        let chunker = TextChunker::new(params.chunk_size, params.chunk_overlap);

        self.cache
            .refresh(&params.key(), fingerprint, move || build_entries(&files, &chunker))
            .await
    }
}

/// Text-like files under `root`, sorted for a stable fingerprint
fn collect_files(root: &Path) -> Result<Vec<PathBuf>, ProviderError> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    if !root.is_dir() {
        return Err(ProviderError::Config(format!(
            "document path {} does not exist",
            root.display()
        )));
    }

    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| ProviderError::Index(format!("{}: {}", dir.display(), e)))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if is_indexable(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

fn is_indexable(path: &Path) -> bool {
    let ext = extension(path);
    TEXT_EXTENSIONS.contains(&ext.as_str()) || HTML_EXTENSIONS.contains(&ext.as_str())
}

fn read_document(path: &Path) -> Option<String> {
    let raw = std::fs::read(path).ok()?;
    let text = String::from_utf8_lossy(&raw).to_string();
    if HTML_EXTENSIONS.contains(&extension(path).as_str()) {
        let html = Html::parse_document(&text);
        Some(html.root_element().text().collect::<Vec<_>>().join(" "))
    } else {
        Some(text)
    }
}

fn build_entries(files: &[PathBuf], chunker: &TextChunker) -> Result<Vec<CorpusEntry>, ProviderError> {
    let mut entries = Vec::new();
    for file in files {
        let Some(text) = read_document(file) else {
            debug!(path = %file.display(), "Skipping unreadable document");
            continue;
        };
        let title = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file.display().to_string());
        let url = file.display().to_string();
        entries.extend(chunker.chunk(&text).into_iter().map(|chunk| CorpusEntry {
            title: title.clone(),
            url: url.clone(),
            text: chunk,
        }));
    }
    info!(files = files.len(), chunks = entries.len(), "Indexed local documents");
    Ok(entries)
}

#[async_trait]
impl SearchProvider for LocalDocumentSearch {
    fn id(&self) -> &str {
        "local"
    }

    fn description(&self) -> &str {
        "Full-text search over the user's local documents"
    }

    fn query_guidelines(&self) -> &str {
        "Write short keyword queries (2-5 distinctive terms) that would literally appear in \
         the documents. Ranking is lexical, so use exact technical terms and avoid synonyms \
         or full sentences."
    }

    async fn prepare(&self, job_id: &str, params: &Value) -> Result<(), ProviderError> {
        // no document folder configured: nothing to index
        if param_str(params, "document_path").is_none() {
            return Ok(());
        }
        let params = LocalParams::from_value(params)?;
        self.ensure_index(&params).await?;
        if params.ephemeral {
            self.cache.register_ephemeral(&params.key(), job_id);
        }
        Ok(())
    }

    async fn search(&self, queries: &[String], params: &Value) -> Result<SourceSet, ProviderError> {
        let params = LocalParams::from_value(params)?;
        let corpus = match self.cache.current(&params.key()) {
            Some(corpus) => corpus,
            None => self.ensure_index(&params).await?,
        };

        // group hits by file: best chunk as snippet, all matched chunks as full text
        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, (String, Vec<String>)> = HashMap::new();
        for query in queries {
            for (entry, _score) in corpus.search(query, params.top_k) {
                let slot = grouped.entry(entry.url.clone()).or_insert_with(|| {
                    order.push(entry.url.clone());
                    (entry.title.clone(), Vec::new())
                });
                if !slot.1.contains(&entry.text) {
                    slot.1.push(entry.text.clone());
                }
            }
        }

        let mut sources = SourceSet::new();
        for url in order {
            if let Some((title, chunks)) = grouped.remove(&url) {
                sources.push(SourceDoc {
                    title,
                    snippet: chunks.first().cloned().unwrap_or_default(),
                    full_text: Some(chunks.join("\n...\n")),
                    url,
                });
            }
        }
        Ok(sources)
    }

    async fn release(&self, job_id: &str) {
        for key in self.cache.release(job_id) {
            debug!(job_id, key = %key, "Released ephemeral local index");
        }
    }
}
