//! Local full-text indexing shared by the `local` and `patent` providers.
//!
//! A [`Corpus`] is a list of text entries plus a BM25 index over them. Corpora
//! are persisted as JSON under the index directory, keyed by a fingerprint of
//! their source files, so an unchanged document set is never re-indexed.
//!
//! [`IndexCache`] holds the live corpus per source path behind an
//! [`ArcSwapOption`]: a refresh builds a complete new corpus and swaps it in,
//! while searches already holding the old one finish against it.

use super::ProviderError;
use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// BM25
// ============================================================================

/// BM25 search index for lexical matching
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bm25Index {
    /// Document ID -> tokenized content
    documents: HashMap<String, Vec<String>>,
    /// Term -> document IDs containing term
    inverted_index: HashMap<String, HashSet<String>>,
    /// Document frequencies for each term
    document_frequencies: HashMap<String, usize>,
    doc_count: usize,
    avg_doc_length: f32,
    /// Term frequency saturation
    k1: f32,
    /// Length normalization
    b: f32,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            ..Default::default()
        }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.len() > 1)
            .map(String::from)
            .collect()
    }

    pub fn add_document(&mut self, id: &str, content: &str) {
        let tokens = Self::tokenize(content);

        let unique_terms: HashSet<_> = tokens.iter().cloned().collect();
        for term in &unique_terms {
            *self.document_frequencies.entry(term.clone()).or_insert(0) += 1;
            self.inverted_index
                .entry(term.clone())
                .or_default()
                .insert(id.to_string());
        }

        self.documents.insert(id.to_string(), tokens);
        self.doc_count += 1;

        let total_tokens: usize = self.documents.values().map(|v| v.len()).sum();
        self.avg_doc_length = total_tokens as f32 / self.doc_count as f32;
    }

    fn idf(&self, term: &str) -> f32 {
        let df = self.document_frequencies.get(term).copied().unwrap_or(0) as f32;
        let n = self.doc_count as f32;
        if df == 0.0 || n == 0.0 {
            return 0.0;
        }
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn score_document(&self, doc_id: &str, query_terms: &[String]) -> f32 {
        let Some(doc_tokens) = self.documents.get(doc_id) else {
            return 0.0;
        };

        let doc_len = doc_tokens.len() as f32;
        let mut term_freq: HashMap<&str, usize> = HashMap::new();
        for token in doc_tokens {
            *term_freq.entry(token.as_str()).or_insert(0) += 1;
        }

        query_terms
            .iter()
            .map(|term| {
                let tf = term_freq.get(term.as_str()).copied().unwrap_or(0) as f32;
                let numerator = tf * (self.k1 + 1.0);
                let denominator =
                    tf + self.k1 * (1.0 - self.b + self.b * doc_len / self.avg_doc_length);
                self.idf(term) * numerator / denominator
            })
            .sum()
    }

    /// Top-k document ids for `query`, best first
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(String, f32)> {
        let query_terms = Self::tokenize(query);
        if query_terms.is_empty() {
            return Vec::new();
        }

        let mut candidates: HashSet<&String> = HashSet::new();
        for term in &query_terms {
            if let Some(docs) = self.inverted_index.get(term) {
                candidates.extend(docs.iter());
            }
        }

        let mut results: Vec<(String, f32)> = candidates
            .into_iter()
            .map(|id| (id.clone(), self.score_document(id, &query_terms)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        // ties broken by id so results are stable across runs
        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        results.truncate(top_k);
        results
    }

    pub fn len(&self) -> usize {
        self.doc_count
    }

    pub fn is_empty(&self) -> bool {
        self.doc_count == 0
    }
}

// ============================================================================
// Chunking
// ============================================================================

/// Word-window chunker with overlap
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn chunk(&self, text: &str) -> Vec<String> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let step = self.chunk_size - self.chunk_overlap;

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < words.len() {
            let end = (start + self.chunk_size).min(words.len());
            chunks.push(words[start..end].join(" "));
            if end == words.len() {
                break;
            }
            start += step;
        }
        chunks
    }
}

// ============================================================================
// Corpus
// ============================================================================

/// A searchable unit of text and where it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusEntry {
    pub title: String,
    pub url: String,
    pub text: String,
}

/// Indexed entries, identified by the fingerprint of their sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Corpus {
    pub fingerprint: String,
    entries: Vec<CorpusEntry>,
    bm25: Bm25Index,
}

impl Corpus {
    pub fn build(fingerprint: String, entries: Vec<CorpusEntry>) -> Self {
        let mut bm25 = Bm25Index::new();
        for (i, entry) in entries.iter().enumerate() {
            bm25.add_document(&i.to_string(), &format!("{} {}", entry.title, entry.text));
        }
        Self {
            fingerprint,
            entries,
            bm25,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Best-matching entries for `query` with their scores
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(&CorpusEntry, f32)> {
        self.bm25
            .search(query, top_k)
            .into_iter()
            .filter_map(|(id, score)| {
                let idx: usize = id.parse().ok()?;
                self.entries.get(idx).map(|e| (e, score))
            })
            .collect()
    }

    pub fn save(&self, path: &Path) -> Result<(), ProviderError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ProviderError::Index(format!("Failed to create index dir: {}", e)))?;
        }
        let json = serde_json::to_string(self)
            .map_err(|e| ProviderError::Index(format!("Failed to serialize index: {}", e)))?;
        // write-then-rename so a reader never sees a partial file
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| ProviderError::Index(format!("Failed to write index file: {}", e)))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| ProviderError::Index(format!("Failed to move index file: {}", e)))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ProviderError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ProviderError::Index(format!("Failed to read index file: {}", e)))?;
        serde_json::from_str(&json)
            .map_err(|e| ProviderError::Index(format!("Failed to deserialize index: {}", e)))
    }
}

/// SHA-256 fingerprint over `(path, size, mtime)` of each file plus any
/// extra parameters that change how the corpus is built.
pub fn fingerprint_files(files: &[PathBuf], extra: &str) -> Result<String, ProviderError> {
    let mut hasher = Sha256::new();
    for file in files {
        let meta = std::fs::metadata(file)
            .map_err(|e| ProviderError::Index(format!("{}: {}", file.display(), e)))?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        hasher.update(file.to_string_lossy().as_bytes());
        hasher.update(meta.len().to_le_bytes());
        hasher.update(mtime.to_le_bytes());
    }
    hasher.update(extra.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

// ============================================================================
// Cache
// ============================================================================

struct IndexSlot {
    current: ArcSwapOption<Corpus>,
    /// Serializes rebuilds of one slot; searches never take it
    rebuild: tokio::sync::Mutex<()>,
}

/// Live corpora keyed by source path
pub struct IndexCache {
    index_dir: PathBuf,
    slots: parking_lot::Mutex<HashMap<String, Arc<IndexSlot>>>,
    /// Jobs using an ephemeral corpus, by source key
    ephemeral_users: parking_lot::Mutex<HashMap<String, HashSet<String>>>,
}

impl IndexCache {
    pub fn new(index_dir: PathBuf) -> Self {
        Self {
            index_dir,
            slots: parking_lot::Mutex::new(HashMap::new()),
            ephemeral_users: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &str) -> Arc<IndexSlot> {
        self.slots
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(IndexSlot {
                    current: ArcSwapOption::empty(),
                    rebuild: tokio::sync::Mutex::new(()),
                })
            })
            .clone()
    }

    fn index_path(&self, fingerprint: &str) -> PathBuf {
        self.index_dir.join(format!("{}.json", fingerprint))
    }

    /// The corpus currently live for `key`, if any
    pub fn current(&self, key: &str) -> Option<Arc<Corpus>> {
        self.slots.lock().get(key).and_then(|s| s.current.load_full())
    }

    /// Make sure the live corpus for `key` matches `fingerprint`: reuse the
    /// live one, load a persisted one, or build a fresh one with `build` and
    /// swap it in.
    pub async fn refresh<F>(
        &self,
        key: &str,
        fingerprint: String,
        build: F,
    ) -> Result<Arc<Corpus>, ProviderError>
    where
        F: FnOnce() -> Result<Vec<CorpusEntry>, ProviderError> + Send + 'static,
    {
        let slot = self.slot(key);
        let _guard = slot.rebuild.lock().await;

        if let Some(live) = slot.current.load_full() {
            if live.fingerprint == fingerprint {
                return Ok(live);
            }
        }

        let path = self.index_path(&fingerprint);
        let corpus = tokio::task::spawn_blocking(move || -> Result<Corpus, ProviderError> {
            if path.exists() {
                match Corpus::load(&path) {
                    Ok(corpus) if corpus.fingerprint == fingerprint => return Ok(corpus),
                    Ok(_) => warn!(path = %path.display(), "Index fingerprint mismatch, rebuilding"),
                    Err(e) => warn!(path = %path.display(), error = %e, "Index unreadable, rebuilding"),
                }
            }
            let corpus = Corpus::build(fingerprint, build()?);
            if let Err(e) = corpus.save(&path) {
                warn!(error = %e, "Failed to persist index");
            }
            Ok(corpus)
        })
        .await
        .map_err(|e| ProviderError::Index(format!("Index build task failed: {}", e)))??;

        info!(key, entries = corpus.len(), "Search index ready");
        let corpus = Arc::new(corpus);
        slot.current.store(Some(corpus.clone()));
        Ok(corpus)
    }

    /// Record that `job_id` uses the corpus for `key` and wants it dropped
    /// once the last such job releases it.
    pub fn register_ephemeral(&self, key: &str, job_id: &str) {
        self.ephemeral_users
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(job_id.to_string());
    }

    /// Release `job_id` from every ephemeral corpus. Corpora left without
    /// users are dropped from memory and their persisted files removed.
    pub fn release(&self, job_id: &str) -> Vec<String> {
        let orphaned: Vec<String> = {
            let mut users = self.ephemeral_users.lock();
            let mut orphaned = Vec::new();
            users.retain(|key, jobs| {
                if jobs.remove(job_id) && jobs.is_empty() {
                    orphaned.push(key.clone());
                    return false;
                }
                !jobs.is_empty()
            });
            orphaned
        };

        for key in &orphaned {
            let slot = self.slots.lock().remove(key);
            if let Some(corpus) = slot.and_then(|s| s.current.load_full()) {
                let path = self.index_path(&corpus.fingerprint);
                if let Err(e) = std::fs::remove_file(&path) {
                    debug!(path = %path.display(), error = %e, "Ephemeral index file not removed");
                }
            }
        }
        orphaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, text: &str) -> CorpusEntry {
        CorpusEntry {
            title: title.into(),
            url: format!("file://{}", title),
            text: text.into(),
        }
    }

    #[test]
    fn test_bm25_ranks_relevant_first() {
        let mut index = Bm25Index::new();
        index.add_document("1", "rust ownership and borrowing rules");
        index.add_document("2", "python garbage collection");
        index.add_document("3", "rust async runtime tokio");

        let results = index.search("rust borrowing", 10);
        assert_eq!(results[0].0, "1");
        assert!(results.iter().all(|(id, _)| id != "2"));
    }

    #[test]
    fn test_bm25_empty_query() {
        let mut index = Bm25Index::new();
        index.add_document("1", "content");
        assert!(index.search("a", 5).is_empty());
    }

    #[test]
    fn test_chunker_overlap() {
        let chunker = TextChunker::new(4, 2);
        let chunks = chunker.chunk("a b c d e f g");
        assert_eq!(chunks, vec!["a b c d", "c d e f", "e f g"]);
    }

    #[test]
    fn test_chunker_degenerate_params() {
        let chunker = TextChunker::new(3, 10);
        let chunks = chunker.chunk("one two three four");
        assert_eq!(chunks.first().map(String::as_str), Some("one two three"));
        assert_eq!(chunks.last().map(String::as_str), Some("two three four"));
        assert!(TextChunker::new(0, 0).chunk("").is_empty());
    }

    #[test]
    fn test_corpus_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx.json");
        let corpus = Corpus::build(
            "abc".into(),
            vec![entry("quantum", "qubits and superposition"), entry("classical", "bits")],
        );
        corpus.save(&path).unwrap();

        let loaded = Corpus::load(&path).unwrap();
        assert_eq!(loaded.fingerprint, "abc");
        let hits = loaded.search("superposition", 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.title, "quantum");
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "one").unwrap();
        let first = fingerprint_files(&[file.clone()], "300/50").unwrap();
        assert_eq!(first, fingerprint_files(&[file.clone()], "300/50").unwrap());
        assert_ne!(first, fingerprint_files(&[file.clone()], "200/50").unwrap());

        std::fs::write(&file, "one two three").unwrap();
        assert_ne!(first, fingerprint_files(&[file], "300/50").unwrap());
    }

    #[tokio::test]
    async fn test_refresh_swaps_and_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IndexCache::new(dir.path().to_path_buf());

        let first = cache
            .refresh("docs", "fp1".into(), || Ok(vec![entry("a", "alpha text")]))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        // same fingerprint: the builder must not run
        let again = cache
            .refresh("docs", "fp1".into(), || {
                Err(ProviderError::Index("should not rebuild".into()))
            })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let second = cache
            .refresh("docs", "fp2".into(), || {
                Ok(vec![entry("a", "alpha"), entry("b", "beta")])
            })
            .await
            .unwrap();
        assert_eq!(second.len(), 2);
        // readers holding the old corpus still see it
        assert_eq!(first.len(), 1);
        assert_eq!(cache.current("docs").unwrap().fingerprint, "fp2");
    }

    #[tokio::test]
    async fn test_refresh_loads_persisted_index() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = IndexCache::new(dir.path().to_path_buf());
            cache
                .refresh("docs", "fp".into(), || Ok(vec![entry("a", "alpha")]))
                .await
                .unwrap();
        }

        let cache = IndexCache::new(dir.path().to_path_buf());
        let loaded = cache
            .refresh("docs", "fp".into(), || {
                Err(ProviderError::Index("should load from disk".into()))
            })
            .await
            .unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn test_release_drops_ephemeral_index() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IndexCache::new(dir.path().to_path_buf());
        cache
            .refresh("docs", "fp".into(), || Ok(vec![entry("a", "alpha")]))
            .await
            .unwrap();
        cache.register_ephemeral("docs", "job-1");
        cache.register_ephemeral("docs", "job-2");

        assert!(cache.release("job-1").is_empty());
        assert!(cache.current("docs").is_some());

        assert_eq!(cache.release("job-2"), vec!["docs"]);
        assert!(cache.current("docs").is_none());
        assert!(!dir.path().join("fp.json").exists());
    }
}
