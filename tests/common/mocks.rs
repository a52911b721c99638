//! Mock implementations for testing.
//!
//! [`ScriptedLLM`] answers every prompt the research workflow sends with a
//! canned reply chosen from the structured-output schema or the writer role
//! in the system prompt, so whole jobs run without a model server.
//! [`StaticSearch`] stands in for a search backend.

#![allow(dead_code)]

use async_trait::async_trait;
use deepreport::db::{JobStore, TursoClient};
use deepreport::llm::{LLMClient, LLMClientFactoryTrait};
use deepreport::research::ResearchCoordinator;
use deepreport::search::{ProviderError, SearchProvider, SearchRegistry, SourceDoc, SourceSet};
use deepreport::types::{AppError, Result};
use deepreport::utils::toml_config::EngineConfig;
use deepreport::ResearchConfig;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Feedback text that makes [`ScriptedLLM`] add [`REVISED_SECTION`] to the plan.
pub const REVISION_REQUEST: &str = "Add a section on costs";
pub const REVISED_SECTION: &str = "Costs";

/// Canned LLM that plays every role of the research workflow.
pub struct ScriptedLLM {
    /// Planned sections as (name, search providers)
    sections: Vec<(String, Vec<String>)>,
    /// Grade returned for every section
    grade: &'static str,
    /// Subtopics proposed per deep-research pass
    subtopics: usize,
    query_counter: AtomicUsize,
    section_writes: Mutex<HashMap<String, usize>>,
    subsection_writes: AtomicUsize,
    grades: AtomicUsize,
    writer_prompts: Mutex<Vec<String>>,
    /// (topic, section) whose section writer errors
    failing_writer: Option<(String, String)>,
    panic_on_introduction: bool,
}

impl ScriptedLLM {
    pub fn new(sections: &[(&str, &[&str])]) -> Self {
        Self {
            sections: sections
                .iter()
                .map(|(name, providers)| {
                    (
                        name.to_string(),
                        providers.iter().map(|p| p.to_string()).collect(),
                    )
                })
                .collect(),
            grade: "pass",
            subtopics: 3,
            query_counter: AtomicUsize::new(0),
            section_writes: Mutex::new(HashMap::new()),
            subsection_writes: AtomicUsize::new(0),
            grades: AtomicUsize::new(0),
            writer_prompts: Mutex::new(Vec::new()),
            failing_writer: None,
            panic_on_introduction: false,
        }
    }

    /// Grade every section as failing, forever.
    pub fn always_failing(mut self) -> Self {
        self.grade = "fail";
        self
    }

    /// Make the section writer fail for `section` in jobs on `topic`.
    pub fn failing_writer(mut self, topic: &str, section: &str) -> Self {
        self.failing_writer = Some((topic.to_string(), section.to_string()));
        self
    }

    /// Panic instead of writing an introduction.
    pub fn panicking_introduction(mut self) -> Self {
        self.panic_on_introduction = true;
        self
    }

    pub fn with_subtopics(mut self, subtopics: usize) -> Self {
        self.subtopics = subtopics;
        self
    }

    /// How often the section writer ran for `section`.
    pub fn section_writes(&self, section: &str) -> usize {
        self.section_writes.lock().get(section).copied().unwrap_or(0)
    }

    pub fn subsection_writes(&self) -> usize {
        self.subsection_writes.load(Ordering::SeqCst)
    }

    pub fn grades(&self) -> usize {
        self.grades.load(Ordering::SeqCst)
    }

    /// User prompts sent to the section writer.
    pub fn writer_prompts(&self) -> Vec<String> {
        self.writer_prompts.lock().clone()
    }

    /// Section writer calls for `section` in jobs on `topic`.
    pub fn section_writes_for(&self, topic: &str, section: &str) -> usize {
        self.writer_prompts
            .lock()
            .iter()
            .filter(|p| {
                tagged(p, "<Report topic>", "</Report topic>") == topic
                    && tagged(p, "<Section name>", "</Section name>") == section
            })
            .count()
    }

    fn plan(&self, prompt: &str) -> Value {
        let mut sections: Vec<Value> = self
            .sections
            .iter()
            .map(|(name, providers)| {
                json!({
                    "name": name,
                    "description": format!("What matters about {}", name),
                    "search_options": providers,
                })
            })
            .collect();
        if prompt.contains(REVISION_REQUEST) {
            sections.push(json!({
                "name": REVISED_SECTION,
                "description": "What it costs",
                "search_options": [],
            }));
        }
        // a conclusion section is always dropped from the plan
        sections.push(json!({
            "name": "Conclusion",
            "description": "Wrap up",
            "search_options": [],
        }));
        json!({ "sections": sections })
    }

    fn queries(&self) -> Value {
        let n = self.query_counter.fetch_add(2, Ordering::SeqCst);
        json!({
            "queries": [
                { "search_query": format!("query {}", n) },
                { "search_query": format!("query {}", n + 1) },
            ]
        })
    }

    fn subtopic_plan(&self) -> Value {
        let subtopics: Vec<Value> = (1..=self.subtopics)
            .map(|i| {
                json!({
                    "name": format!("Subtopic {}", i),
                    "description": format!("Angle {}", i),
                    "key_questions": ["Why?"],
                })
            })
            .collect();
        json!({ "subtopics": subtopics })
    }
}

/// Text between `open` and the next `close`, trimmed.
fn tagged<'a>(prompt: &'a str, open: &str, close: &str) -> &'a str {
    prompt
        .split_once(open)
        .and_then(|(_, rest)| rest.split_once(close))
        .map(|(inner, _)| inner.trim())
        .unwrap_or_default()
}

#[async_trait]
impl LLMClient for ScriptedLLM {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_with_system("", prompt).await
    }

    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        let reply = if system.contains("\"title\": \"ReportPlan\"") {
            self.plan(prompt).to_string()
        } else if system.contains("\"title\": \"SectionGrade\"") {
            self.grades.fetch_add(1, Ordering::SeqCst);
            json!({
                "grade": self.grade,
                "follow_up_queries": [{ "search_query": "follow up" }],
            })
            .to_string()
        } else if system.contains("\"title\": \"SubTopicPlan\"") {
            self.subtopic_plan().to_string()
        } else if system.contains("\"title\": \"Queries\"") {
            format!("Here you go:\n```json\n{}\n```", self.queries())
        } else if system.starts_with("You are writing the introduction") {
            if self.panic_on_introduction {
                panic!("introduction writer crashed");
            }
            "This report looks at the topic from several angles.".to_string()
        } else if system.starts_with("You are writing one section") {
            let name = tagged(prompt, "<Section name>", "</Section name>").to_string();
            *self.section_writes.lock().entry(name.clone()).or_insert(0) += 1;
            self.writer_prompts.lock().push(prompt.to_string());
            if let Some((topic, section)) = &self.failing_writer {
                if *section == name && tagged(prompt, "<Report topic>", "</Report topic>") == topic.as_str() {
                    return Err(AppError::LLM(format!("writer unavailable for {}", name)));
                }
            }
            format!("## {}\n\nFindings about {}.", name, name)
        } else if system.starts_with("You are writing a subsection") {
            self.subsection_writes.fetch_add(1, Ordering::SeqCst);
            let subtopic = tagged(prompt, "<Subtopic>", "</Subtopic>");
            let name = subtopic.lines().next().unwrap_or_default();
            format!("### {}\n\nA closer look at {}.", name, name)
        } else if system.starts_with("You are writing the conclusion") {
            "## Conclusion\n\nAll things considered, it depends.".to_string()
        } else {
            return Err(AppError::LLM(format!("Unscripted prompt: {}", system)));
        };
        Ok(reply)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Factory that hands out the same client for every model name.
pub struct MockFactory {
    client: Arc<dyn LLMClient>,
}

impl MockFactory {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LLMClientFactoryTrait for MockFactory {
    async fn create_for_model(&self, _model_name: &str) -> Result<Arc<dyn LLMClient>> {
        Ok(self.client.clone())
    }
}

/// Search backend returning one source per query.
pub struct StaticSearch {
    id: String,
    delay: Duration,
    failing: bool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    finished: Option<Arc<Mutex<Vec<String>>>>,
}

impl StaticSearch {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            delay: Duration::ZERO,
            failing: false,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            finished: None,
        }
    }

    /// A backend whose every search fails with a network error.
    pub fn failing(id: &str) -> Self {
        Self {
            failing: true,
            ..Self::new(id)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Record this provider's id in `log` each time a search finishes.
    pub fn with_log(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.finished = Some(log);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most searches that were ever running at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        "test search backend"
    }

    fn query_guidelines(&self) -> &str {
        "Any phrasing works."
    }

    async fn search(
        &self,
        queries: &[String],
        _params: &Value,
    ) -> std::result::Result<SourceSet, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(log) = &self.finished {
            log.lock().push(self.id.clone());
        }
        if self.failing {
            return Err(ProviderError::Network(format!("{} is down", self.id)));
        }

        let mut sources = SourceSet::new();
        for query in queries {
            let slug = query.replace(' ', "-");
            sources.push(SourceDoc {
                title: format!("{} result for {}", self.id, query),
                url: format!("https://{}.example.com/{}", self.id, slug),
                snippet: format!("Evidence about {}", query),
                full_text: None,
            });
        }
        Ok(sources)
    }
}

/// Research settings for tests: no courtesy delay, no deep research, and
/// `web` as the only provider unless `providers` adds more.
pub fn test_overrides(providers: &[&str]) -> Value {
    let mut available = vec!["web".to_string()];
    available.extend(providers.iter().map(|p| p.to_string()));
    json!({
        "request_delay_secs": 0.0,
        "enable_deep_research": false,
        "introduction_search_provider": "web",
        "planning_search_provider": "web",
        "default_search_provider": "web",
        "available_search_providers": available,
        "deep_research_providers": ["web"],
    })
}

pub fn registry(providers: Vec<Arc<dyn SearchProvider>>) -> Arc<SearchRegistry> {
    let mut registry = SearchRegistry::new();
    registry.register(Arc::new(StaticSearch::new("web")));
    for provider in providers {
        registry.register(provider);
    }
    Arc::new(registry)
}

pub async fn memory_store() -> Arc<dyn JobStore> {
    Arc::new(
        TursoClient::new_memory()
            .await
            .expect("Failed to create in-memory database"),
    )
}

pub async fn file_store(path: &Path) -> Arc<dyn JobStore> {
    Arc::new(
        TursoClient::new_local(path)
            .await
            .expect("Failed to create local database"),
    )
}

pub fn engine(
    store: Arc<dyn JobStore>,
    llm: Arc<ScriptedLLM>,
    search: Arc<SearchRegistry>,
) -> ResearchCoordinator {
    engine_with(store, llm, search, &EngineConfig::default())
}

pub fn engine_with(
    store: Arc<dyn JobStore>,
    llm: Arc<ScriptedLLM>,
    search: Arc<SearchRegistry>,
    config: &EngineConfig,
) -> ResearchCoordinator {
    ResearchCoordinator::new(
        store,
        Arc::new(MockFactory::new(llm)),
        search,
        config,
        ResearchConfig::default(),
    )
}
