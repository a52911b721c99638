//! Per-section research loop
//!
//! Each section is researched independently by a small state machine:
//!
//! ```text
//! GenerateQueries -> Search -> Write -> Grade -+-> Search            (fail, retries left)
//!                                              +-> DeepResearchExpand (deep research on)
//!                                              +-> Done
//! ```
//!
//! A failing grade sends the section back to search with the grader's
//! follow-up queries until `max_reflection` retries are used up, so a
//! section performs at most `max_reflection + 1` search/write cycles.

use crate::llm::structured::generate_structured;
use crate::llm::LLMClient;
use crate::research::cancel::CancelToken;
use crate::research::config::ResearchConfig;
use crate::research::markdown::{append_detail_pass, heading_level};
use crate::research::prompts::{self, Grade, Queries, SectionGrade, SubTopicPlan};
use crate::research::state::{Section, SubTopic};
use crate::search::{Citation, ProviderResults, SearchRegistry};
use crate::types::Result;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Queries grouped by the provider that will run them
pub type ProviderQueries = Vec<(String, Vec<String>)>;

/// Everything a research step needs from its job, shared across sections.
#[derive(Clone)]
pub struct ResearchContext {
    pub job_id: String,
    pub topic: String,
    pub config: Arc<ResearchConfig>,
    pub search: Arc<SearchRegistry>,
    /// Query generation, planning and grading
    pub planner: Arc<dyn LLMClient>,
    pub writer: Arc<dyn LLMClient>,
    pub cancel: CancelToken,
}

impl ResearchContext {
    /// Courtesy delay before an outbound search or write call.
    pub async fn delay(&self) -> Result<()> {
        self.cancel.sleep(self.config.request_delay()).await
    }

    fn guidelines(&self, provider_id: &str) -> String {
        self.search
            .get(provider_id)
            .map(|p| p.query_guidelines().to_string())
            .unwrap_or_default()
    }

    /// Ask the planner for queries tailored to each provider. `prompt` gets
    /// the provider id and its query guidelines. An empty answer falls back
    /// to `fallback` as the only query.
    pub async fn queries_for<F>(
        &self,
        providers: &[String],
        fallback: &str,
        prompt: F,
    ) -> Result<ProviderQueries>
    where
        F: Fn(&str, &str) -> String,
    {
        let limit = self.config.number_of_queries;
        let requests = providers.iter().map(|id| {
            let prompt = prompt(id, &self.guidelines(id));
            async move {
                let queries: Queries =
                    generate_structured(self.planner.as_ref(), prompts::QUERY_WRITER_SYSTEM, &prompt)
                        .await?;
                let mut queries = queries.into_strings(limit);
                if queries.is_empty() {
                    queries.push(fallback.to_string());
                }
                debug!(job_id = %self.job_id, provider = %id, ?queries, "Generated queries");
                Ok::<_, crate::types::AppError>((id.clone(), queries))
            }
        });
        try_join_all(requests).await
    }

    /// Delay, then run the queries. Provider failures come back inline.
    pub async fn search(&self, queries: &ProviderQueries) -> Result<ProviderResults> {
        self.delay().await?;
        self.cancel.check()?;
        Ok(self.search.search_all(queries, &self.config).await)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionState {
    GenerateQueries,
    Search,
    Write,
    Grade,
    DeepResearchExpand,
    Done,
}

/// Result of researching one section
#[derive(Debug, Clone)]
pub struct SectionOutcome {
    pub section: Section,
    pub citations: Vec<Citation>,
    /// Search/write cycles run by the grading loop
    pub search_cycles: u32,
    /// Deep-research passes appended to the section
    pub expansions: u32,
}

pub struct SectionResearcher {
    ctx: ResearchContext,
    section: Section,
    providers: Vec<String>,
    queries: ProviderQueries,
    context: String,
    citations: Vec<Citation>,
    search_cycles: u32,
    reflections: u32,
    expansions: u32,
}

impl SectionResearcher {
    pub fn new(ctx: ResearchContext, section: Section) -> Self {
        let providers = ctx.search.usable(&section.search_options, &ctx.config);
        Self {
            ctx,
            section,
            providers,
            queries: Vec::new(),
            context: String::new(),
            citations: Vec::new(),
            search_cycles: 0,
            reflections: 0,
            expansions: 0,
        }
    }

    pub async fn run(mut self) -> Result<SectionOutcome> {
        info!(job_id = %self.ctx.job_id, section = %self.section.name, providers = ?self.providers, "Researching section");

        let mut state = SectionState::GenerateQueries;
        while state != SectionState::Done {
            self.ctx.cancel.check()?;
            state = match state {
                SectionState::GenerateQueries => self.generate_queries().await?,
                SectionState::Search => self.search().await?,
                SectionState::Write => self.write().await?,
                SectionState::Grade => self.grade().await?,
                SectionState::DeepResearchExpand => self.deep_research().await?,
                SectionState::Done => SectionState::Done,
            };
        }

        self.section.completed = true;
        info!(
            job_id = %self.ctx.job_id,
            section = %self.section.name,
            cycles = self.search_cycles,
            expansions = self.expansions,
            "Section complete"
        );
        Ok(SectionOutcome {
            section: self.section,
            citations: self.citations,
            search_cycles: self.search_cycles,
            expansions: self.expansions,
        })
    }

    async fn generate_queries(&mut self) -> Result<SectionState> {
        let ctx = &self.ctx;
        let section = &self.section;
        self.queries = ctx
            .queries_for(&self.providers, &section.name, |provider, guidelines| {
                prompts::section_query_prompt(
                    &ctx.topic,
                    &section.name,
                    &section.description,
                    provider,
                    guidelines,
                    ctx.config.number_of_queries,
                )
            })
            .await?;
        Ok(SectionState::Search)
    }

    async fn search(&mut self) -> Result<SectionState> {
        let results = self.ctx.search(&self.queries).await?;
        self.context = results.context;
        self.citations.extend(results.citations);
        self.search_cycles += 1;
        Ok(SectionState::Write)
    }

    async fn write(&mut self) -> Result<SectionState> {
        self.ctx.delay().await?;
        let config = &self.ctx.config;
        let system = prompts::section_writer_system(config.max_section_words, &config.language);
        let prompt = prompts::section_writer_prompt(
            &self.ctx.topic,
            &self.section.name,
            &self.section.description,
            &self.section.content,
            &self.context,
        );
        let content = self.ctx.writer.generate_with_system(&system, &prompt).await?;
        self.section.content = with_section_heading(&content, &self.section.name);
        Ok(SectionState::Grade)
    }

    async fn grade(&mut self) -> Result<SectionState> {
        let config = &self.ctx.config;
        let prompt = prompts::section_grader_prompt(
            &self.ctx.topic,
            &self.section.description,
            &self.section.content,
            config.number_of_queries,
        );
        let feedback: SectionGrade =
            generate_structured(self.ctx.planner.as_ref(), prompts::GRADER_SYSTEM, &prompt).await?;

        let finished = feedback.grade == Grade::Pass || self.reflections >= config.max_reflection;
        if finished {
            if feedback.grade == Grade::Fail {
                info!(
                    job_id = %self.ctx.job_id,
                    section = %self.section.name,
                    reflections = self.reflections,
                    "Reflection limit reached, keeping section as written"
                );
            }
            let deep = config.enable_deep_research && config.deep_research_depth > 0;
            return Ok(if deep {
                SectionState::DeepResearchExpand
            } else {
                SectionState::Done
            });
        }

        self.reflections += 1;
        let follow_up = Queries {
            queries: feedback.follow_up_queries,
        }
        .into_strings(config.number_of_queries);
        if !follow_up.is_empty() {
            for (_, queries) in self.queries.iter_mut() {
                *queries = follow_up.clone();
            }
        }
        debug!(
            job_id = %self.ctx.job_id,
            section = %self.section.name,
            reflection = self.reflections,
            ?follow_up,
            "Section failed grading, searching again"
        );
        Ok(SectionState::Search)
    }

    async fn deep_research(&mut self) -> Result<SectionState> {
        let config = self.ctx.config.clone();
        let providers = self
            .ctx
            .search
            .usable(&config.deep_research_providers, &config);

        let mut depth = 0;
        while depth < config.deep_research_depth {
            self.ctx.cancel.check()?;
            depth += 1;

            let prompt = prompts::subtopic_planner_prompt(
                &self.ctx.topic,
                &self.section.name,
                &self.section.content,
                config.deep_research_breadth,
                depth,
            );
            let plan: SubTopicPlan = generate_structured(
                self.ctx.planner.as_ref(),
                prompts::SUBTOPIC_PLANNER_SYSTEM,
                &prompt,
            )
            .await?;
            let subtopics: Vec<SubTopic> = plan
                .subtopics
                .into_iter()
                .take(config.deep_research_breadth)
                .collect();
            // no subtopics means nothing left to deepen; later passes would repeat the same plan
            if subtopics.is_empty() {
                warn!(
                    job_id = %self.ctx.job_id,
                    section = %self.section.name,
                    depth,
                    requested = config.deep_research_depth,
                    "No subtopics proposed, ending deep research early"
                );
                break;
            }

            let mut subsections = Vec::with_capacity(subtopics.len());
            for subtopic in &subtopics {
                subsections.push(self.research_subtopic(subtopic, &providers).await?);
            }

            self.section.content =
                append_detail_pass(&self.section.content, &self.section.name, &subsections);
            self.expansions += 1;
            info!(
                job_id = %self.ctx.job_id,
                section = %self.section.name,
                depth,
                subtopics = subtopics.len(),
                "Deep research pass appended"
            );
        }

        Ok(SectionState::Done)
    }

    async fn research_subtopic(&mut self, subtopic: &SubTopic, providers: &[String]) -> Result<String> {
        let ctx = &self.ctx;
        let section_name = &self.section.name;
        let queries = ctx
            .queries_for(providers, &subtopic.name, |provider, guidelines| {
                prompts::subtopic_query_prompt(
                    &ctx.topic,
                    section_name,
                    subtopic,
                    provider,
                    guidelines,
                    ctx.config.number_of_queries,
                )
            })
            .await?;

        let results = ctx.search(&queries).await?;
        self.citations.extend(results.citations);

        self.ctx.delay().await?;
        let config = &self.ctx.config;
        let system = prompts::subsection_writer_system(config.max_subsection_words, &config.language);
        let prompt =
            prompts::subsection_writer_prompt(&self.ctx.topic, &self.section.name, subtopic, &results.context);
        let text = self.ctx.writer.generate_with_system(&system, &prompt).await?;
        Ok(with_heading(&text, 3, &subtopic.name))
    }
}

/// Section text that opens with a heading; `## {name}` is added if missing.
fn with_section_heading(content: &str, name: &str) -> String {
    with_heading(content, 2, name)
}

fn with_heading(content: &str, level: usize, name: &str) -> String {
    let content = content.trim();
    let starts_with_heading = content
        .lines()
        .next()
        .and_then(heading_level)
        .is_some();
    if starts_with_heading {
        content.to_string()
    } else {
        format!("{} {}\n\n{}", "#".repeat(level), name, content)
    }
}
