//! Report workflow
//!
//! A job moves through a fixed sequence of steps. The step to run next is
//! stored in the job's [`Checkpoint`](crate::research::state::Checkpoint), and
//! the job is written back after every step, so a run can stop anywhere
//! (feedback gate, shutdown, crash) and a later run continues from the
//! stored step.
//!
//! ```text
//! SetupKnowledgeBase -> DetermineIfQuestion -> GenerateIntroduction -> GeneratePlan
//!   -> HumanFeedback -+-> GeneratePlan (revise)
//!                     +-> ResearchSections -> GatherSections -> GenerateConclusion
//!                         -> CompileReport -> Cleanup -> Done
//! ```

use crate::db::JobStore;
use crate::llm::structured::generate_structured;
use crate::llm::{LLMClient, LLMClientFactoryTrait};
use crate::research::cancel::{is_cancellation, CancelToken};
use crate::research::config::ResearchConfig;
use crate::research::markdown::{compile_report, format_sections, strip_leading_heading};
use crate::research::prompts::{self, PlanPromptInput, ReportPlan};
use crate::research::section::{ResearchContext, SectionResearcher};
use crate::research::state::{Job, JobStatus, Section, WorkflowStep};
use crate::search::SearchRegistry;
use crate::types::{AppError, Result};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// What a step asks the interpreter to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue(WorkflowStep),
    /// Park the job until feedback arrives
    Suspend,
    Finished,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Suspended,
    Completed,
    Failed,
    /// Stopped by its cancel token; the checkpoint is left as it was
    Cancelled,
    /// The job row disappeared underneath the run
    Deleted,
}

/// Reply to the feedback gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackInput {
    Approve,
    Revise(String),
}

impl FeedbackInput {
    /// `true`, `null` or an empty string approve the plan, any other string
    /// asks for a revision. Everything else is rejected.
    pub fn parse(value: &Value) -> Result<Self> {
        match value {
            Value::Null | Value::Bool(true) => Ok(FeedbackInput::Approve),
            Value::String(text) if text.trim().is_empty() => Ok(FeedbackInput::Approve),
            Value::String(text) => Ok(FeedbackInput::Revise(text.trim().to_string())),
            other => Err(AppError::InvalidInput(format!(
                "Plan feedback must be true, null or a string, got {}",
                other
            ))),
        }
    }
}

impl WorkflowStep {
    /// Status reported while this step is running. Steps that return `None`
    /// keep whatever status the job already has.
    pub fn status(&self) -> Option<JobStatus> {
        match self {
            WorkflowStep::SetupKnowledgeBase => Some(JobStatus::SettingUpKnowledgeBase),
            WorkflowStep::DetermineIfQuestion => Some(JobStatus::AnalyzingTopic),
            WorkflowStep::GenerateIntroduction => Some(JobStatus::WritingIntroduction),
            WorkflowStep::GeneratePlan => Some(JobStatus::Planning),
            WorkflowStep::ResearchSections => Some(JobStatus::ResearchingSections),
            WorkflowStep::GenerateConclusion => Some(JobStatus::GeneratingConclusion),
            WorkflowStep::CompileReport => Some(JobStatus::CompilingReport),
            WorkflowStep::HumanFeedback
            | WorkflowStep::GatherSections
            | WorkflowStep::Cleanup
            | WorkflowStep::Done => None,
        }
    }
}

/// Clients and tools for one run of one job
struct RunContext {
    research: ResearchContext,
    conclusion: Arc<dyn LLMClient>,
}

impl RunContext {
    fn config(&self) -> &ResearchConfig {
        &self.research.config
    }
}

/// Interprets the workflow for one job until it suspends, finishes, fails
/// or is cancelled.
pub struct ReportWorkflow {
    store: Arc<dyn JobStore>,
    llm: Arc<dyn LLMClientFactoryTrait>,
    search: Arc<SearchRegistry>,
    cancel: CancelToken,
}

impl ReportWorkflow {
    pub fn new(
        store: Arc<dyn JobStore>,
        llm: Arc<dyn LLMClientFactoryTrait>,
        search: Arc<SearchRegistry>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            store,
            llm,
            search,
            cancel,
        }
    }

    /// Load the job and run it from its checkpoint.
    pub async fn run(&self, job_id: &str) -> Result<RunOutcome> {
        let Some(mut job) = self.store.get(job_id).await? else {
            return Ok(RunOutcome::Deleted);
        };
        if job.status.is_terminal() || job.checkpoint.step == WorkflowStep::Done {
            return Ok(RunOutcome::Completed);
        }

        let ctx = match self.context_for(&job).await {
            Ok(ctx) => ctx,
            Err(e) => return self.fail(&mut job, e).await,
        };

        // a resumed run reattaches to provider state such as ephemeral
        // indexes, so cleanup in this process still releases them
        if job.checkpoint.step != WorkflowStep::SetupKnowledgeBase {
            let prepared = self.search.prepare_all(&job.id, ctx.config()).await;
            debug!(job_id, prepared, step = ?job.checkpoint.step, "Search providers reattached");
        }

        loop {
            if self.cancel.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }

            let step = job.checkpoint.step;
            if let Some(status) = step.status() {
                job.set_status(status);
            }
            debug!(job_id, ?step, "Running workflow step");

            let outcome = match self.execute(step, &mut job, &ctx).await {
                Ok(outcome) => outcome,
                Err(e) if is_cancellation(&e) => return Ok(RunOutcome::Cancelled),
                Err(AppError::NotFound(_)) => return Ok(RunOutcome::Deleted),
                Err(e) => return self.fail(&mut job, e).await,
            };

            match outcome {
                StepOutcome::Continue(next) => {
                    job.checkpoint.step = next;
                    if let Some(status) = next.status() {
                        job.set_status(status);
                    }
                    if !self.persist(&mut job).await? {
                        return Ok(RunOutcome::Deleted);
                    }
                }
                StepOutcome::Suspend => {
                    return Ok(if self.persist(&mut job).await? {
                        info!(job_id, "Waiting for plan feedback");
                        RunOutcome::Suspended
                    } else {
                        RunOutcome::Deleted
                    });
                }
                StepOutcome::Finished => {
                    job.checkpoint.step = WorkflowStep::Done;
                    return Ok(if self.persist(&mut job).await? {
                        info!(job_id, "Research report completed");
                        RunOutcome::Completed
                    } else {
                        RunOutcome::Deleted
                    });
                }
            }
        }
    }

    async fn context_for(&self, job: &Job) -> Result<RunContext> {
        let config = Arc::new(job.config.clone());
        let planner = self.llm.create_for_model(&config.planner_model).await?;
        let writer = self.llm.create_for_model(&config.writer_model).await?;
        let conclusion = self.llm.create_for_model(&config.conclusion_model).await?;
        Ok(RunContext {
            research: ResearchContext {
                job_id: job.id.clone(),
                topic: job.topic.clone(),
                config,
                search: self.search.clone(),
                planner,
                writer,
                cancel: self.cancel.clone(),
            },
            conclusion,
        })
    }

    /// Write the job back unless it was deleted meanwhile.
    async fn persist(&self, job: &mut Job) -> Result<bool> {
        job.touch();
        self.store.update(job).await
    }

    async fn fail(&self, job: &mut Job, err: AppError) -> Result<RunOutcome> {
        error!(job_id = %job.id, step = ?job.checkpoint.step, error = %err, "Research workflow failed");
        job.fail(err.to_string());
        self.search.release_all(&job.id).await;
        Ok(if self.persist(job).await? {
            RunOutcome::Failed
        } else {
            RunOutcome::Deleted
        })
    }

    async fn execute(&self, step: WorkflowStep, job: &mut Job, ctx: &RunContext) -> Result<StepOutcome> {
        match step {
            WorkflowStep::SetupKnowledgeBase => self.setup_knowledge_base(job, ctx).await,
            WorkflowStep::DetermineIfQuestion => Ok(determine_if_question(job)),
            WorkflowStep::GenerateIntroduction => self.generate_introduction(job, ctx).await,
            WorkflowStep::GeneratePlan => self.generate_plan(job, ctx).await,
            WorkflowStep::HumanFeedback => human_feedback(job),
            WorkflowStep::ResearchSections => self.research_sections(job, ctx).await,
            WorkflowStep::GatherSections => gather_sections(job),
            WorkflowStep::GenerateConclusion => self.generate_conclusion(job, ctx).await,
            WorkflowStep::CompileReport => Ok(compile(job)),
            WorkflowStep::Cleanup => self.cleanup(job).await,
            WorkflowStep::Done => Ok(StepOutcome::Finished),
        }
    }

    async fn setup_knowledge_base(&self, job: &mut Job, ctx: &RunContext) -> Result<StepOutcome> {
        let prepared = self.search.prepare_all(&job.id, ctx.config()).await;
        debug!(job_id = %job.id, prepared, "Search providers prepared");
        job.advance_progress(0.05);
        Ok(StepOutcome::Continue(WorkflowStep::DetermineIfQuestion))
    }

    async fn generate_introduction(&self, job: &mut Job, ctx: &RunContext) -> Result<StepOutcome> {
        let research = &ctx.research;
        let config = ctx.config();
        let providers = self
            .search
            .usable(std::slice::from_ref(&config.introduction_search_provider), config);

        let queries = research
            .queries_for(&providers, &job.topic, |_, guidelines| {
                prompts::introduction_query_prompt(&job.topic, config.number_of_queries, guidelines)
            })
            .await?;
        let results = research.search(&queries).await?;
        job.merge_urls(results.citations);

        research.delay().await?;
        let system = prompts::introduction_writer_system(config.max_introduction_words, &config.language);
        let prompt = prompts::introduction_writer_prompt(&job.topic, &results.context);
        let introduction = research.writer.generate_with_system(&system, &prompt).await?;
        job.introduction = Some(strip_leading_heading(&introduction, "Introduction"));

        job.advance_progress(0.2);
        Ok(StepOutcome::Continue(WorkflowStep::GeneratePlan))
    }

    async fn generate_plan(&self, job: &mut Job, ctx: &RunContext) -> Result<StepOutcome> {
        let research = &ctx.research;
        let config = ctx.config();
        let providers = self
            .search
            .usable(std::slice::from_ref(&config.planning_search_provider), config);

        let queries = research
            .queries_for(&providers, &job.topic, |_, guidelines| {
                prompts::planner_query_prompt(
                    &job.topic,
                    &config.report_structure,
                    config.number_of_queries,
                    guidelines,
                )
            })
            .await?;
        let results = research.search(&queries).await?;
        job.merge_urls(results.citations);

        let context = match job.introduction.as_deref() {
            Some(intro) => format!("{}\n\nINTRODUCTION:\n{}", results.context, intro),
            None => results.context,
        };
        let provider_list = self.describe_providers(config);
        let prompt = prompts::report_plan_prompt(&PlanPromptInput {
            topic: &job.topic,
            report_structure: &config.report_structure,
            context: &context,
            providers: &provider_list,
            feedback: job.checkpoint.plan_feedback.as_deref(),
            is_question: job.is_question,
        });
        let plan: ReportPlan =
            generate_structured(research.planner.as_ref(), prompts::PLANNER_SYSTEM, &prompt).await?;

        let sections = self.normalize_plan(plan, config);
        if sections.is_empty() {
            return Err(AppError::LLM(
                "The planner did not return any usable report sections".to_string(),
            ));
        }
        info!(job_id = %job.id, sections = sections.len(), "Report plan generated");

        job.sections = sections;
        job.checkpoint.plan_feedback = None;
        job.advance_progress(0.3);
        Ok(StepOutcome::Continue(WorkflowStep::HumanFeedback))
    }

    fn describe_providers(&self, config: &ResearchConfig) -> String {
        config
            .available_search_providers
            .iter()
            .filter_map(|id| self.search.get(id))
            .map(|p| format!("- {}: {}", p.id(), p.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Drop conclusion and duplicate sections, restrict providers to usable
    /// ones and cap the plan length.
    fn normalize_plan(&self, plan: ReportPlan, config: &ResearchConfig) -> Vec<Section> {
        let mut seen = HashSet::new();
        plan.sections
            .into_iter()
            .filter_map(|planned| {
                let name = planned.name.trim().to_string();
                if name.is_empty() || name.eq_ignore_ascii_case("conclusion") {
                    return None;
                }
                if !seen.insert(name.clone()) {
                    return None;
                }
                let providers = self.search.usable(&planned.search_options, config);
                Some(Section::new(name, planned.description.trim(), providers))
            })
            .take(config.max_sections)
            .collect()
    }

    async fn research_sections(&self, job: &mut Job, ctx: &RunContext) -> Result<StepOutcome> {
        let total = job.sections.len();
        let mut tasks = JoinSet::new();
        for (index, section) in job.sections.iter().enumerate() {
            if section.completed {
                continue;
            }
            let researcher = SectionResearcher::new(ctx.research.clone(), section.clone());
            tasks.spawn(async move { (index, researcher.run().await) });
        }
        info!(job_id = %job.id, pending = tasks.len(), total, "Researching sections");

        // dropping `tasks` on an early return aborts the remaining sections
        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) =
                joined.map_err(|e| AppError::Internal(format!("Section task failed: {}", e)))?;
            let outcome = outcome.map_err(|e| {
                if !is_cancellation(&e) {
                    warn!(job_id = %job.id, section = %job.sections[index].name, error = %e, "Section research failed");
                }
                e
            })?;

            job.sections[index] = outcome.section;
            job.merge_urls(outcome.citations);
            let done = job.sections.iter().filter(|s| s.completed).count();
            job.advance_progress((0.4 + 0.5 * done as f32 / total as f32).min(0.9));

            if !self.persist(job).await? {
                return Err(AppError::NotFound(format!("job {}", job.id)));
            }
        }

        Ok(StepOutcome::Continue(WorkflowStep::GatherSections))
    }

    async fn generate_conclusion(&self, job: &mut Job, ctx: &RunContext) -> Result<StepOutcome> {
        let config = ctx.config();
        ctx.research.delay().await?;
        let system = prompts::conclusion_writer_system(
            job.is_question,
            config.max_conclusion_words,
            &config.language,
        );
        let prompt = prompts::conclusion_writer_prompt(&job.topic, &format_sections(&job.sections));
        let conclusion = ctx.conclusion.generate_with_system(&system, &prompt).await?;
        job.conclusion = Some(strip_leading_heading(&conclusion, "Conclusion"));

        job.advance_progress(0.95);
        Ok(StepOutcome::Continue(WorkflowStep::CompileReport))
    }

    async fn cleanup(&self, job: &mut Job) -> Result<StepOutcome> {
        self.search.release_all(&job.id).await;
        job.set_status(JobStatus::Completed);
        job.advance_progress(1.0);
        Ok(StepOutcome::Finished)
    }
}

fn determine_if_question(job: &mut Job) -> StepOutcome {
    let topic = job.topic.trim();
    job.is_question = topic.ends_with('?') || topic.ends_with('？');
    job.advance_progress(0.1);
    StepOutcome::Continue(WorkflowStep::GenerateIntroduction)
}

fn human_feedback(job: &mut Job) -> Result<StepOutcome> {
    if job.config.skip_human_feedback {
        job.checkpoint.pending_feedback = None;
        job.advance_progress(0.4);
        return Ok(StepOutcome::Continue(WorkflowStep::ResearchSections));
    }

    let Some(input) = job.checkpoint.pending_feedback.take() else {
        job.set_status(JobStatus::WaitingForFeedback);
        return Ok(StepOutcome::Suspend);
    };

    match FeedbackInput::parse(&input)? {
        FeedbackInput::Approve => {
            info!(job_id = %job.id, "Report plan approved");
            job.advance_progress(0.4);
            Ok(StepOutcome::Continue(WorkflowStep::ResearchSections))
        }
        FeedbackInput::Revise(feedback) => {
            info!(job_id = %job.id, "Report plan revision requested");
            job.checkpoint.plan_feedback = Some(feedback);
            Ok(StepOutcome::Continue(WorkflowStep::GeneratePlan))
        }
    }
}

fn gather_sections(job: &mut Job) -> Result<StepOutcome> {
    if let Some(section) = job
        .sections
        .iter()
        .find(|s| !s.completed || s.content.trim().is_empty())
    {
        return Err(AppError::Internal(format!(
            "Section '{}' has no completed content",
            section.name
        )));
    }
    Ok(StepOutcome::Continue(WorkflowStep::GenerateConclusion))
}

fn compile(job: &mut Job) -> StepOutcome {
    job.final_report = Some(compile_report(
        job.introduction.as_deref(),
        &job.sections,
        job.conclusion.as_deref(),
        &job.all_urls,
    ));
    job.completed_at = Some(Utc::now());
    job.advance_progress(0.98);
    StepOutcome::Continue(WorkflowStep::Cleanup)
}
