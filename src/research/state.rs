//! Job state and the read-only views handed to callers.

use crate::research::config::ResearchConfig;
use crate::search::Citation;
use crate::types::AppError;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Externally visible lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Initializing,
    SettingUpKnowledgeBase,
    AnalyzingTopic,
    WritingIntroduction,
    Planning,
    WaitingForFeedback,
    ProcessingFeedback,
    ResearchingSections,
    GeneratingConclusion,
    CompilingReport,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Initializing => "initializing",
            JobStatus::SettingUpKnowledgeBase => "setting_up_knowledge_base",
            JobStatus::AnalyzingTopic => "analyzing_topic",
            JobStatus::WritingIntroduction => "writing_introduction",
            JobStatus::Planning => "planning",
            JobStatus::WaitingForFeedback => "waiting_for_feedback",
            JobStatus::ProcessingFeedback => "processing_feedback",
            JobStatus::ResearchingSections => "researching_sections",
            JobStatus::GeneratingConclusion => "generating_conclusion",
            JobStatus::CompilingReport => "compiling_report",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    /// No further transitions happen from a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "initializing" => JobStatus::Initializing,
            "setting_up_knowledge_base" => JobStatus::SettingUpKnowledgeBase,
            "analyzing_topic" => JobStatus::AnalyzingTopic,
            "writing_introduction" => JobStatus::WritingIntroduction,
            "planning" => JobStatus::Planning,
            "waiting_for_feedback" => JobStatus::WaitingForFeedback,
            "processing_feedback" => JobStatus::ProcessingFeedback,
            "researching_sections" => JobStatus::ResearchingSections,
            "generating_conclusion" => JobStatus::GeneratingConclusion,
            "compiling_report" => JobStatus::CompilingReport,
            "completed" => JobStatus::Completed,
            "error" => JobStatus::Error,
            other => return Err(AppError::Database(format!("Unknown job status '{}'", other))),
        };
        Ok(status)
    }
}

/// Persisted pointer to the next workflow step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    SetupKnowledgeBase,
    DetermineIfQuestion,
    GenerateIntroduction,
    GeneratePlan,
    HumanFeedback,
    ResearchSections,
    GatherSections,
    GenerateConclusion,
    CompileReport,
    Cleanup,
    Done,
}

/// Everything a run needs to pick a job up where the last one stopped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub step: WorkflowStep,
    /// Feedback submitted while waiting, consumed by the feedback step
    #[serde(default)]
    pub pending_feedback: Option<Value>,
    /// Revision request carried into the next planning pass
    #[serde(default)]
    pub plan_feedback: Option<String>,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            step: WorkflowStep::SetupKnowledgeBase,
            pending_feedback: None,
            plan_feedback: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub content: String,
    /// Search provider ids used to research this section
    #[serde(default)]
    pub search_options: Vec<String>,
    #[serde(default)]
    pub completed: bool,
}

impl Section {
    pub fn new(name: impl Into<String>, description: impl Into<String>, search_options: Vec<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            content: String::new(),
            search_options,
            completed: false,
        }
    }
}

/// Narrower topic explored while deepening a section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SubTopic {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub key_questions: Vec<String>,
}

/// One research request and everything accumulated for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub owner_id: Option<String>,
    pub topic: String,
    pub config: ResearchConfig,
    pub status: JobStatus,
    pub progress: f32,
    pub sections: Vec<Section>,
    pub is_question: bool,
    pub introduction: Option<String>,
    pub conclusion: Option<String>,
    pub final_report: Option<String>,
    pub all_urls: Vec<Citation>,
    pub error: Option<String>,
    pub waiting_for_feedback: bool,
    pub checkpoint: Checkpoint,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(topic: impl Into<String>, config: ResearchConfig, owner_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id,
            topic: topic.into(),
            config,
            status: JobStatus::Initializing,
            progress: 0.0,
            sections: Vec::new(),
            is_question: false,
            introduction: None,
            conclusion: None,
            final_report: None,
            all_urls: Vec::new(),
            error: None,
            waiting_for_feedback: false,
            checkpoint: Checkpoint::default(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// The only place `status` changes; keeps `waiting_for_feedback` in step.
    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.waiting_for_feedback = status == JobStatus::WaitingForFeedback;
    }

    /// Raise progress to `value`. Progress never moves backwards.
    pub fn advance_progress(&mut self, value: f32) {
        let value = value.clamp(0.0, 1.0);
        if value > self.progress {
            self.progress = value;
        }
    }

    /// Append citations not seen before, keeping first-seen order.
    /// Returns how many were added.
    pub fn merge_urls<I>(&mut self, citations: I) -> usize
    where
        I: IntoIterator<Item = Citation>,
    {
        let mut seen: HashSet<String> = self.all_urls.iter().map(|c| c.url.clone()).collect();
        let before = self.all_urls.len();
        for citation in citations {
            if seen.insert(citation.url.clone()) {
                self.all_urls.push(citation);
            }
        }
        self.all_urls.len() - before
    }

    pub fn completed_sections(&self) -> Vec<String> {
        self.sections
            .iter()
            .filter(|s| s.completed)
            .map(|s| s.name.clone())
            .collect()
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.set_status(JobStatus::Error);
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            sections: self.sections.iter().map(|s| s.name.clone()).collect(),
            completed_sections: self.completed_sections(),
            error: self.error.clone(),
            final_report: self.final_report.clone(),
            waiting_for_feedback: self.waiting_for_feedback,
        }
    }

    pub fn plan_view(&self) -> PlanView {
        PlanView {
            sections: self.sections.clone(),
            waiting_for_feedback: self.waiting_for_feedback,
        }
    }

    pub fn result(&self) -> ResearchResult {
        match (&self.status, &self.final_report) {
            (JobStatus::Completed, Some(report)) => ResearchResult::Completed {
                final_report: report.clone(),
                completed_at: self.completed_at,
            },
            _ => ResearchResult::NotReady {
                status: self.status,
                error: self.error.clone(),
            },
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            topic: self.topic.clone(),
            status: self.status,
            progress: self.progress,
            owner_id: self.owner_id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_section_count: self.sections.iter().filter(|s| s.completed).count(),
            section_count: self.sections.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: String,
    pub status: JobStatus,
    pub progress: f32,
    pub sections: Vec<String>,
    pub completed_sections: Vec<String>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_report: Option<String>,
    pub waiting_for_feedback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanView {
    pub sections: Vec<Section>,
    pub waiting_for_feedback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResearchResult {
    Completed {
        final_report: String,
        completed_at: Option<DateTime<Utc>>,
    },
    NotReady {
        status: JobStatus,
        error: Option<String>,
    },
}

/// Row of the job list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub topic: String,
    pub status: JobStatus,
    pub progress: f32,
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_section_count: usize,
    pub section_count: usize,
}
