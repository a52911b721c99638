//! Deep research orchestration
//!
//! This module turns a topic into a cited Markdown report:
//! the introduction is written from a first round of searches, a plan of
//! sections is drafted and (optionally) approved by a human, every section is
//! researched concurrently with a write/grade loop and optional deep-research
//! passes, and the results are compiled with a conclusion and reference list.
//!
//! # Architecture
//!
//! - [`coordinator::ResearchCoordinator`] - Starts, resumes and cancels jobs
//! - [`workflow::ReportWorkflow`] - Step-by-step report workflow with checkpoints
//! - [`section::SectionResearcher`] - Query/search/write/grade loop for one section
//! - [`state`] - The persisted job and the views returned to callers
//!
//! # Usage
//!
//! ```ignore
//! use deepreport::research::coordinator::ResearchCoordinator;
//!
//! let engine = ResearchCoordinator::from_config(&config).await?;
//! let job_id = engine.start("How do CRDTs converge?", None, None).await?;
//!
//! // later, once the plan is ready
//! engine.submit_feedback(&job_id, None).await?;
//! ```

/// Cooperative cancellation for background runs.
pub mod cancel;
/// Per-job research settings.
pub mod config;
/// Job execution engine.
pub mod coordinator;
pub mod markdown;
pub mod prompts;
/// Per-section research loop.
pub mod section;
pub mod state;
/// Report workflow state machine.
pub mod workflow;

pub use config::ResearchConfig;
pub use coordinator::ResearchCoordinator;
pub use state::{Job, JobStatus, JobStatusView, JobSummary, PlanView, ResearchResult, Section};
pub use workflow::FeedbackInput;
