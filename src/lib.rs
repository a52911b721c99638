//! # deepreport - Deep Research Agent
//!
//! Turns a topic into a cited Markdown report. deepreport plans an outline,
//! researches every section across pluggable search providers with an
//! LLM write/grade loop, optionally digs into subtopics, and compiles the
//! result with an introduction, a conclusion and a reference list.
//!
//! A human may approve or revise the plan before research starts. Jobs are
//! persisted with a checkpoint after every step, so a job waiting for
//! feedback costs nothing while it waits and an interrupted job resumes in
//! a later process.
//!
//! ## Quick Start (Library Usage)
//!
//! ```rust,ignore
//! use deepreport::{DeepReportConfig, ResearchCoordinator, ResearchResult};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DeepReportConfig::load("deepreport.toml")?;
//!     let engine = ResearchCoordinator::from_config(&config).await?;
//!     engine.recover().await?;
//!
//!     let job_id = engine.start("How do CRDTs converge?", None, None).await?;
//!     engine.wait_idle(&job_id).await;
//!
//!     // parked at the feedback gate: approve the plan
//!     engine.submit_feedback(&job_id, None).await?;
//!     engine.wait_idle(&job_id).await;
//!
//!     if let Some(ResearchResult::Completed { final_report, .. }) = engine.get_result(&job_id).await? {
//!         println!("{}", final_report);
//!     }
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ollama` | Ollama local inference (default) |
//! | `openai` | OpenAI API and compatible endpoints |
//! | `all-llm` | Both providers |
//!
//! ## Modules
//!
//! - [`research`] - Report workflow, section research loop and job engine
//! - [`search`] - Search providers (DuckDuckGo, Tavily, arXiv, local, patent)
//! - [`llm`] - LLM client implementations and structured output
//! - [`db`] - Persistent job store (SQLite, Turso)
//! - [`types`] - Common error handling
//!
//! ## Configuration
//!
//! Everything is configured in `deepreport.toml`: providers and models,
//! search backends, the database, the engine pool, and the default
//! `[research]` settings each job's overrides are merged onto.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

/// Command-line parsing and terminal output.
pub mod cli;
/// Persistent job store (libsql: local file, in-memory or Turso).
pub mod db;
/// LLM provider clients and abstractions.
pub mod llm;
/// Research orchestration.
pub mod research;
/// Search providers and the provider registry.
pub mod search;
/// Core error types.
pub mod types;
/// Configuration utilities.
pub mod utils;

// Re-export commonly used types
pub use db::{DatabaseProvider, JobStore, TursoClient};
pub use llm::{ConfigBasedLLMFactory, LLMClient, LLMClientFactoryTrait, Provider, ProviderRegistry};
pub use research::{
    FeedbackInput, Job, JobStatus, JobStatusView, JobSummary, PlanView, ResearchConfig,
    ResearchCoordinator, ResearchResult, Section,
};
pub use search::{SearchProvider, SearchRegistry};
pub use types::{AppError, Result};
pub use utils::toml_config::{DeepReportConfig, DeepReportConfigManager};
