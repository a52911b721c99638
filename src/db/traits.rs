//! Job store abstraction
//!
//! This module provides the `JobStore` trait the research engine persists
//! through, and `DatabaseProvider` for choosing a backend (in-memory SQLite,
//! file-based SQLite, remote Turso).
//!
//! # Example
//!
//! ```rust,ignore
//! use deepreport::db::{DatabaseProvider, JobStore};
//!
//! // Use in-memory database (tests, throwaway runs)
//! let store = DatabaseProvider::Memory.create_store().await?;
//!
//! // Use file-based SQLite
//! let store = DatabaseProvider::SQLite { path: "data.db".into() }.create_store().await?;
//! ```

use crate::research::state::{Job, JobSummary};
use crate::types::Result;
use crate::utils::toml_config::DatabaseConfig;
use async_trait::async_trait;
use std::sync::Arc;

/// Database provider configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub enum DatabaseProvider {
    /// In-memory SQLite database (ephemeral, lost on restart)
    #[default]
    Memory,
    /// File-based SQLite database
    SQLite {
        /// Path to the SQLite database file
        path: String,
    },
    /// Remote Turso database (requires network access)
    Turso {
        /// The Turso database URL (e.g., `libsql://your-db.turso.io`)
        url: String,
        /// Authentication token for the Turso database
        auth_token: String,
    },
}

impl DatabaseProvider {
    /// Create a job store from this provider configuration
    pub async fn create_store(&self) -> Result<Arc<dyn JobStore>> {
        match self {
            DatabaseProvider::Memory => {
                let client = super::turso::TursoClient::new_memory().await?;
                Ok(Arc::new(client))
            }
            DatabaseProvider::SQLite { path } => {
                let client = super::turso::TursoClient::new_local(path).await?;
                Ok(Arc::new(client))
            }
            DatabaseProvider::Turso { url, auth_token } => {
                let client =
                    super::turso::TursoClient::new_remote(url.clone(), auth_token.clone()).await?;
                Ok(Arc::new(client))
            }
        }
    }

    /// Pick a backend from `[database]`: Turso when both of its env vars are
    /// set, otherwise the local `url` (":memory:" for an in-memory store).
    pub fn from_config(config: &DatabaseConfig) -> Self {
        // Check for Turso configuration first
        if let (Some(url_env), Some(token_env)) = (&config.turso_url_env, &config.turso_token_env) {
            if let (Ok(url), Ok(token)) = (std::env::var(url_env), std::env::var(token_env)) {
                if !url.is_empty() && !token.is_empty() {
                    return DatabaseProvider::Turso {
                        url,
                        auth_token: token,
                    };
                }
            }
        }

        if config.url.is_empty() || config.url == ":memory:" {
            DatabaseProvider::Memory
        } else {
            DatabaseProvider::SQLite {
                path: config.url.clone(),
            }
        }
    }
}

/// Persistence for research jobs
///
/// A job is stored together with its sections and reference list; every
/// write replaces all three in one transaction.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or overwrite a job
    async fn save(&self, job: &Job) -> Result<()>;

    /// Overwrite a job only if it still exists. Returns false when the row
    /// is gone (the job was deleted).
    async fn update(&self, job: &Job) -> Result<bool>;

    async fn get(&self, id: &str) -> Result<Option<Job>>;

    /// Jobs newest first, optionally restricted to one owner
    async fn list(&self, owner_id: Option<&str>) -> Result<Vec<JobSummary>>;

    /// Remove a job with its sections and references
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Ids of jobs that were interrupted mid-run: not terminal and not
    /// waiting for feedback. Oldest first.
    async fn list_resumable(&self) -> Result<Vec<String>>;
}

// ============== Implement JobStore for TursoClient ==============

#[async_trait]
impl JobStore for super::turso::TursoClient {
    async fn save(&self, job: &Job) -> Result<()> {
        super::turso::TursoClient::save_job(self, job).await
    }

    async fn update(&self, job: &Job) -> Result<bool> {
        super::turso::TursoClient::update_job(self, job).await
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        super::turso::TursoClient::get_job(self, id).await
    }

    async fn list(&self, owner_id: Option<&str>) -> Result<Vec<JobSummary>> {
        super::turso::TursoClient::list_jobs(self, owner_id).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        super::turso::TursoClient::delete_job(self, id).await
    }

    async fn list_resumable(&self) -> Result<Vec<String>> {
        super::turso::TursoClient::list_resumable_jobs(self).await
    }
}
