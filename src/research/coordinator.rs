//! Research job execution engine
//!
//! [`ResearchCoordinator`] owns the lifecycle of research jobs: it creates
//! them, runs their workflows in background tasks under a bounded pool of
//! permits, resumes them after plan feedback or a restart, and cancels them
//! on delete. All job state lives in the [`JobStore`]; a run always reloads
//! the job and continues from its checkpoint.

use crate::db::{DatabaseProvider, JobStore};
use crate::llm::{ConfigBasedLLMFactory, LLMClientFactoryTrait};
use crate::research::cancel::CancelToken;
use crate::research::config::ResearchConfig;
use crate::research::state::{
    Job, JobStatus, JobStatusView, JobSummary, PlanView, ResearchResult, WorkflowStep,
};
use crate::research::workflow::{ReportWorkflow, RunOutcome};
use crate::search::SearchRegistry;
use crate::types::{AppError, Result};
use crate::utils::toml_config::{DeepReportConfig, EngineConfig};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

/// A workflow task currently attached to a job
struct ActiveRun {
    cancel: CancelToken,
    done: watch::Receiver<bool>,
}

type ActiveRuns = Arc<Mutex<HashMap<String, ActiveRun>>>;

/// Starts, resumes and cancels research jobs
pub struct ResearchCoordinator {
    store: Arc<dyn JobStore>,
    llm: Arc<dyn LLMClientFactoryTrait>,
    search: Arc<SearchRegistry>,
    defaults: ResearchConfig,
    permits: Arc<Semaphore>,
    active: ActiveRuns,
    /// Serializes feedback submission and deletion
    transition: tokio::sync::Mutex<()>,
}

impl ResearchCoordinator {
    pub fn new(
        store: Arc<dyn JobStore>,
        llm: Arc<dyn LLMClientFactoryTrait>,
        search: Arc<SearchRegistry>,
        engine: &EngineConfig,
        defaults: ResearchConfig,
    ) -> Self {
        Self {
            store,
            llm,
            search,
            defaults,
            permits: Arc::new(Semaphore::new(engine.max_concurrent_jobs.max(1))),
            active: Arc::new(Mutex::new(HashMap::new())),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    /// Production wiring: database, model registry and search providers from
    /// the loaded configuration.
    pub async fn from_config(config: &DeepReportConfig) -> Result<Self> {
        let store = DatabaseProvider::from_config(&config.database)
            .create_store()
            .await?;
        let llm: Arc<dyn LLMClientFactoryTrait> = Arc::new(ConfigBasedLLMFactory::from_config(config));
        let search = Arc::new(SearchRegistry::from_config(config));
        Ok(Self::new(
            store,
            llm,
            search,
            &config.engine,
            config.research.clone(),
        ))
    }

    /// Create a job and start researching it in the background.
    pub async fn start(
        &self,
        topic: &str,
        overrides: Option<Value>,
        owner_id: Option<String>,
    ) -> Result<String> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(AppError::InvalidInput("Research topic must not be empty".to_string()));
        }

        let config = ResearchConfig::resolve(&self.defaults, overrides.as_ref())?;
        let job = Job::new(topic, config, owner_id);
        self.store.save(&job).await?;
        info!(job_id = %job.id, topic, "Research job created");

        self.spawn_run(&job.id);
        Ok(job.id)
    }

    /// Approve the plan (`None` or blank) or ask for a revision (text).
    pub async fn submit_feedback(&self, job_id: &str, feedback: Option<&str>) -> Result<bool> {
        let value = match feedback {
            None => Value::Bool(true),
            Some(text) => Value::String(text.to_string()),
        };
        self.submit_feedback_value(job_id, value).await
    }

    /// Hand raw feedback to a job parked at the feedback gate and resume it.
    ///
    /// Returns `false` when the job does not exist or is not waiting. The
    /// value is validated when the workflow consumes it; malformed input
    /// fails the job.
    pub async fn submit_feedback_value(&self, job_id: &str, feedback: Value) -> Result<bool> {
        let _transition = self.transition.lock().await;

        if !self.is_waiting(job_id).await? {
            return Ok(false);
        }
        // the run that parked the job may still be winding down
        if self.is_running(job_id) {
            self.wait_idle(job_id).await;
        }

        let Some(mut job) = self.store.get(job_id).await? else {
            return Ok(false);
        };
        if !is_parked(&job) || self.is_running(job_id) {
            return Ok(false);
        }

        // a stored `null` would read back as "no feedback yet"
        let feedback = if feedback.is_null() {
            Value::Bool(true)
        } else {
            feedback
        };
        job.checkpoint.pending_feedback = Some(feedback);
        job.set_status(JobStatus::ProcessingFeedback);
        job.touch();
        if !self.store.update(&job).await? {
            return Ok(false);
        }

        info!(job_id, "Plan feedback received, resuming");
        Ok(self.spawn_run(job_id))
    }

    async fn is_waiting(&self, job_id: &str) -> Result<bool> {
        Ok(self
            .store
            .get(job_id)
            .await?
            .map(|job| is_parked(&job))
            .unwrap_or(false))
    }

    pub async fn get_status(&self, job_id: &str) -> Result<Option<JobStatusView>> {
        Ok(self.store.get(job_id).await?.map(|job| job.status_view()))
    }

    pub async fn get_plan(&self, job_id: &str) -> Result<Option<PlanView>> {
        Ok(self.store.get(job_id).await?.map(|job| job.plan_view()))
    }

    pub async fn get_result(&self, job_id: &str) -> Result<Option<ResearchResult>> {
        Ok(self.store.get(job_id).await?.map(|job| job.result()))
    }

    /// Jobs newest first, optionally only those of one owner.
    pub async fn list(&self, owner_id: Option<&str>) -> Result<Vec<JobSummary>> {
        self.store.list(owner_id).await
    }

    /// Cancel any run of the job and remove it from the store.
    pub async fn delete(&self, job_id: &str) -> Result<bool> {
        let _transition = self.transition.lock().await;

        if let Some(run) = self.active.lock().get(job_id) {
            debug!(job_id, "Cancelling active run");
            run.cancel.cancel();
        }

        let deleted = self.store.delete(job_id).await?;
        self.search.release_all(job_id).await;
        if deleted {
            info!(job_id, "Research job deleted");
        }
        Ok(deleted)
    }

    /// Restart runs for jobs that were interrupted mid-workflow, e.g. by a
    /// previous process exiting. Jobs waiting for feedback stay parked.
    pub async fn recover(&self) -> Result<usize> {
        let ids = self.store.list_resumable().await?;
        let resumed = ids.iter().filter(|id| self.spawn_run(id)).count();
        if resumed > 0 {
            info!(resumed, "Resumed interrupted research jobs");
        }
        Ok(resumed)
    }

    /// Cancel every active run and wait for them to stop. Checkpoints are
    /// left untouched, so [`recover`](Self::recover) picks the jobs up again.
    pub async fn shutdown(&self) {
        let waiters: Vec<watch::Receiver<bool>> = {
            let active = self.active.lock();
            active
                .values()
                .map(|run| {
                    run.cancel.cancel();
                    run.done.clone()
                })
                .collect()
        };
        info!(runs = waiters.len(), "Shutting down research engine");
        for mut done in waiters {
            let _ = done.wait_for(|finished| *finished).await;
        }
    }

    /// Wait until the job has no run attached.
    pub async fn wait_idle(&self, job_id: &str) {
        let done = self.active.lock().get(job_id).map(|run| run.done.clone());
        if let Some(mut done) = done {
            let _ = done.wait_for(|finished| *finished).await;
        }
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.active.lock().contains_key(job_id)
    }

    /// Ids of jobs with a run attached.
    pub fn running_job_ids(&self) -> Vec<String> {
        self.active.lock().keys().cloned().collect()
    }

    /// Attach a background run to the job unless one is already attached.
    fn spawn_run(&self, job_id: &str) -> bool {
        let cancel = CancelToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        {
            let mut active = self.active.lock();
            if active.contains_key(job_id) {
                debug!(job_id, "Run already active");
                return false;
            }
            active.insert(
                job_id.to_string(),
                ActiveRun {
                    cancel: cancel.clone(),
                    done: done_rx,
                },
            );
        }

        let job_id = job_id.to_string();
        let workflow = ReportWorkflow::new(
            self.store.clone(),
            self.llm.clone(),
            self.search.clone(),
            cancel.clone(),
        );
        let permits = self.permits.clone();
        let store = self.store.clone();
        let guard = RunGuard {
            job_id: job_id.clone(),
            active: self.active.clone(),
            done: done_tx,
        };

        tokio::spawn(async move {
            let _guard = guard;
            let outcome = tokio::select! {
                permit = permits.acquire_owned() => match permit {
                    Ok(_permit) => {
                        let run_id = job_id.clone();
                        let mut run = tokio::spawn(async move { workflow.run(&run_id).await });
                        tokio::select! {
                            joined = &mut run => match joined {
                                Ok(outcome) => outcome,
                                Err(e) => {
                                    let message = format!("Research run panicked: {}", e);
                                    record_failure(store.as_ref(), &job_id, &message).await;
                                    Err(AppError::Internal(message))
                                }
                            },
                            _ = cancel.cancelled() => {
                                run.abort();
                                let _ = run.await;
                                Ok(RunOutcome::Cancelled)
                            }
                        }
                    }
                    Err(e) => Err(AppError::Internal(format!("Run pool closed: {}", e))),
                },
                _ = cancel.cancelled() => Ok(RunOutcome::Cancelled),
            };

            match outcome {
                Ok(RunOutcome::Failed) => warn!(job_id = %job_id, "Research run ended with an error"),
                Ok(outcome) => debug!(job_id = %job_id, ?outcome, "Research run ended"),
                Err(e) => error!(job_id = %job_id, error = %e, "Research run aborted"),
            }
        });

        true
    }
}

/// Detaches a run from its job when the run task ends, however it ends.
struct RunGuard {
    job_id: String,
    active: ActiveRuns,
    done: watch::Sender<bool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.job_id);
        let _ = self.done.send(true);
    }
}

/// Mark a job whose run died without reporting as failed.
async fn record_failure(store: &dyn JobStore, job_id: &str, message: &str) {
    let mut job = match store.get(job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => return,
        Err(e) => {
            error!(job_id, error = %e, "Could not load job to record failure");
            return;
        }
    };
    job.fail(message);
    job.touch();
    if let Err(e) = store.update(&job).await {
        error!(job_id, error = %e, "Could not record job failure");
    }
}

fn is_parked(job: &Job) -> bool {
    job.waiting_for_feedback && job.checkpoint.step == WorkflowStep::HumanFeedback
}
