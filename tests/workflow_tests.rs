//! End-to-end tests of the research engine
//!
//! Jobs run against a scripted LLM and in-process search backends, with the
//! job store in memory or in a temporary SQLite file.

mod common;

use common::mocks::{
    engine, engine_with, file_store, memory_store, registry, test_overrides, ScriptedLLM,
    StaticSearch, REVISED_SECTION, REVISION_REQUEST,
};
use deepreport::research::state::WorkflowStep;
use deepreport::research::{JobStatus, ResearchCoordinator, ResearchResult};
use deepreport::search::local::LocalDocumentSearch;
use deepreport::search::SearchProvider;
use deepreport::utils::toml_config::EngineConfig;
use deepreport::db::JobStore;
use deepreport::AppError;
use parking_lot::Mutex;
use rstest::rstest;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(20);

/// `test_overrides(providers)` with `extra` merged on top.
fn overrides(providers: &[&str], extra: Value) -> Value {
    let mut base = test_overrides(providers);
    if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            base.insert(key.clone(), value.clone());
        }
    }
    base
}

async fn settle(engine: &ResearchCoordinator, job_id: &str) {
    tokio::time::timeout(TIMEOUT, engine.wait_idle(job_id))
        .await
        .expect("run did not stop in time");
}

async fn wait_for<F>(engine: &ResearchCoordinator, job_id: &str, predicate: F)
where
    F: Fn(&deepreport::JobStatusView) -> bool,
{
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let view = engine.get_status(job_id).await.unwrap().expect("job exists");
        if predicate(&view) {
            return;
        }
        assert!(tokio::time::Instant::now() < deadline, "timed out, last status {:?}", view);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn report_of(result: Option<ResearchResult>) -> String {
    match result {
        Some(ResearchResult::Completed { final_report, .. }) => final_report,
        other => panic!("job not completed: {:?}", other),
    }
}

#[tokio::test]
async fn test_skip_feedback_runs_to_completion() {
    let llm = Arc::new(ScriptedLLM::new(&[("Background", &[]), ("Adoption", &[])]));
    let engine = engine(memory_store().await, llm.clone(), registry(vec![]));

    let job_id = engine
        .start(
            "Solid-state batteries",
            Some(overrides(&[], json!({ "skip_human_feedback": true }))),
            None,
        )
        .await
        .unwrap();
    settle(&engine, &job_id).await;

    let status = engine.get_status(&job_id).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.progress, 1.0);
    assert!(!status.waiting_for_feedback);
    assert_eq!(status.sections, vec!["Background", "Adoption"]);
    assert_eq!(status.completed_sections.len(), 2);

    let report = report_of(engine.get_result(&job_id).await.unwrap());
    assert!(report.starts_with("## Introduction\n\n"));
    assert!(report.contains("## Background"));
    assert!(report.contains("## Adoption"));
    assert!(report.contains("## Conclusion\n\nAll things considered"));
    assert!(report.contains("## References"));
    assert!(report.contains("(https://web.example.com/"));
    assert_eq!(report.matches("## Conclusion").count(), 1);
}

#[tokio::test]
async fn test_waits_for_feedback_then_approves() {
    let llm = Arc::new(ScriptedLLM::new(&[("Background", &[])]));
    let engine = engine(memory_store().await, llm.clone(), registry(vec![]));

    let job_id = engine
        .start("Is fusion power close?", Some(overrides(&[], json!({}))), None)
        .await
        .unwrap();
    settle(&engine, &job_id).await;

    let status = engine.get_status(&job_id).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::WaitingForFeedback);
    assert!(status.waiting_for_feedback);
    assert!(!engine.is_running(&job_id), "a parked job holds no task");
    assert_eq!(llm.section_writes("Background"), 0);

    let plan = engine.get_plan(&job_id).await.unwrap().unwrap();
    assert!(plan.waiting_for_feedback);
    assert_eq!(plan.sections.len(), 1);
    assert_eq!(plan.sections[0].search_options, vec!["web"]);

    assert!(matches!(
        engine.get_result(&job_id).await.unwrap(),
        Some(ResearchResult::NotReady {
            status: JobStatus::WaitingForFeedback,
            ..
        })
    ));

    assert!(engine.submit_feedback(&job_id, None).await.unwrap());
    settle(&engine, &job_id).await;

    let status = engine.get_status(&job_id).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert!(!status.waiting_for_feedback);
    assert!(report_of(engine.get_result(&job_id).await.unwrap()).contains("## Background"));
}

#[tokio::test]
async fn test_feedback_on_non_waiting_job_is_rejected() {
    let llm = Arc::new(ScriptedLLM::new(&[("Background", &[])]));
    let engine = engine(memory_store().await, llm, registry(vec![]));

    let job_id = engine
        .start(
            "Heat pumps",
            Some(overrides(&[], json!({ "skip_human_feedback": true }))),
            None,
        )
        .await
        .unwrap();
    settle(&engine, &job_id).await;

    assert!(!engine.submit_feedback(&job_id, None).await.unwrap());
    assert!(!engine.submit_feedback("no-such-job", Some("more")).await.unwrap());

    let status = engine.get_status(&job_id).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_revision_replans_and_waits_again() {
    let llm = Arc::new(ScriptedLLM::new(&[("Background", &[])]));
    let engine = engine(memory_store().await, llm.clone(), registry(vec![]));

    let job_id = engine
        .start("Geothermal energy", Some(overrides(&[], json!({}))), None)
        .await
        .unwrap();
    settle(&engine, &job_id).await;

    assert!(engine
        .submit_feedback(&job_id, Some(REVISION_REQUEST))
        .await
        .unwrap());
    settle(&engine, &job_id).await;

    let plan = engine.get_plan(&job_id).await.unwrap().unwrap();
    assert!(plan.waiting_for_feedback);
    let names: Vec<&str> = plan.sections.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Background", REVISED_SECTION]);
    assert_eq!(llm.section_writes("Background"), 0);

    assert!(engine.submit_feedback(&job_id, Some("   ")).await.unwrap());
    settle(&engine, &job_id).await;

    let report = report_of(engine.get_result(&job_id).await.unwrap());
    assert!(report.contains(&format!("## {}", REVISED_SECTION)));
}

#[tokio::test]
async fn test_malformed_feedback_fails_the_job() {
    let llm = Arc::new(ScriptedLLM::new(&[("Background", &[])]));
    let engine = engine(memory_store().await, llm, registry(vec![]));

    let job_id = engine
        .start("Tidal power", Some(overrides(&[], json!({}))), None)
        .await
        .unwrap();
    settle(&engine, &job_id).await;

    assert!(engine.submit_feedback_value(&job_id, json!(42)).await.unwrap());
    settle(&engine, &job_id).await;

    let status = engine.get_status(&job_id).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Error);
    assert!(!status.waiting_for_feedback);
    assert!(status.error.unwrap().contains("feedback"));
    assert!(matches!(
        engine.get_result(&job_id).await.unwrap(),
        Some(ResearchResult::NotReady {
            status: JobStatus::Error,
            error: Some(_)
        })
    ));
}

#[rstest]
#[case(0, 1)]
#[case(1, 2)]
#[case(2, 3)]
#[tokio::test]
async fn test_failing_grade_retries_are_bounded(#[case] max_reflection: u32, #[case] cycles: usize) {
    let llm = Arc::new(ScriptedLLM::new(&[("Background", &["sect"])]).always_failing());
    let sect = Arc::new(StaticSearch::new("sect"));
    let engine = engine(
        memory_store().await,
        llm.clone(),
        registry(vec![sect.clone() as Arc<dyn SearchProvider>]),
    );

    let job_id = engine
        .start(
            "Carbon capture",
            Some(overrides(
                &["sect"],
                json!({ "skip_human_feedback": true, "max_reflection": max_reflection }),
            )),
            None,
        )
        .await
        .unwrap();
    settle(&engine, &job_id).await;

    let status = engine.get_status(&job_id).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(sect.calls(), cycles);
    assert_eq!(llm.section_writes("Background"), cycles);
    assert_eq!(llm.grades(), cycles);
}

#[tokio::test]
async fn test_failing_provider_does_not_fail_the_section() {
    let llm = Arc::new(ScriptedLLM::new(&[("Background", &["web", "broken"])]));
    let broken = Arc::new(StaticSearch::failing("broken"));
    let engine = engine(
        memory_store().await,
        llm.clone(),
        registry(vec![broken.clone() as Arc<dyn SearchProvider>]),
    );

    let job_id = engine
        .start(
            "Hydrogen storage",
            Some(overrides(&["broken"], json!({ "skip_human_feedback": true }))),
            None,
        )
        .await
        .unwrap();
    settle(&engine, &job_id).await;

    let status = engine.get_status(&job_id).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(broken.calls(), 1);

    let prompts = llm.writer_prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("=== BROKEN SEARCH ERROR ==="));
    assert!(prompts[0].contains("=== WEB SEARCH RESULTS ==="));
}

#[tokio::test]
async fn test_deep_research_appends_numbered_passes() {
    let llm = Arc::new(ScriptedLLM::new(&[("Background", &[])]).with_subtopics(3));
    let engine = engine(memory_store().await, llm.clone(), registry(vec![]));

    let job_id = engine
        .start(
            "Perovskite solar cells",
            Some(overrides(
                &[],
                json!({
                    "skip_human_feedback": true,
                    "enable_deep_research": true,
                    "deep_research_depth": 2,
                    "deep_research_breadth": 2,
                }),
            )),
            None,
        )
        .await
        .unwrap();
    settle(&engine, &job_id).await;

    let report = report_of(engine.get_result(&job_id).await.unwrap());
    // breadth caps the three proposed subtopics at two, for each of two passes
    assert_eq!(llm.subsection_writes(), 4);

    let first = report.find("## Background: Detailed Analysis\n").expect("first pass");
    let second = report.find("## Background: Detailed Analysis 2\n").expect("second pass");
    assert!(first < second);
    assert!(!report.contains("Detailed Analysis 3"));
    assert_eq!(report.matches("### Subtopic 1").count(), 2);
    assert!(!report.contains("### Subtopic 3"));
}

#[tokio::test]
async fn test_report_keeps_plan_order_when_sections_finish_out_of_order() {
    let finished = Arc::new(Mutex::new(Vec::new()));
    let slow = StaticSearch::new("slow")
        .with_delay(Duration::from_millis(300))
        .with_log(finished.clone());
    let fast = StaticSearch::new("fast").with_log(finished.clone());
    let llm = Arc::new(ScriptedLLM::new(&[("Alpha", &["slow"]), ("Beta", &["fast"])]));
    let engine = engine(
        memory_store().await,
        llm,
        registry(vec![Arc::new(slow), Arc::new(fast)]),
    );

    let job_id = engine
        .start(
            "Grid-scale storage",
            Some(overrides(&["slow", "fast"], json!({ "skip_human_feedback": true }))),
            None,
        )
        .await
        .unwrap();
    settle(&engine, &job_id).await;

    assert_eq!(*finished.lock(), vec!["fast", "slow"]);

    let report = report_of(engine.get_result(&job_id).await.unwrap());
    let intro = report.find("## Introduction").unwrap();
    let alpha = report.find("## Alpha").unwrap();
    let beta = report.find("## Beta").unwrap();
    let conclusion = report.find("## Conclusion").unwrap();
    let references = report.find("## References").unwrap();
    assert!(intro < alpha && alpha < beta && beta < conclusion && conclusion < references);
}

#[tokio::test]
async fn test_job_resumes_after_engine_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("jobs.db");
    let llm = Arc::new(ScriptedLLM::new(&[("Alpha", &["fast"]), ("Beta", &["slow"])]));
    let job_overrides = overrides(&["fast", "slow"], json!({ "skip_human_feedback": true }));

    let first = engine(
        file_store(&db_path).await,
        llm.clone(),
        registry(vec![
            Arc::new(StaticSearch::new("fast")),
            Arc::new(StaticSearch::new("slow").with_delay(Duration::from_millis(1500))),
        ]),
    );
    let job_id = first
        .start("Offshore wind", Some(job_overrides), None)
        .await
        .unwrap();
    wait_for(&first, &job_id, |view| {
        view.completed_sections.iter().any(|s| s == "Alpha")
    })
    .await;
    first.shutdown().await;

    let status = first.get_status(&job_id).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::ResearchingSections);
    assert_eq!(status.completed_sections, vec!["Alpha"]);
    drop(first);

    let second = engine(
        file_store(&db_path).await,
        llm.clone(),
        registry(vec![
            Arc::new(StaticSearch::new("fast")),
            Arc::new(StaticSearch::new("slow")),
        ]),
    );
    assert_eq!(second.recover().await.unwrap(), 1);
    settle(&second, &job_id).await;

    let status = second.get_status(&job_id).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(llm.section_writes("Alpha"), 1, "completed sections are not redone");
    assert_eq!(llm.section_writes("Beta"), 1);

    let report = report_of(second.get_result(&job_id).await.unwrap());
    assert!(report.find("## Alpha").unwrap() < report.find("## Beta").unwrap());
    assert_eq!(second.recover().await.unwrap(), 0);
}

#[tokio::test]
async fn test_parked_job_is_not_resumed_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("jobs.db");
    let llm = Arc::new(ScriptedLLM::new(&[("Alpha", &[])]));

    let first = engine(file_store(&db_path).await, llm.clone(), registry(vec![]));
    let job_id = first
        .start("Desalination", Some(overrides(&[], json!({}))), None)
        .await
        .unwrap();
    settle(&first, &job_id).await;
    drop(first);

    let second = engine(file_store(&db_path).await, llm, registry(vec![]));
    assert_eq!(second.recover().await.unwrap(), 0);
    let plan = second.get_plan(&job_id).await.unwrap().unwrap();
    assert!(plan.waiting_for_feedback);

    assert!(second.submit_feedback(&job_id, None).await.unwrap());
    settle(&second, &job_id).await;
    let status = second.get_status(&job_id).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_delete_cancels_running_job() {
    let llm = Arc::new(ScriptedLLM::new(&[("Alpha", &["slow"])]));
    let engine = engine(
        memory_store().await,
        llm.clone(),
        registry(vec![Arc::new(
            StaticSearch::new("slow").with_delay(Duration::from_millis(500)),
        )]),
    );

    let job_id = engine
        .start(
            "Small modular reactors",
            Some(overrides(&["slow"], json!({ "skip_human_feedback": true }))),
            None,
        )
        .await
        .unwrap();
    wait_for(&engine, &job_id, |view| {
        view.status == JobStatus::ResearchingSections
    })
    .await;

    assert!(engine.delete(&job_id).await.unwrap());
    settle(&engine, &job_id).await;
    assert!(!engine.is_running(&job_id));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(engine.get_status(&job_id).await.unwrap().is_none());
    assert!(engine.list(None).await.unwrap().is_empty());
    assert_eq!(llm.section_writes("Alpha"), 0);

    assert!(!engine.delete(&job_id).await.unwrap());
}

#[tokio::test]
async fn test_list_filters_by_owner() {
    let llm = Arc::new(ScriptedLLM::new(&[("Alpha", &[])]));
    let engine = engine(memory_store().await, llm, registry(vec![]));

    let mut ids = Vec::new();
    for owner in [Some("alice"), Some("bob"), None, Some("alice")] {
        let id = engine
            .start(
                "Lithium recycling",
                Some(overrides(&[], json!({}))),
                owner.map(str::to_string),
            )
            .await
            .unwrap();
        settle(&engine, &id).await;
        ids.push(id);
    }

    let all = engine.list(None).await.unwrap();
    assert_eq!(all.len(), 4);
    // newest first
    assert_eq!(all[0].id, ids[3]);
    assert_eq!(all[3].id, ids[0]);

    let alice = engine.list(Some("alice")).await.unwrap();
    assert_eq!(alice.len(), 2);
    assert!(alice.iter().all(|job| job.owner_id.as_deref() == Some("alice")));
    assert!(engine.list(Some("carol")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_citations_only_grow() {
    let llm = Arc::new(
        ScriptedLLM::new(&[("Alpha", &["slow"]), ("Beta", &["slow"])]).always_failing(),
    );
    let store = memory_store().await;
    let engine = engine(
        store.clone(),
        llm,
        registry(vec![Arc::new(
            StaticSearch::new("slow").with_delay(Duration::from_millis(40)),
        )]),
    );

    let job_id = engine
        .start(
            "Direct air capture",
            Some(overrides(
                &["slow"],
                json!({ "skip_human_feedback": true, "max_reflection": 2 }),
            )),
            None,
        )
        .await
        .unwrap();

    let mut snapshots = Vec::new();
    loop {
        let job = store.get(&job_id).await.unwrap().unwrap();
        let done = job.status.is_terminal();
        snapshots.push(job.all_urls);
        if done {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    settle(&engine, &job_id).await;

    for pair in snapshots.windows(2) {
        assert!(pair[1].starts_with(&pair[0]), "citations were dropped or reordered");
    }
    let last = snapshots.last().unwrap();
    let unique: HashSet<&str> = last.iter().map(|c| c.url.as_str()).collect();
    assert_eq!(unique.len(), last.len());
    assert!(last.iter().any(|c| c.url.starts_with("https://slow.example.com/")));
}

#[tokio::test]
async fn test_invalid_start_requests() {
    let llm = Arc::new(ScriptedLLM::new(&[("Alpha", &[])]));
    let engine = engine(memory_store().await, llm, registry(vec![]));

    assert!(matches!(
        engine.start("   ", None, None).await,
        Err(AppError::InvalidInput(_))
    ));
    assert!(matches!(
        engine.start("Topic", Some(json!(["not", "an", "object"])), None).await,
        Err(AppError::InvalidInput(_))
    ));
    assert!(matches!(
        engine
            .start("Topic", Some(json!({ "number_of_queries": 0 })), None)
            .await,
        Err(AppError::InvalidInput(_))
    ));
    assert!(matches!(
        engine
            .start("Topic", Some(json!({ "request_delay_secs": 1e30 })), None)
            .await,
        Err(AppError::InvalidInput(_))
    ));
    assert!(engine.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_job_queries_return_none() {
    let llm = Arc::new(ScriptedLLM::new(&[("Alpha", &[])]));
    let engine = engine(memory_store().await, llm, registry(vec![]));

    assert!(engine.get_status("missing").await.unwrap().is_none());
    assert!(engine.get_plan("missing").await.unwrap().is_none());
    assert!(engine.get_result("missing").await.unwrap().is_none());
    assert!(!engine.delete("missing").await.unwrap());
}

#[tokio::test]
async fn test_checkpoint_is_stored_with_the_job() {
    let llm = Arc::new(ScriptedLLM::new(&[("Alpha", &[])]));
    let store = memory_store().await;
    let engine = engine(store.clone(), llm, registry(vec![]));

    let job_id = engine
        .start("Ocean alkalinity", Some(overrides(&[], json!({ "max_sections": 3 }))), Some("dana".into()))
        .await
        .unwrap();
    settle(&engine, &job_id).await;

    let job = store.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.checkpoint.step, WorkflowStep::HumanFeedback);
    assert!(job.checkpoint.pending_feedback.is_none());
    assert_eq!(job.config.max_sections, 3);
    assert_eq!(job.config.request_delay_secs, 0.0);
    assert_eq!(job.owner_id.as_deref(), Some("dana"));
    assert!(job.introduction.is_some());
    assert!(job.progress >= 0.3 && job.progress < 0.4);
}

#[tokio::test]
async fn test_panicking_run_fails_the_job_and_detaches() {
    let llm = Arc::new(ScriptedLLM::new(&[("Alpha", &[])]).panicking_introduction());
    let engine = engine(memory_store().await, llm, registry(vec![]));

    let job_id = engine
        .start(
            "Compressed air storage",
            Some(overrides(&[], json!({ "skip_human_feedback": true }))),
            None,
        )
        .await
        .unwrap();
    settle(&engine, &job_id).await;

    assert!(!engine.is_running(&job_id));
    let status = engine.get_status(&job_id).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Error);
    assert!(status.error.unwrap().contains("panicked"));
    assert_eq!(engine.recover().await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_jobs_are_capped() {
    let slow = Arc::new(StaticSearch::new("slow").with_delay(Duration::from_millis(200)));
    let llm = Arc::new(ScriptedLLM::new(&[("Alpha", &["slow"])]));
    let engine = engine_with(
        memory_store().await,
        llm,
        registry(vec![slow.clone() as Arc<dyn SearchProvider>]),
        &EngineConfig {
            max_concurrent_jobs: 1,
            ..EngineConfig::default()
        },
    );

    let job_overrides = overrides(&["slow"], json!({ "skip_human_feedback": true }));
    let first = engine
        .start("Pumped hydro", Some(job_overrides.clone()), None)
        .await
        .unwrap();
    let second = engine
        .start("Flywheels", Some(job_overrides), None)
        .await
        .unwrap();
    settle(&engine, &first).await;
    settle(&engine, &second).await;

    for id in [&first, &second] {
        let status = engine.get_status(id).await.unwrap().unwrap();
        assert_eq!(status.status, JobStatus::Completed);
    }
    assert_eq!(slow.calls(), 2);
    assert_eq!(slow.max_concurrent(), 1, "runs overlapped past the cap");
}

#[tokio::test]
async fn test_parked_job_does_not_hold_a_permit() {
    let llm = Arc::new(ScriptedLLM::new(&[("Alpha", &[])]));
    let engine = engine_with(
        memory_store().await,
        llm,
        registry(vec![]),
        &EngineConfig {
            max_concurrent_jobs: 1,
            ..EngineConfig::default()
        },
    );

    let parked = engine
        .start("Gravity batteries", Some(overrides(&[], json!({}))), None)
        .await
        .unwrap();
    settle(&engine, &parked).await;

    let other = engine
        .start(
            "Sand batteries",
            Some(overrides(&[], json!({ "skip_human_feedback": true }))),
            None,
        )
        .await
        .unwrap();
    settle(&engine, &other).await;

    let status = engine.get_status(&other).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    let status = engine.get_status(&parked).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::WaitingForFeedback);
}

#[tokio::test]
async fn test_failed_section_fails_only_its_job() {
    let llm = Arc::new(
        ScriptedLLM::new(&[("Alpha", &["web"]), ("Beta", &["slow"])])
            .failing_writer("Brine mining", "Alpha"),
    );
    let store = memory_store().await;
    let engine = engine(
        store.clone(),
        llm.clone(),
        registry(vec![Arc::new(
            StaticSearch::new("slow").with_delay(Duration::from_millis(500)),
        )]),
    );

    let job_overrides = overrides(&["slow"], json!({ "skip_human_feedback": true }));
    let failing = engine
        .start("Brine mining", Some(job_overrides.clone()), None)
        .await
        .unwrap();
    let healthy = engine
        .start("Clay mining", Some(job_overrides), None)
        .await
        .unwrap();
    settle(&engine, &failing).await;
    settle(&engine, &healthy).await;

    let status = engine.get_status(&failing).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Error);
    assert!(status.error.unwrap().contains("writer unavailable for Alpha"));
    let job = store.get(&failing).await.unwrap().unwrap();
    assert!(job.final_report.is_none());
    assert!(!job.sections[0].completed);
    // the slow sibling was aborted before it reached the writer
    assert_eq!(llm.section_writes_for("Brine mining", "Beta"), 0);
    assert!(!job.sections[1].completed);

    let report = report_of(engine.get_result(&healthy).await.unwrap());
    assert!(report.contains("## Alpha") && report.contains("## Beta"));
    assert_eq!(llm.section_writes_for("Clay mining", "Beta"), 1);
}

#[tokio::test]
async fn test_resumed_job_releases_its_ephemeral_index() {
    let docs = tempfile::tempdir().unwrap();
    std::fs::write(
        docs.path().join("notes.md"),
        "Molten salt stores heat for concentrated solar plants.",
    )
    .unwrap();
    let indexes = tempfile::tempdir().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("jobs.db");
    let llm = Arc::new(ScriptedLLM::new(&[("Alpha", &["local"])]));
    let job_overrides = overrides(
        &["local"],
        json!({
            "provider_params": {
                "local": { "document_path": docs.path(), "ephemeral": true }
            }
        }),
    );
    let local = || {
        registry(vec![
            Arc::new(LocalDocumentSearch::new(indexes.path().to_path_buf())) as Arc<dyn SearchProvider>,
        ])
    };
    let index_files = || std::fs::read_dir(indexes.path()).unwrap().count();

    let first = engine(file_store(&db_path).await, llm.clone(), local());
    let job_id = first
        .start("Thermal storage", Some(job_overrides), None)
        .await
        .unwrap();
    settle(&first, &job_id).await;
    assert_eq!(index_files(), 1);
    drop(first);

    let second = engine(file_store(&db_path).await, llm, local());
    assert!(second.submit_feedback(&job_id, None).await.unwrap());
    settle(&second, &job_id).await;

    let status = second.get_status(&job_id).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(index_files(), 0, "ephemeral index outlived its last job");
}

#[tokio::test]
async fn test_empty_subtopic_plan_ends_deep_research() {
    let llm = Arc::new(ScriptedLLM::new(&[("Background", &[])]).with_subtopics(0));
    let engine = engine(memory_store().await, llm.clone(), registry(vec![]));

    let job_id = engine
        .start(
            "Sodium-ion batteries",
            Some(overrides(
                &[],
                json!({
                    "skip_human_feedback": true,
                    "enable_deep_research": true,
                    "deep_research_depth": 2,
                }),
            )),
            None,
        )
        .await
        .unwrap();
    settle(&engine, &job_id).await;

    let report = report_of(engine.get_result(&job_id).await.unwrap());
    assert_eq!(llm.subsection_writes(), 0);
    assert!(!report.contains("Detailed Analysis"));
    assert!(report.contains("## Background"));
}
