use anyhow::{bail, Context};
use deepreport::cli::output::Output;
use deepreport::cli::{Cli, Commands};
use deepreport::research::{JobStatus, ResearchCoordinator, ResearchResult};
use deepreport::utils::toml_config::{DeepReportConfig, DeepReportConfigManager};
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    if let Err(e) = run(cli, &output).await {
        output.error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli, output: &Output) -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    let manager = DeepReportConfigManager::new(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    let config = manager.config();
    init_tracing(&config, cli.verbose);

    let engine = ResearchCoordinator::from_config(&config)
        .await
        .context("Failed to initialize the research engine")?;

    let result = tokio::select! {
        result = dispatch(&engine, cli.command, output) => result,
        _ = tokio::signal::ctrl_c() => {
            output.newline();
            output.warning("Interrupted; running jobs resume with `deepreport resume`");
            Ok(())
        }
    };

    engine.shutdown().await;
    result
}

fn init_tracing(config: &DeepReportConfig, verbose: bool) {
    let level = if verbose {
        "deepreport=debug".to_string()
    } else {
        config.server.log_level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let json = config.server.log_format.eq_ignore_ascii_case("json");

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_target(false).with_writer(std::io::stderr)))
        .init();
}

async fn dispatch(engine: &ResearchCoordinator, command: Commands, output: &Output) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            topic,
            owner,
            skip_feedback,
            overrides,
            follow,
        } => {
            let mut overrides = match overrides {
                Some(raw) => serde_json::from_str::<serde_json::Value>(&raw)
                    .context("--overrides must be a JSON object")?,
                None => serde_json::json!({}),
            };
            if skip_feedback {
                match overrides.as_object_mut() {
                    Some(map) => {
                        map.insert("skip_human_feedback".to_string(), serde_json::Value::Bool(true));
                    }
                    None => bail!("--overrides must be a JSON object"),
                }
            }

            output.banner();
            let job_id = engine.start(&topic, Some(overrides), owner).await?;
            output.success(&format!("Research job {} started", job_id));

            if follow {
                follow_job(engine, &job_id, output).await
            } else {
                engine.wait_idle(&job_id).await;
                print_status(engine, &job_id, output).await
            }
        }

        Commands::Status { id } => print_status(engine, &id, output).await,

        Commands::Plan { id } => {
            let plan = engine
                .get_plan(&id)
                .await?
                .with_context(|| format!("Job {} not found", id))?;
            output.plan(&plan);
            Ok(())
        }

        Commands::Feedback {
            id,
            text,
            approve,
            follow,
        } => {
            let feedback = if approve { None } else { text };
            if !engine.submit_feedback(&id, feedback.as_deref()).await? {
                bail!("Job {} is not waiting for feedback", id);
            }
            output.success("Feedback submitted");

            if follow {
                follow_job(engine, &id, output).await
            } else {
                engine.wait_idle(&id).await;
                print_status(engine, &id, output).await
            }
        }

        Commands::Result { id } => {
            let result = engine
                .get_result(&id)
                .await?
                .with_context(|| format!("Job {} not found", id))?;
            match result {
                ResearchResult::Completed { final_report, .. } => {
                    output.report(&final_report);
                    Ok(())
                }
                ResearchResult::NotReady { status, error } => match error {
                    Some(error) => bail!("Job {} failed: {}", id, error),
                    None => bail!("Job {} is not complete yet ({})", id, status),
                },
            }
        }

        Commands::List { owner } => {
            let jobs = engine.list(owner.as_deref()).await?;
            output.jobs(&jobs);
            Ok(())
        }

        Commands::Delete { id } => {
            if engine.delete(&id).await? {
                output.success(&format!("Job {} deleted", id));
                Ok(())
            } else {
                bail!("Job {} not found", id)
            }
        }

        Commands::Resume => {
            let resumed = engine.recover().await?;
            if resumed == 0 {
                output.info("No interrupted jobs");
                return Ok(());
            }
            output.info(&format!("Resumed {} job(s)", resumed));
            while let Some(id) = engine.running_job_ids().into_iter().next() {
                engine.wait_idle(&id).await;
            }
            output.success("All resumed jobs have stopped");
            Ok(())
        }
    }
}

async fn print_status(engine: &ResearchCoordinator, job_id: &str, output: &Output) -> anyhow::Result<()> {
    let view = engine
        .get_status(job_id)
        .await?
        .with_context(|| format!("Job {} not found", job_id))?;
    output.status(&view);
    Ok(())
}

/// Poll the job, asking for plan feedback on the terminal, until it finishes.
async fn follow_job(engine: &ResearchCoordinator, job_id: &str, output: &Output) -> anyhow::Result<()> {
    loop {
        let view = engine
            .get_status(job_id)
            .await?
            .with_context(|| format!("Job {} was deleted", job_id))?;
        output.progress(&view);

        match view.status {
            JobStatus::Completed => {
                output.newline();
                if let Some(report) = view.final_report {
                    output.report(&report);
                }
                output.success("Report complete");
                return Ok(());
            }
            JobStatus::Error => {
                output.newline();
                bail!(
                    "Research failed: {}",
                    view.error.unwrap_or_else(|| "unknown error".to_string())
                );
            }
            JobStatus::WaitingForFeedback if view.waiting_for_feedback => {
                output.newline();
                if let Some(plan) = engine.get_plan(job_id).await? {
                    output.plan(&plan);
                }
                let answer = output.prompt("Feedback (empty to approve):")?;
                let feedback = (!answer.is_empty()).then_some(answer);
                if !engine.submit_feedback(job_id, feedback.as_deref()).await? {
                    output.warning("The job is no longer waiting for feedback");
                }
            }
            _ => tokio::time::sleep(POLL_INTERVAL).await,
        }
    }
}
