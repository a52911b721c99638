//! CLI module for deepreport
//!
//! Provides command-line parsing for the `deepreport` binary.
//! Uses clap for argument parsing and owo-colors for colored terminal output.

pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// deepreport - deep research agent
///
/// Plans a report outline for a topic, researches every section across the
/// configured search providers, and compiles a cited Markdown report.
#[derive(Parser, Debug)]
#[command(
    name = "deepreport",
    author = "Dirmacs <build@dirmacs.com>",
    version,
    about = "deepreport - plan, research and compile cited reports",
    long_about = "Plans a report outline for a topic, researches each section across\n\
                  pluggable search providers, and compiles a cited Markdown report.\n\n\
                  Jobs are persisted; interrupted jobs resume on the next start.",
    after_help = "EXAMPLES:\n    \
                  deepreport run \"How do CRDTs converge?\" --follow\n    \
                  deepreport run \"Solid-state batteries\" --skip-feedback\n    \
                  deepreport feedback <JOB_ID> --approve\n    \
                  deepreport feedback <JOB_ID> \"Add a section on cost\"\n    \
                  deepreport result <JOB_ID> > report.md"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "deepreport.toml", global = true)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a research job
    ///
    /// Without --follow the command returns once the job is created; the
    /// job keeps running only while this process is alive, and is picked up
    /// again by `resume`.
    Run {
        /// Topic or question to research
        topic: String,

        /// Owner id recorded with the job
        #[arg(long)]
        owner: Option<String>,

        /// Approve the generated plan automatically
        #[arg(long)]
        skip_feedback: bool,

        /// Per-job configuration overrides as a JSON object
        #[arg(long, value_name = "JSON")]
        overrides: Option<String>,

        /// Stay attached, prompt for plan feedback and print the report
        #[arg(short, long)]
        follow: bool,
    },

    /// Show the status of a job
    Status {
        /// Job id
        id: String,
    },

    /// Show the planned sections of a job
    Plan {
        /// Job id
        id: String,
    },

    /// Approve or revise the plan of a job waiting for feedback
    Feedback {
        /// Job id
        id: String,

        /// Revision request; omit (or pass --approve) to approve the plan
        text: Option<String>,

        /// Approve the plan as-is
        #[arg(long, conflicts_with = "text")]
        approve: bool,

        /// Wait for the job to finish and print the report
        #[arg(short, long)]
        follow: bool,
    },

    /// Print the final report of a completed job
    Result {
        /// Job id
        id: String,
    },

    /// List jobs, newest first
    List {
        /// Only jobs of this owner
        #[arg(long)]
        owner: Option<String>,
    },

    /// Cancel and delete a job
    Delete {
        /// Job id
        id: String,
    },

    /// Resume interrupted jobs and wait for them
    Resume,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
