//! Colored output helpers for CLI
//!
//! Provides consistent, colored terminal output for the deepreport CLI.
//! Everything decorative goes to stderr so a report printed with
//! [`Output::report`] can be redirected to a file on its own.

use crate::research::state::{JobStatus, JobStatusView, JobSummary, PlanView};
use owo_colors::OwoColorize;
use std::io::{self, Write};

/// Output style configuration
pub struct Output {
    /// Whether to use colored output
    pub colored: bool,
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

impl Output {
    /// Create a new output helper with colors enabled
    pub fn new() -> Self {
        Self { colored: true }
    }

    /// Create a new output helper with colors disabled
    pub fn no_color() -> Self {
        Self { colored: false }
    }

    /// Print the deepreport banner
    pub fn banner(&self) {
        if self.colored {
            eprintln!(
                "\n   {} {}\n",
                "deepreport".bright_cyan().bold(),
                format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
            );
        } else {
            eprintln!("\n   deepreport v{}\n", env!("CARGO_PKG_VERSION"));
        }
    }

    /// Print a success message with a checkmark
    pub fn success(&self, message: &str) {
        if self.colored {
            eprintln!("  {} {}", "✓".green().bold(), message.green());
        } else {
            eprintln!("  [OK] {}", message);
        }
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.colored {
            eprintln!("  {} {}", "•".blue(), message);
        } else {
            eprintln!("  [INFO] {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.colored {
            eprintln!("  {} {}", "⚠".yellow().bold(), message.yellow());
        } else {
            eprintln!("  [WARN] {}", message);
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.colored {
            eprintln!("  {} {}", "✗".red().bold(), message.red());
        } else {
            eprintln!("  [ERROR] {}", message);
        }
    }

    /// Print a header for a section
    pub fn header(&self, title: &str) {
        if self.colored {
            eprintln!("\n  {}", title.bright_white().bold().underline());
        } else {
            eprintln!("\n  === {} ===", title);
        }
    }

    /// Print a key-value pair
    pub fn kv(&self, key: &str, value: &str) {
        if self.colored {
            eprintln!("    {}: {}", key.dimmed(), value.bright_white());
        } else {
            eprintln!("    {}: {}", key, value);
        }
    }

    /// Print a list item
    pub fn list_item(&self, item: &str) {
        if self.colored {
            eprintln!("    {} {}", "•".blue(), item);
        } else {
            eprintln!("    - {}", item);
        }
    }

    /// Print a hint/tip message
    pub fn hint(&self, message: &str) {
        if self.colored {
            eprintln!("\n  {}", message.dimmed().italic());
        } else {
            eprintln!("\n  [TIP] {}", message);
        }
    }

    /// Print a command suggestion
    pub fn command(&self, cmd: &str) {
        if self.colored {
            eprintln!("     {}", format!("$ {}", cmd).bright_cyan());
        } else {
            eprintln!("     $ {}", cmd);
        }
    }

    /// A colored status label
    pub fn status_label(&self, status: JobStatus) -> String {
        let label = status.as_str();
        if !self.colored {
            return label.to_string();
        }
        match status {
            JobStatus::Completed => label.green().bold().to_string(),
            JobStatus::Error => label.red().bold().to_string(),
            JobStatus::WaitingForFeedback => label.yellow().bold().to_string(),
            _ => label.cyan().to_string(),
        }
    }

    /// Print a progress line, overwritten in place while following a job
    pub fn progress(&self, view: &JobStatusView) {
        let width = 30;
        let filled = ((view.progress.clamp(0.0, 1.0) * width as f32).round()) as usize;
        let bar = format!("{}{}", "#".repeat(filled), "-".repeat(width - filled));
        let pct = format!("{:>3.0}%", view.progress * 100.0);
        if self.colored {
            eprint!(
                "\r  [{}] {} {:<24}",
                bar.bright_cyan(),
                pct.bright_white(),
                self.status_label(view.status)
            );
        } else {
            eprint!("\r  [{}] {} {:<24}", bar, pct, view.status.as_str());
        }
        io::stderr().flush().ok();
    }

    /// Print the status view of a job
    pub fn status(&self, view: &JobStatusView) {
        self.header(&format!("Job {}", view.id));
        self.kv("status", &self.status_label(view.status));
        self.kv("progress", &format!("{:.0}%", view.progress * 100.0));
        self.kv(
            "sections",
            &format!("{}/{} complete", view.completed_sections.len(), view.sections.len()),
        );
        for name in &view.sections {
            let done = view.completed_sections.contains(name);
            self.list_item(&format!("{} {}", if done { "[x]" } else { "[ ]" }, name));
        }
        if let Some(error) = &view.error {
            self.error(error);
        }
        if view.waiting_for_feedback {
            self.hint("The plan is waiting for feedback:");
            self.command(&format!("deepreport plan {}", view.id));
            self.command(&format!("deepreport feedback {} --approve", view.id));
        }
    }

    /// Print the planned sections
    pub fn plan(&self, plan: &PlanView) {
        self.header("Report plan");
        for (i, section) in plan.sections.iter().enumerate() {
            if self.colored {
                eprintln!("\n  {} {}", format!("{}.", i + 1).dimmed(), section.name.bright_white().bold());
            } else {
                eprintln!("\n  {}. {}", i + 1, section.name);
            }
            eprintln!("     {}", section.description);
            if !section.search_options.is_empty() {
                self.kv("providers", &section.search_options.join(", "));
            }
        }
        if plan.waiting_for_feedback {
            self.hint("Approve with an empty answer, or describe the changes you want.");
        }
    }

    /// Print the job list as a table
    pub fn jobs(&self, jobs: &[JobSummary]) {
        if jobs.is_empty() {
            self.info("No research jobs");
            return;
        }
        self.table_header(&["ID", "STATUS", "PROGRESS", "SECTIONS", "TOPIC"]);
        for job in jobs {
            let id: String = job.id.chars().take(8).collect();
            let progress = format!("{:.0}%", job.progress * 100.0);
            let sections = format!("{}/{}", job.completed_section_count, job.section_count);
            let topic: String = job.topic.chars().take(48).collect();
            self.table_row(&[&id, job.status.as_str(), &progress, &sections, &topic]);
        }
    }

    /// Print the report itself to stdout
    pub fn report(&self, markdown: &str) {
        println!("{}", markdown);
    }

    /// Prompt for one line of input
    pub fn prompt(&self, message: &str) -> io::Result<String> {
        if self.colored {
            eprint!("  {} {} ", "?".bright_yellow().bold(), message.bright_white());
        } else {
            eprint!("  [?] {} ", message);
        }
        io::stderr().flush().ok();

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        Ok(input.trim().to_string())
    }

    /// Print a table header row
    pub fn table_header(&self, columns: &[&str]) {
        let header: String = columns
            .iter()
            .map(|c| format!("{:<15}", c))
            .collect::<Vec<_>>()
            .join(" ");
        if self.colored {
            eprintln!("    {}", header.bright_white().bold());
            eprintln!("    {}", "─".repeat(columns.len() * 16).dimmed());
        } else {
            eprintln!("    {}", header);
            eprintln!("    {}", "-".repeat(columns.len() * 16));
        }
    }

    /// Print a table row
    pub fn table_row(&self, values: &[&str]) {
        let row: String = values
            .iter()
            .map(|v| format!("{:<15}", v))
            .collect::<Vec<_>>()
            .join(" ");
        eprintln!("    {}", row);
    }

    /// Print newline
    pub fn newline(&self) {
        eprintln!();
    }
}
