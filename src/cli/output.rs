//! Output formatting and progress indicators
//!
//! Spinners and status lines for the terminal. Nothing here is used by the
//! library layers; they log through `tracing` instead.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::core::builder::{ActionOutcome, BuildReport};
use crate::infra::filesystem::format_size;
use crate::registry::client::PublishOutcome;

/// Status message prefixes
pub mod status {
    /// Success prefix (green checkmark)
    pub const SUCCESS: &str = "✓";

    /// Error prefix (red X)
    pub const ERROR: &str = "✗";

    /// Warning prefix (yellow triangle)
    pub const WARNING: &str = "⚠";

    /// Info prefix (blue circle)
    pub const INFO: &str = "ℹ";
}

/// How much the CLI prints
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    pub quiet: bool,
}

impl OutputConfig {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    /// Spinner for an operation of unknown duration; hidden when quiet
    pub fn spinner(&self, message: &str) -> ProgressBar {
        if self.quiet {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                .template("{spinner:.blue} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            println!("{} {message}", status::SUCCESS);
        }
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            println!("{} {message}", status::INFO);
        }
    }

    pub fn warning(&self, message: &str) {
        if !self.quiet {
            println!("{} {message}", status::WARNING);
        }
    }

    /// Per-phase summary of a finished run
    pub fn report(&self, report: &BuildReport) {
        if self.quiet {
            return;
        }
        for phase in &report.completed {
            let detail = if report.was_suppressed(*phase) {
                Some("default action suppressed".to_string())
            } else {
                report.outcome(*phase).and_then(describe)
            };
            match detail {
                Some(detail) => println!("{} {phase} ({detail})", status::SUCCESS),
                None => println!("{} {phase}", status::SUCCESS),
            }
        }
        if !report.resolution.is_empty() {
            println!("{} {} dependencies resolved", status::INFO, report.resolution.len());
        }
    }
}

fn describe(outcome: &ActionOutcome) -> Option<String> {
    match outcome {
        ActionOutcome::Done => None,
        ActionOutcome::Cleaned { cache_bytes: None } => None,
        ActionOutcome::Cleaned {
            cache_bytes: Some(bytes),
        } => Some(format!("package cache cleared, {} freed", format_size(*bytes))),
        ActionOutcome::Packaged { file_name, .. } => Some(file_name.clone()),
        ActionOutcome::Installed { variant, outcome, .. } => {
            Some(format!("{variant} {}", describe_publish(outcome)))
        }
    }
}

/// Human wording for a publish result
pub fn describe_publish(outcome: &PublishOutcome) -> &'static str {
    match outcome {
        PublishOutcome::Published => "published",
        PublishOutcome::AlreadyPublished => "already published",
        PublishOutcome::Overwritten { .. } => "replaced",
    }
}

/// Print an error and its causes to stderr
pub fn display_error(error: &anyhow::Error) {
    eprintln!("{} {error}", status::ERROR);
    for cause in error.chain().skip(1) {
        eprintln!("  caused by: {cause}");
    }
}
