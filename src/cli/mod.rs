//! Command-line interface module
//!
//! This module handles argument parsing and output formatting.
//! It contains no business logic - that belongs in the [`crate::core`] module.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser};
use tokio_util::sync::CancellationToken;

use crate::core::options::{CommandOptions, Task};
use commands::Commands;
use output::OutputConfig;

/// Phasebuild - native-project build orchestrator
///
/// Runs build phases with plugins and manages binary packages.
#[derive(Parser, Debug)]
#[command(name = "phasebuild")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(flatten)]
    pub build: BuildArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Flags shared by every phase-running command
#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
    /// Select the first target with this architecture
    #[arg(long, global = true)]
    pub arch: Option<String>,

    /// Select the first target with this platform
    #[arg(long, global = true)]
    pub platform: Option<String>,

    /// Select a target by name
    #[arg(long, global = true)]
    pub target: Option<String>,

    /// Enter TEST with its built-in action suppressed
    #[arg(long, global = true)]
    pub no_tests: bool,

    /// Start with CLEAN and clear the package cache
    #[arg(long, global = true)]
    pub all: bool,

    /// Settings file to use instead of the one in the config directory
    #[arg(long, global = true, value_name = "PATH")]
    pub settings_file: Option<PathBuf>,

    /// Project directory (defaults to the current directory)
    #[arg(short = 'C', long, global = true, value_name = "DIR")]
    pub project_dir: Option<PathBuf>,
}

impl BuildArgs {
    /// Command options for `task` with these flags applied
    pub fn command_options(&self, task: Task) -> CommandOptions {
        CommandOptions {
            arch: self.arch.clone(),
            platform: self.platform.clone(),
            target: self.target.clone(),
            no_tests: self.no_tests,
            all: self.all,
            settings_file: self.settings_file.clone(),
            ..CommandOptions::for_task(task)
        }
    }

    pub fn project_dir(&self) -> Result<PathBuf> {
        match &self.project_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }
}

impl Cli {
    /// Tracing filter directive for the requested verbosity
    pub fn log_directive(&self) -> String {
        let level = match (self.quiet, self.verbose) {
            (true, _) => "error",
            (false, 0) => "warn",
            (false, 1) => "info",
            (false, _) => "debug",
        };
        format!("warn,phasebuild={level}")
    }

    /// Execute the CLI command
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let output = OutputConfig::new(self.quiet);
        if let Some(cmd) = self.command {
            cmd.run(&self.build, output, cancel).await
        } else {
            // No subcommand provided, show help
            use clap::CommandFactory;
            let mut cmd = Self::command();
            cmd.print_help()?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::phase::Phase;

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "phasebuild",
            "package",
            "--no-tests",
            "--target",
            "linux-x64",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_directive(), "warn,phasebuild=debug");

        let options = cli.build.command_options(Task::Package);
        assert!(options.package && options.no_tests);
        assert_eq!(options.target.as_deref(), Some("linux-x64"));
    }

    #[test]
    fn test_all_prepends_clean() {
        let cli = Cli::try_parse_from(["phasebuild", "--all", "build"]).unwrap();
        let range = cli.build.command_options(Task::Build).phase_range().unwrap();
        assert_eq!(range.first(), Phase::Clean);
        assert_eq!(range.last(), Phase::Link);
    }

    #[test]
    fn test_publish_server_flag() {
        let cli = Cli::try_parse_from(["phasebuild", "publish", "--server", "https://repo.example"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Publish { server: Some(ref s) }) if s == "https://repo.example"
        ));
    }
}
