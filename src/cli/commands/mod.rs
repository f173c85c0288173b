//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod build;
pub mod cache;
pub mod publish;

use anyhow::Result;
use clap::Subcommand;
use tokio_util::sync::CancellationToken;

use crate::cli::output::OutputConfig;
use crate::cli::BuildArgs;
use crate::core::options::Task;
use crate::infra::dirs::PhasebuildDirs;

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Remove build outputs (CLEAN)
    Clean,

    /// Resolve dependencies, compile and link
    Build,

    /// Build, then run TEST
    Test,

    /// Build, test and bundle the project into a package
    Package,

    /// Package and install into the local repository
    Install,

    /// Install, then publish to a remote repository
    Publish {
        /// Server URL (defaults to the first configured server)
        #[arg(long)]
        server: Option<String>,
    },

    /// Manage the package cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show cache information
    Info,

    /// Clear cache
    Clean,
}

impl Commands {
    /// Execute the command
    pub async fn run(self, args: &BuildArgs, output: OutputConfig, cancel: CancellationToken) -> Result<()> {
        let task = match self {
            Self::Clean => Task::Clean,
            Self::Build => Task::Build,
            Self::Test => Task::Test,
            Self::Package => Task::Package,
            Self::Install => Task::Install,
            Self::Publish { server } => {
                let project_dir = args.project_dir()?;
                let options = args.command_options(Task::Publish);
                return publish::execute(&project_dir, options, server, output, cancel).await;
            }
            Self::Cache { command } => {
                let dirs = PhasebuildDirs::new();
                return match command {
                    CacheCommands::Info => cache::execute_info(&dirs, output),
                    CacheCommands::Clean => cache::execute_clean(&dirs, output).await,
                };
            }
        };

        let project_dir = args.project_dir()?;
        build::execute(&project_dir, args.command_options(task), output, cancel).await?;
        Ok(())
    }
}
