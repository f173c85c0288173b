//! `phasebuild publish`
//!
//! Runs every phase through INSTALL, then pushes the packaged variant to a
//! remote repository using the credentials from the settings file.

use std::path::Path;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::cli::commands::build::Session;
use crate::cli::output::{describe_publish, OutputConfig};
use crate::core::options::CommandOptions;
use crate::core::plugin_registry::PluginLoader;

pub async fn execute(
    project_dir: &Path,
    options: CommandOptions,
    server: Option<String>,
    output: OutputConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let session = Session::open(project_dir, options, &PluginLoader::new(), &cancel)?;
    session.run(output, cancel).await?;

    let destination = match &server {
        Some(url) => url.clone(),
        None => session
            .packages
            .remote_servers()
            .first()
            .map(|s| s.url().to_string())
            .context("No server configured; add one to the settings file or pass --server")?,
    };

    let spinner = output.spinner(&format!("Publishing to {destination}"));
    let result = session
        .packages
        .publish(&session.project, server.as_deref(), None)
        .await;
    spinner.finish_and_clear();

    let (artifact, outcome) = result.with_context(|| format!("Failed to publish to {destination}"))?;
    output.success(&format!(
        "{} {} to {destination}",
        artifact.variant,
        describe_publish(&outcome)
    ));
    Ok(())
}
