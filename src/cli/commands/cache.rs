//! CLI command for `phasebuild cache`

use anyhow::{Context, Result};

use crate::cli::output::OutputConfig;
use crate::infra::dirs::PhasebuildDirs;
use crate::infra::filesystem::format_size;
use crate::registry::PackageCache;

/// Execute cache info subcommand
pub fn execute_info(dirs: &PhasebuildDirs, output: OutputConfig) -> Result<()> {
    let info = PackageCache::new(dirs.package_cache_dir()).info();

    println!("Location: {}", info.path.display());
    println!("Size: {}", info.format_size());
    println!("Packages: {}", info.entry_count);

    if !info.exists {
        output.warning("Cache directory does not exist (empty cache)");
    }
    Ok(())
}

/// Execute cache clean subcommand
pub async fn execute_clean(dirs: &PhasebuildDirs, output: OutputConfig) -> Result<()> {
    let cache = PackageCache::new(dirs.package_cache_dir());
    let freed = cache.clean().await.context("Failed to clean cache")?;
    if freed > 0 {
        output.success(&format!("Cache cleared ({} freed)", format_size(freed)));
    } else {
        output.success("Cache was already empty");
    }
    Ok(())
}
