//! kiln cache

use super::load_config;
use crate::GlobalArgs;
use anyhow::{Context, Result};
use kiln_build::ArtifactCache;

pub fn stats(global: &GlobalArgs) -> Result<()> {
    let config = load_config(global)?;
    let cache = ArtifactCache::from_config(&config)
        .with_context(|| format!("Failed to open cache at {}", config.cache_dir.display()))?;
    let stats = cache.stats()?;

    println!("Cache:   {}", cache.root().display());
    println!("Entries: {}", stats.entries);
    println!("Size:    {}", human_size(stats.total_size));
    if let Some(limit) = config.cache_size_limit {
        println!("Limit:   {}", human_size(limit));
    }
    Ok(())
}

pub fn clear(global: &GlobalArgs) -> Result<()> {
    let config = load_config(global)?;
    let cache = ArtifactCache::from_config(&config)
        .with_context(|| format!("Failed to open cache at {}", config.cache_dir.display()))?;
    let before = cache.stats()?;
    cache.clear()?;
    println!("Removed {} cached artifact(s)", before.entries);
    Ok(())
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
