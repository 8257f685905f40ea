//! I/O capability probing.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use strata_config::StrataConfig;
use strata_io::{IoCapabilities, IoMode, StorageDir, probe_or_conservative};

#[derive(Serialize)]
struct Report<'a> {
    dir: &'a std::path::Path,
    #[serde(flatten)]
    capabilities: IoCapabilities,
    #[serde(flatten)]
    mode: IoMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostic: Option<String>,
}

/// Probe `dir` (or the configured data directory) and select an I/O mode.
pub fn run(config: &StrataConfig, dir: Option<PathBuf>, json: bool) -> Result<()> {
    let path = dir.unwrap_or_else(|| config.storage.data_dir.clone());
    let dir = StorageDir::ensure(&path)
        .with_context(|| format!("Failed to prepare {}", path.display()))?;

    let outcome = probe_or_conservative(&dir);
    let mode = IoMode::select(outcome.capabilities, config.storage.io_mode)
        .with_context(|| format!("io_mode = \"{}\"", config.storage.io_mode))?;

    let report = Report {
        dir: dir.path(),
        capabilities: outcome.capabilities,
        mode,
        diagnostic: outcome.diagnostic,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Directory:   {}", report.dir.display());
    match report.capabilities.direct_io_block_size {
        0 => println!("Direct I/O:  unsupported"),
        size => println!("Direct I/O:  {size}-byte blocks"),
    }
    println!(
        "Async I/O:   {}",
        if report.capabilities.async_io_supported {
            "supported"
        } else {
            "unsupported"
        }
    );
    println!("Mode:        {}", report.mode);
    if let Some(diagnostic) = &report.diagnostic {
        println!("Note:        {diagnostic}");
    }
    Ok(())
}
