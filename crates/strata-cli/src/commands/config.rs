//! Configuration display.

use std::path::PathBuf;

use anyhow::Result;
use strata_config::{ConfigLayer, StrataConfig};

/// Show the effective configuration, preceded by the files it was read from.
pub fn show(config: &StrataConfig, files: &[(ConfigLayer, PathBuf)]) -> Result<()> {
    for (layer, path) in files {
        println!("# {layer:?}: {}", path.display());
    }
    print!("{}", config.to_toml()?);
    Ok(())
}
