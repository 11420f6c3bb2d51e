//! Configuration view command: `tasklane config`.

use anyhow::{Context, Result};
use tasklane::config::{CliOverrides, ServiceConfig};

/// Print the fully resolved configuration as TOML, with the API key hidden.
pub fn cmd_config(config_path: Option<&std::path::Path>, overrides: CliOverrides) -> Result<()> {
    let mut config = ServiceConfig::resolve(config_path, &overrides)?;
    if config.backend.api_key.is_some() {
        config.backend.api_key = Some("[REDACTED]".to_string());
    }
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    print!("{rendered}");
    Ok(())
}
