//! HTTP server command: `tasklane serve`.

use anyhow::Result;
use tasklane::config::{CliOverrides, ServiceConfig};

pub async fn cmd_serve(config_path: Option<&std::path::Path>, overrides: CliOverrides, dev: bool) -> Result<()> {
    let config = ServiceConfig::resolve(config_path, &overrides)?;
    if config.auth.bypass {
        tracing::warn!("authentication bypass is on; every request acts as the local dev user");
    }
    tasklane::server::start_server(config, dev).await
}
