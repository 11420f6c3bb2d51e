//! Database commands: `tasklane init` and `tasklane session`.

use anyhow::{Context, Result};
use tasklane::config::{CliOverrides, ServiceConfig};
use tasklane::server::open_store;

pub fn cmd_init(config_path: Option<&std::path::Path>, overrides: CliOverrides) -> Result<()> {
    let config = ServiceConfig::resolve(config_path, &overrides)?;
    open_store(&config)?;
    println!("Database initialized at {}", config.db_path.display());
    Ok(())
}

/// Create (or reuse) a user and print a fresh session token for it.
pub fn cmd_session(
    config_path: Option<&std::path::Path>,
    overrides: CliOverrides,
    email: &str,
    name: Option<&str>,
    days: i64,
) -> Result<()> {
    if days <= 0 {
        anyhow::bail!("--days must be positive");
    }
    let config = ServiceConfig::resolve(config_path, &overrides)?;
    let store = open_store(&config)?;
    let name = name.unwrap_or_else(|| email.split('@').next().unwrap_or(email));
    let user = store
        .upsert_user(name, email, None)
        .context("Failed to create user")?;
    let session = store
        .create_session(user.id, chrono::Duration::days(days))
        .context("Failed to create session")?;
    println!("{}", session.token);
    Ok(())
}
