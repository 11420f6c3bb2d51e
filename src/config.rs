//! Service configuration: defaults, then `tasklane.toml`, then environment,
//! then command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::realtime::RealtimeMode;

pub const CONFIG_FILE_NAME: &str = "tasklane.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub realtime: RealtimeSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub limits: LimitsSection,
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".tasklane/tasklane.db")
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            db_path: default_db_path(),
            backend: BackendSection::default(),
            realtime: RealtimeSection::default(),
            auth: AuthSection::default(),
            limits: LimitsSection::default(),
        }
    }
}

/// The agent backend that owns workspaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSection {
    #[serde(default = "default_backend_url")]
    pub base_url: String,
    /// Bearer token for server-to-server calls.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_backend_url() -> String {
    "http://localhost:4000".to_string()
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeSection {
    #[serde(default)]
    pub transport: RealtimeMode,
    #[serde(default = "default_presence_interval_secs")]
    pub presence_interval_secs: u64,
    #[serde(default = "default_presence_timeout_secs")]
    pub presence_timeout_secs: u64,
}

fn default_presence_interval_secs() -> u64 {
    30
}

fn default_presence_timeout_secs() -> u64 {
    60
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            transport: RealtimeMode::default(),
            presence_interval_secs: default_presence_interval_secs(),
            presence_timeout_secs: default_presence_timeout_secs(),
        }
    }
}

impl RealtimeSection {
    pub fn presence_interval(&self) -> Duration {
        Duration::from_secs(self.presence_interval_secs.max(1))
    }

    pub fn presence_timeout_ms(&self) -> i64 {
        i64::try_from(self.presence_timeout_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthSection {
    /// Requests without a session act as a local development user.
    #[serde(default)]
    pub bypass: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitsSection {
    /// Cap on a user's tasks that are still initializing or running.
    #[serde(default)]
    pub max_active_tasks: Option<i64>,
}

/// Flag values that override everything else. `None` keeps the lower layer.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub port: Option<u16>,
    pub db_path: Option<PathBuf>,
    pub realtime: Option<RealtimeMode>,
    pub bypass_auth: bool,
}

impl ServiceConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse tasklane.toml")
    }

    /// Load `path` if given, else `tasklane.toml` in `dir` if present, else
    /// defaults.
    pub fn load_or_default(path: Option<&Path>, dir: &Path) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let candidate = dir.join(CONFIG_FILE_NAME);
                if candidate.exists() {
                    Self::load(&candidate)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Full resolution: file, then process environment, then flags.
    pub fn resolve(path: Option<&Path>, overrides: &CliOverrides) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        let mut config = Self::load_or_default(path, &cwd)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_overrides(overrides);
        Ok(config)
    }

    /// Apply `TASKLANE_*` variables read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = lookup("TASKLANE_PORT") {
            self.port = port
                .parse()
                .with_context(|| format!("Invalid TASKLANE_PORT: {port}"))?;
        }
        if let Some(path) = lookup("TASKLANE_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(url) = lookup("TASKLANE_BACKEND_URL") {
            self.backend.base_url = url;
        }
        if let Some(key) = lookup("TASKLANE_API_KEY") {
            self.backend.api_key = Some(key).filter(|k| !k.is_empty());
        }
        if let Some(mode) = lookup("TASKLANE_REALTIME_TRANSPORT") {
            self.realtime.transport = mode.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(bypass) = lookup("TASKLANE_BYPASS_AUTH") {
            self.auth.bypass = bypass == "true" || bypass == "1";
        }
        if let Some(max) = lookup("TASKLANE_MAX_ACTIVE_TASKS") {
            self.limits.max_active_tasks = Some(
                max.parse()
                    .with_context(|| format!("Invalid TASKLANE_MAX_ACTIVE_TASKS: {max}"))?,
            );
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &CliOverrides) {
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(path) = &overrides.db_path {
            self.db_path = path.clone();
        }
        if let Some(mode) = overrides.realtime {
            self.realtime.transport = mode;
        }
        if overrides.bypass_auth {
            self.auth.bypass = true;
        }
    }
}
