use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default config file, looked up in the working directory.
pub const CONFIG_PATH: &str = "boardroom.toml";

/// Environment variable that overrides `api_base` from the file.
pub const API_BASE_ENV: &str = "BOARDROOM_API_BASE";

/// Client configuration from `boardroom.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the council backend.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Timeout for non-streaming requests. Unset means no timeout.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

fn default_api_base() -> String {
    "http://localhost:8001".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            request_timeout_secs: None,
        }
    }
}

impl Config {
    /// Apply overrides: environment first, then an explicit value (e.g. a CLI flag).
    pub fn with_overrides(mut self, env_api_base: Option<String>, api_base: Option<String>) -> Self {
        if let Some(base) = env_api_base.filter(|b| !b.is_empty()) {
            self.api_base = base;
        }
        if let Some(base) = api_base {
            self.api_base = base;
        }
        self
    }
}

/// Load configuration from `path`.
///
/// Falls back to defaults if the file is missing.
pub fn load(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}
