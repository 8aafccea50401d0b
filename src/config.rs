//! Runtime configuration.
//!
//! A [`Config`] is built once at the edge of the program and threaded through
//! constructors. Nothing below this module reads the environment.

use std::path::PathBuf;
use std::time::Duration;

/// Default model used for the reasoning service.
pub const DEFAULT_MODEL: &str = "claude-haiku-4-5";

/// Default request timeout for reasoning and vendor HTTP calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings shared by the resolution engine and its collaborators.
#[derive(Debug, Clone)]
pub struct Config {
    /// Reasoning service credential. `None` selects the heuristic fallbacks.
    pub api_key: Option<String>,
    /// Model name passed to the reasoning service.
    pub model: String,
    /// Directory holding one JSON file per memoized call.
    pub cache_dir: PathBuf,
    /// Timeout applied to every outbound HTTP request.
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            cache_dir: default_cache_dir(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl Config {
    /// Build a config from environment variables.
    ///
    /// - `ANTHROPIC_API_KEY`: reasoning service credential (optional)
    /// - `PARTFINDER_MODEL`: model override
    /// - `PARTFINDER_CACHE_DIR`: cache directory override
    ///
    /// An empty credential is treated as absent.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.api_key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());

        if let Ok(model) = std::env::var("PARTFINDER_MODEL") {
            config.model = model;
        }
        if let Ok(dir) = std::env::var("PARTFINDER_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }

        config
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether a reasoning service credential is configured.
    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Platform cache directory, falling back to the working directory.
fn default_cache_dir() -> PathBuf {
    let base = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("partfinder").join("llm_cache")
}
