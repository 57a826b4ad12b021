// Process configuration, loaded once at startup and passed into the
// components that need it (no module-level globals, so tests can construct
// their own Config pointing at a mock server).

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Logical name of the single assistant this deployment talks to.
pub const DEFAULT_ASSISTANT: &str = "Sonoma";

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct Config {
    /// API credential for the remote assistant service.
    pub api_key: String,
    /// Base URL of the assistant service, without a trailing slash.
    pub api_base: String,
    /// Mapping from logical assistant name to the remote assistant id.
    pub assistants: HashMap<String, String>,
    /// Fixed wait between run status checks.
    pub poll_interval: Duration,
    /// Upper bound on the total time spent waiting for a run to finish.
    pub poll_timeout: Duration,
}

impl Config {
    /// Build the configuration from environment variables (a `.env` file is
    /// loaded by `main` before this runs).
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("SONOMA_API_KEY")
            .context("SONOMA_API_KEY must be set to the assistant service API key")?;
        let assistant_id = env::var("SONOMA_ASSISTANT_ID")
            .context("SONOMA_ASSISTANT_ID must be set to the remote assistant id")?;

        let api_base = env::var("SONOMA_API_BASE")
            .unwrap_or_else(|_| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        let poll_interval_ms = parse_env_var("SONOMA_POLL_INTERVAL_MS", 1000u64)?;
        let poll_timeout_secs = parse_env_var("SONOMA_POLL_TIMEOUT_SECS", 120u64)?;

        let mut assistants = HashMap::new();
        assistants.insert(DEFAULT_ASSISTANT.to_string(), assistant_id);

        Ok(Self {
            api_key,
            api_base,
            assistants,
            poll_interval: Duration::from_millis(poll_interval_ms),
            poll_timeout: Duration::from_secs(poll_timeout_secs),
        })
    }
}

fn parse_env_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value: {}", name, value)),
        Err(_) => Ok(default),
    }
}
