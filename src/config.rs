use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use terminaut_core::HistoryLimit;
use terminaut_core::history::{DEFAULT_HISTORY_LIMIT, MIN_HISTORY_LIMIT};

pub const APP_NAME: &str = "terminaut";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MAX_TOKENS: u32 = 2000;
pub const DEFAULT_BASH_TIMEOUT_SECS: u64 = 10;

/// Persisted user settings. Every field is optional; unset values fall back
/// to the environment and then to built-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct UserConfig {
    /// OpenAI API key, used when OPENAI_API_KEY is not set
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Chat completions base URL (e.g. http://localhost:11434/v1)
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub history_limit: Option<usize>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub bash_timeout_secs: Option<u64>,
}

pub fn load_config() -> Result<UserConfig> {
    let cfg: UserConfig = confy::load(APP_NAME, None).context("failed to load config")?;
    Ok(cfg)
}

pub fn save_config(cfg: &UserConfig) -> Result<()> {
    confy::store(APP_NAME, None, cfg).context("failed to save config")?;
    Ok(())
}

pub fn config_path() -> Result<PathBuf> {
    confy::get_configuration_file_path(APP_NAME, None).context("failed to locate config file")
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub history_limit: Option<usize>,
}

/// Effective settings for one session.
#[derive(Debug, Clone)]
pub struct Settings {
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub history_limit: HistoryLimit,
    pub max_tokens: u32,
    pub bash_timeout: Duration,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Command line first, then the environment, then the stored config.
pub fn resolve(overrides: Overrides, cfg: &UserConfig, env: &dyn Fn(&str) -> Option<String>) -> Settings {
    let model = non_empty(overrides.model)
        .or_else(|| non_empty(env("OPENAI_MODEL")))
        .or_else(|| non_empty(cfg.model.clone()))
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let base_url = non_empty(overrides.base_url)
        .or_else(|| non_empty(env("OPENAI_BASE_URL")))
        .or_else(|| non_empty(cfg.base_url.clone()))
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let api_key = non_empty(env("OPENAI_API_KEY")).or_else(|| non_empty(cfg.openai_api_key.clone()));

    let env_limit = env("HISTORY_LIMIT").and_then(|raw| match raw.trim().parse::<usize>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(value = %raw, "ignoring HISTORY_LIMIT that is not a number");
            None
        }
    });
    let requested = overrides
        .history_limit
        .or(env_limit)
        .or(cfg.history_limit)
        .unwrap_or(DEFAULT_HISTORY_LIMIT);
    if requested < MIN_HISTORY_LIMIT {
        tracing::warn!(requested, min = MIN_HISTORY_LIMIT, "history limit raised to the minimum");
    }

    Settings {
        model,
        base_url: base_url.trim_end_matches('/').to_string(),
        api_key,
        history_limit: HistoryLimit::clamped(requested),
        max_tokens: cfg.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        bash_timeout: Duration::from_secs(cfg.bash_timeout_secs.unwrap_or(DEFAULT_BASH_TIMEOUT_SECS)),
    }
}

/// Resolve against the real process environment.
pub fn resolve_from_env(overrides: Overrides, cfg: &UserConfig) -> Settings {
    resolve(overrides, cfg, &|key| std::env::var(key).ok())
}
