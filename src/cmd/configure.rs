use anyhow::Result;
use clap::Args;
use terminaut_core::history::MIN_HISTORY_LIMIT;

use crate::config::{
    DEFAULT_BASE_URL, DEFAULT_BASH_TIMEOUT_SECS, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, UserConfig, config_path,
    load_config, save_config,
};
use crate::util::{color_enabled_stdout, mask_secret, sym_check, sym_cross};

#[derive(Args, Debug, Default)]
pub struct ConfigCmd {
    /// Show the stored configuration
    #[arg(long)]
    pub show: bool,
    /// Default model
    #[arg(long, value_name = "MODEL")]
    pub set_model: Option<String>,
    /// Default chat completions base URL
    #[arg(long, value_name = "URL")]
    pub set_base_url: Option<String>,
    /// Default history limit (at least 3)
    #[arg(long, value_name = "N")]
    pub set_history_limit: Option<usize>,
    /// Default max_tokens per response
    #[arg(long, value_name = "N")]
    pub set_max_tokens: Option<u32>,
    /// Seconds before a bash command is killed
    #[arg(long, value_name = "SECS")]
    pub set_bash_timeout: Option<u64>,
    /// Store an OpenAI API key, used when OPENAI_API_KEY is not set
    #[arg(long, value_name = "KEY")]
    pub set_api_key: Option<String>,
    /// Remove the stored OpenAI API key
    #[arg(long)]
    pub unset_api_key: bool,
}

/// Apply the `--set-*` flags to `cfg`. Returns whether anything changed.
pub fn apply_changes(cfg: &mut UserConfig, cmd: &ConfigCmd) -> Result<bool> {
    let mut changed = false;
    if let Some(model) = cmd.set_model.as_deref() {
        if model.trim().is_empty() {
            anyhow::bail!("model cannot be empty");
        }
        cfg.model = Some(model.trim().to_string());
        changed = true;
    }
    if let Some(url) = cmd.set_base_url.as_deref() {
        let url = url.trim().trim_end_matches('/');
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("invalid base URL '{url}': expected http:// or https://");
        }
        cfg.base_url = Some(url.to_string());
        changed = true;
    }
    if let Some(limit) = cmd.set_history_limit {
        if limit < MIN_HISTORY_LIMIT {
            anyhow::bail!("history limit must be at least {MIN_HISTORY_LIMIT}, got {limit}");
        }
        cfg.history_limit = Some(limit);
        changed = true;
    }
    if let Some(tokens) = cmd.set_max_tokens {
        if tokens == 0 {
            anyhow::bail!("max tokens must be positive");
        }
        cfg.max_tokens = Some(tokens);
        changed = true;
    }
    if let Some(secs) = cmd.set_bash_timeout {
        if secs == 0 {
            anyhow::bail!("bash timeout must be positive");
        }
        cfg.bash_timeout_secs = Some(secs);
        changed = true;
    }
    if let Some(key) = cmd.set_api_key.as_deref() {
        if key.trim().is_empty() {
            anyhow::bail!("OpenAI API key cannot be empty");
        }
        cfg.openai_api_key = Some(key.trim().to_string());
        changed = true;
    }
    if cmd.unset_api_key && cfg.openai_api_key.take().is_some() {
        changed = true;
    }
    Ok(changed)
}

pub fn describe(cfg: &UserConfig) -> Vec<String> {
    let or_default = |value: Option<String>, default: String| value.unwrap_or_else(|| format!("{default} (default)"));
    vec![
        format!("model: {}", or_default(cfg.model.clone(), DEFAULT_MODEL.to_string())),
        format!("base_url: {}", or_default(cfg.base_url.clone(), DEFAULT_BASE_URL.to_string())),
        format!(
            "history_limit: {}",
            or_default(cfg.history_limit.map(|n| n.to_string()), terminaut_core::history::DEFAULT_HISTORY_LIMIT.to_string())
        ),
        format!("max_tokens: {}", or_default(cfg.max_tokens.map(|n| n.to_string()), DEFAULT_MAX_TOKENS.to_string())),
        format!(
            "bash_timeout_secs: {}",
            or_default(cfg.bash_timeout_secs.map(|n| n.to_string()), DEFAULT_BASH_TIMEOUT_SECS.to_string())
        ),
        format!(
            "openai_api_key: {}",
            cfg.openai_api_key.as_deref().map_or_else(|| "(unset)".to_string(), mask_secret)
        ),
    ]
}

pub fn handle_config(cmd: ConfigCmd) -> Result<()> {
    let ce = color_enabled_stdout();
    let mut cfg = load_config()?;
    let changed = apply_changes(&mut cfg, &cmd)?;
    if changed {
        save_config(&cfg)?;
        println!("{} Configuration saved to {}", sym_check(ce), config_path()?.display());
    }
    if cmd.show || !changed {
        println!("Config file: {}", config_path()?.display());
        for line in describe(&cfg) {
            println!("  {line}");
        }
        let env_key = std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.trim().is_empty());
        if env_key {
            println!("{} OPENAI_API_KEY is set in the environment and takes precedence.", sym_check(ce));
        } else if cfg.openai_api_key.is_none() {
            println!("{} No OpenAI API key found. Set OPENAI_API_KEY or run: terminaut config --set-api-key <KEY>", sym_cross(ce));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sets_values_and_reports_change() {
        let mut cfg = UserConfig::default();
        let cmd = ConfigCmd {
            set_model: Some(" gpt-4o-mini ".into()),
            set_base_url: Some("http://localhost:11434/v1/".into()),
            set_history_limit: Some(12),
            set_api_key: Some("sk-test-123456".into()),
            ..ConfigCmd::default()
        };
        assert!(apply_changes(&mut cfg, &cmd).expect("apply"));
        assert_eq!(cfg.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(cfg.base_url.as_deref(), Some("http://localhost:11434/v1"));
        assert_eq!(cfg.history_limit, Some(12));
        assert!(!apply_changes(&mut cfg, &ConfigCmd::default()).expect("noop"));

        let unset = ConfigCmd {
            unset_api_key: true,
            ..ConfigCmd::default()
        };
        assert!(apply_changes(&mut cfg, &unset).expect("unset"));
        assert_eq!(cfg.openai_api_key, None);
    }

    #[test]
    fn rejects_invalid_values() {
        let mut cfg = UserConfig::default();
        for cmd in [
            ConfigCmd {
                set_history_limit: Some(2),
                ..ConfigCmd::default()
            },
            ConfigCmd {
                set_base_url: Some("localhost:11434".into()),
                ..ConfigCmd::default()
            },
            ConfigCmd {
                set_bash_timeout: Some(0),
                ..ConfigCmd::default()
            },
        ] {
            assert!(apply_changes(&mut cfg, &cmd).is_err());
        }
        assert_eq!(cfg, UserConfig::default());
    }

    #[test]
    fn describes_defaults_and_masks_key() {
        let cfg = UserConfig {
            openai_api_key: Some("sk-abcdef123".into()),
            ..UserConfig::default()
        };
        let lines = describe(&cfg);
        assert_eq!(lines[0], "model: gpt-4o (default)");
        assert_eq!(lines[2], "history_limit: 20 (default)");
        assert_eq!(lines[5], "openai_api_key: sk-abc…");
    }
}
