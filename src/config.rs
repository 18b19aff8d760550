use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::state::Settings;

const DEFAULT_ENV_PREFIX: &str = "REDCLI";
const DEFAULT_SUBREDDITS: [&str; 5] = ["commandline", "linux", "python", "devops", "selfhosted"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub reddit: RedditConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub ui: UIConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedditConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            username: String::new(),
            password: String::new(),
            user_agent: default_user_agent(),
        }
    }
}

impl RedditConfig {
    /// Names of the credential fields that are still empty.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        [
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("username", &self.username),
            ("password", &self.password),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

fn default_user_agent() -> String {
    format!("redcli/{} (terminal reader)", crate::VERSION)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettingsConfig {
    #[serde(default = "default_subreddits")]
    pub subreddits: Vec<String>,
    #[serde(default = "default_post_limit")]
    pub post_limit: u32,
    #[serde(default = "default_comment_limit")]
    pub comment_limit: u32,
    #[serde(default = "default_expand_batch")]
    pub expand_batch: usize,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            subreddits: default_subreddits(),
            post_limit: default_post_limit(),
            comment_limit: default_comment_limit(),
            expand_batch: default_expand_batch(),
        }
    }
}

fn default_subreddits() -> Vec<String> {
    DEFAULT_SUBREDDITS.iter().map(|s| s.to_string()).collect()
}

fn default_post_limit() -> u32 {
    30
}

fn default_comment_limit() -> u32 {
    50
}

fn default_expand_batch() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    #[serde(default = "default_status_timeout", with = "humantime_serde")]
    pub status_timeout: Duration,
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            status_timeout: default_status_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_status_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub filter: Option<String>,
}

impl Config {
    /// The subset handed to the browsing engine.
    pub fn engine_settings(&self) -> Settings {
        Settings {
            subreddits: normalize_subreddits(&self.settings.subreddits),
            post_limit: self.settings.post_limit.max(1),
            comment_limit: self.settings.comment_limit.max(1),
            expand_batch: self.settings.expand_batch.max(1),
            status_timeout: self.ui.status_timeout,
        }
    }
}

/// Trims names, strips a leading `r/` or `/r/` and drops empties. An empty
/// result falls back to the default list.
pub fn normalize_subreddits(names: &[String]) -> Vec<String> {
    let normalized: Vec<String> = names
        .iter()
        .map(|name| normalize_subreddit(name))
        .filter(|name| !name.is_empty())
        .collect();
    if normalized.is_empty() {
        default_subreddits()
    } else {
        normalized
    }
}

pub fn normalize_subreddit(name: &str) -> String {
    let trimmed = name.trim();
    let stripped = trimmed
        .strip_prefix("/r/")
        .or_else(|| trimmed.strip_prefix("r/"))
        .unwrap_or(trimmed);
    stripped.trim_matches('/').trim().to_string()
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let path = options.config_file.clone().or_else(default_config_path);
    let mut cfg = match path {
        Some(path) if path.exists() => read_config_file(&path)?,
        _ => Config::default(),
    };

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    for (key, value) in load_env(prefix) {
        apply_env_value(&mut cfg, &key, value);
    }

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    if data.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn load_env(prefix: &str) -> HashMap<String, String> {
    let upper_prefix = format!("{}_", prefix.to_uppercase());
    env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(&upper_prefix)
                .map(|stripped| (stripped.to_ascii_lowercase().replace("__", "."), value))
        })
        .collect()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "reddit.client_id" => cfg.reddit.client_id = value,
        "reddit.client_secret" => cfg.reddit.client_secret = value,
        "reddit.username" => cfg.reddit.username = value,
        "reddit.password" => cfg.reddit.password = value,
        "reddit.user_agent" => cfg.reddit.user_agent = value,
        "settings.subreddits" => cfg.settings.subreddits = split_list(&value),
        "settings.post_limit" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.settings.post_limit = parsed;
            }
        }
        "settings.comment_limit" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.settings.comment_limit = parsed;
            }
        }
        "settings.expand_batch" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.settings.expand_batch = parsed;
            }
        }
        "ui.status_timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.ui.status_timeout = duration;
            }
        }
        "ui.poll_interval" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.ui.poll_interval = duration;
            }
        }
        "logging.file" => cfg.logging.file = Some(PathBuf::from(value)),
        "logging.filter" => cfg.logging.filter = Some(value),
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("redcli").join("config.yaml"))
}

const DEFAULT_TEMPLATE_HEADER: &str = "\
# redcli configuration.
#
# Create a \"script\" application at https://www.reddit.com/prefs/apps and
# fill in its id and secret together with your account credentials.
# Every value can also be set from the environment, e.g.
# REDCLI_REDDIT__PASSWORD or REDCLI_SETTINGS__SUBREDDITS=rust,linux.
";

/// Writes a commented default configuration to `path`, creating parent
/// directories. Fails if the file already exists.
pub fn write_default(path: &Path) -> Result<()> {
    anyhow::ensure!(
        !path.exists(),
        "config: {} already exists",
        path.display()
    );
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("config: failed to create directory {}", parent.display()))?;
    }
    let body =
        serde_yaml::to_string(&Config::default()).context("config: failed to serialize config")?;
    fs::write(path, format!("{DEFAULT_TEMPLATE_HEADER}\n{body}"))
        .with_context(|| format!("config: failed to write file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn options(path: PathBuf, prefix: &str) -> LoadOptions {
        LoadOptions {
            config_file: Some(path),
            env_prefix: Some(prefix.to_string()),
        }
    }

    #[test]
    fn load_defaults_without_files() {
        let dir = tempdir().unwrap();
        let cfg = load(options(dir.path().join("missing.yaml"), "REDCLI_TEST_NONE")).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.settings.post_limit, 30);
        assert_eq!(cfg.ui.status_timeout, Duration::from_secs(2));
        assert!(cfg.reddit.user_agent.starts_with("redcli/"));
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "settings:\n  subreddits: [\"r/rust\", \" /r/linux/ \", \"\"]\n  post_limit: 10\nui:\n  status_timeout: 5s\n",
        )
        .unwrap();
        let cfg = load(options(path, "REDCLI_TEST_FILE")).unwrap();
        assert_eq!(cfg.settings.post_limit, 10);
        assert_eq!(cfg.settings.comment_limit, 50);
        assert_eq!(cfg.ui.status_timeout, Duration::from_secs(5));

        let settings = cfg.engine_settings();
        assert_eq!(settings.subreddits, vec!["rust", "linux"]);
        assert_eq!(settings.status_timeout, Duration::from_secs(5));
    }

    #[test]
    fn env_overrides() {
        let dir = tempdir().unwrap();
        env::set_var("REDCLI_TEST_ENV_SETTINGS__SUBREDDITS", "rust, r/golang");
        env::set_var("REDCLI_TEST_ENV_REDDIT__USERNAME", "alice");
        env::set_var("REDCLI_TEST_ENV_UI__POLL_INTERVAL", "250ms");
        let cfg = load(options(dir.path().join("none.yaml"), "REDCLI_TEST_ENV")).unwrap();
        env::remove_var("REDCLI_TEST_ENV_SETTINGS__SUBREDDITS");
        env::remove_var("REDCLI_TEST_ENV_REDDIT__USERNAME");
        env::remove_var("REDCLI_TEST_ENV_UI__POLL_INTERVAL");

        assert_eq!(cfg.reddit.username, "alice");
        assert_eq!(cfg.ui.poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.engine_settings().subreddits, vec!["rust", "golang"]);
    }

    #[test]
    fn empty_subreddit_list_falls_back() {
        assert_eq!(normalize_subreddits(&[" ".into()]), default_subreddits());
        assert_eq!(normalize_subreddit("/r/selfhosted"), "selfhosted");
    }

    #[test]
    fn write_default_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        write_default(&path).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("# redcli configuration."));
        assert_eq!(read_config_file(&path).unwrap(), Config::default());
        assert!(write_default(&path).is_err());
    }

    #[test]
    fn missing_credentials_are_listed() {
        let mut reddit = RedditConfig::default();
        reddit.client_id = "id".into();
        reddit.password = "pw".into();
        assert_eq!(reddit.missing_credentials(), vec!["client_secret", "username"]);
    }
}
