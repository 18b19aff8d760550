//! File logging. The terminal belongs to the UI, so records go to a file.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

pub const FILTER_ENV: &str = "REDCLI_LOG";
const DEFAULT_FILTER: &str = "info";

pub fn default_log_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("redcli").join("redcli.log"))
}

/// `REDCLI_LOG` wins over the configured filter, which wins over `info`.
pub fn filter_directive(cfg: &LoggingConfig) -> String {
    std::env::var(FILTER_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or_else(|| cfg.filter.clone())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Installs the global subscriber and returns the log path.
pub fn init(cfg: &LoggingConfig) -> Result<PathBuf> {
    let path = cfg
        .file
        .clone()
        .or_else(default_log_path)
        .context("logging: unable to determine log path")?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("logging: failed to create {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("logging: failed to open {}", path.display()))?;

    let filter = EnvFilter::try_new(filter_directive(cfg))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!("logging: {err}"))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_filter_is_used_without_env() {
        if std::env::var(FILTER_ENV).is_ok() {
            return;
        }
        let cfg = LoggingConfig {
            file: None,
            filter: Some("redcli=debug".into()),
        };
        assert_eq!(filter_directive(&cfg), "redcli=debug");
        assert_eq!(filter_directive(&LoggingConfig::default()), "info");
    }
}
