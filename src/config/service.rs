// src/config/service.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ingest::providers::instagram::DEFAULT_BASE_URL;

const ENV_PATH: &str = "FEED_PROVIDER_CONFIG_PATH";
const ENV_BASE_URL: &str = "FEED_SOURCE_BASE_URL";
const ENV_CALLBACK_URL: &str = "FEED_CALLBACK_URL";
const DEFAULT_PATH: &str = "config/feed_provider.toml";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_pacing_ms() -> u64 {
    1_000
}
fn default_retries() -> u8 {
    3
}

/// Process-wide settings. Per-instance feed lists arrive over CONFIG instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_base_url")]
    pub source_base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Where outbound updates are POSTed. Unset → updates are only logged.
    #[serde(default)]
    pub callback_url: Option<String>,
    /// Pacing for instances whose config does not set one.
    #[serde(default = "default_pacing_ms")]
    pub default_pacing_ms: u64,
    #[serde(default = "default_retries")]
    pub webhook_retries: u8,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            source_base_url: default_base_url(),
            request_timeout_secs: default_timeout_secs(),
            callback_url: None,
            default_pacing_ms: default_pacing_ms(),
            webhook_retries: default_retries(),
        }
    }
}

impl ServiceConfig {
    fn apply_env(mut self) -> Self {
        if let Ok(v) = std::env::var(ENV_BASE_URL) {
            if !v.trim().is_empty() {
                self.source_base_url = v.trim().to_string();
            }
        }
        if let Ok(v) = std::env::var(ENV_CALLBACK_URL) {
            self.callback_url = Some(v.trim().to_string()).filter(|s| !s.is_empty());
        }
        self
    }
}

/// Load settings from an explicit TOML file, then apply env overrides.
pub fn load_from(path: &Path) -> Result<ServiceConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading service config from {}", path.display()))?;
    let cfg: ServiceConfig = toml::from_str(&content)
        .with_context(|| format!("parsing service config {}", path.display()))?;
    Ok(cfg.apply_env())
}

/// Load settings using env var + fallbacks:
/// 1) $FEED_PROVIDER_CONFIG_PATH
/// 2) config/feed_provider.toml
/// 3) built-in defaults
pub fn load_default() -> Result<ServiceConfig> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_from(&pb);
        } else {
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
    }
    let p = PathBuf::from(DEFAULT_PATH);
    if p.exists() {
        return load_from(&p);
    }
    Ok(ServiceConfig::default().apply_env())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[serial_test::serial]
    #[test]
    fn partial_toml_keeps_defaults() {
        env::remove_var(ENV_BASE_URL);
        env::remove_var(ENV_CALLBACK_URL);
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("svc.toml");
        fs::write(&p, "default_pacing_ms = 250\ncallback_url = \"http://cb.local/x\"\n").unwrap();

        let cfg = load_from(&p).unwrap();
        assert_eq!(cfg.default_pacing_ms, 250);
        assert_eq!(cfg.callback_url.as_deref(), Some("http://cb.local/x"));
        assert_eq!(cfg.source_base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.webhook_retries, 3);
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_PATH);
        env::remove_var(ENV_BASE_URL);
        env::remove_var(ENV_CALLBACK_URL);

        // nothing on disk → defaults
        assert_eq!(load_default().unwrap(), ServiceConfig::default());

        // ./config/feed_provider.toml
        fs::create_dir_all(tmp.path().join("config")).unwrap();
        fs::write(tmp.path().join(DEFAULT_PATH), "request_timeout_secs = 3\n").unwrap();
        assert_eq!(load_default().unwrap().request_timeout_secs, 3);

        // env path wins, env overrides win over file
        let p_env = tmp.path().join("other.toml");
        fs::write(&p_env, "request_timeout_secs = 7\n").unwrap();
        env::set_var(ENV_PATH, p_env.display().to_string());
        env::set_var(ENV_BASE_URL, "http://mock.local");
        let cfg = load_default().unwrap();
        assert_eq!(cfg.request_timeout_secs, 7);
        assert_eq!(cfg.source_base_url, "http://mock.local");

        env::set_var(ENV_PATH, tmp.path().join("missing.toml").display().to_string());
        assert!(load_default().is_err());

        env::remove_var(ENV_PATH);
        env::remove_var(ENV_BASE_URL);
        env::set_current_dir(&old).unwrap();
    }
}
