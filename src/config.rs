use std::env;
use std::fs;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

fn default_mode() -> String {
    "release".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_static_path() -> String {
    "./web".to_string()
}
fn default_read_limit() -> usize {
    32768
}
fn default_ping_period_secs() -> u64 {
    54
}

/// Process configuration, loaded from YAML with `CONFIG_ENV`-selected
/// environment overlays and built-in defaults for everything but `secret`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_static_path")]
    pub static_path: String,
    #[serde(default = "default_read_limit")]
    pub read_limit: usize,
    #[serde(default = "default_ping_period_secs")]
    pub ping_period_secs: u64,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub stun_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mode: default_mode(),
            port: default_port(),
            static_path: default_static_path(),
            read_limit: default_read_limit(),
            ping_period_secs: default_ping_period_secs(),
            secret: None,
            stun_url: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("secret is required in release mode")]
    MissingSecret,
}

impl Config {
    pub fn ping_period(&self) -> Duration {
        Duration::from_secs(self.ping_period_secs)
    }

    pub fn is_release(&self) -> bool {
        self.mode == "release"
    }

    fn path() -> String {
        let env = env::var("CONFIG_ENV").unwrap_or_else(|_| "dev".to_string());
        format!("config/config.{}.yaml", env)
    }

    /// Loads from `config/config.<CONFIG_ENV>.yaml`, falling back silently
    /// to built-in defaults when the file is absent.
    pub fn load() -> Self {
        let path = Self::path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    info!(path = %path, "loaded configuration");
                    config
                }
                Err(err) => {
                    warn!(path = %path, %err, "failed to parse configuration, using defaults");
                    Config::default()
                }
            },
            Err(_) => {
                info!(path = %path, "no configuration file found, using defaults");
                Config::default()
            }
        }
    }

    /// In `release` mode a signing secret is mandatory; `debug` mode mints
    /// an ephemeral one so local runs never fail to start.
    pub fn resolve_secret(&self) -> Result<String, ConfigError> {
        match &self.secret {
            Some(secret) => Ok(secret.clone()),
            None if self.is_release() => Err(ConfigError::MissingSecret),
            None => {
                warn!("no secret configured in debug mode, generating an ephemeral one");
                Ok(uuid::Uuid::new_v4().simple().to_string())
            }
        }
    }
}
