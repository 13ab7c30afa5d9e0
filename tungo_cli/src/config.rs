//! Trivial on-disk CLI configuration: a default rendezvous server URL.
//!
//! The engine itself holds no persisted state; this exists purely so repeat
//! invocations of `tungo http <port>` don't need `--server` every time.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub fn config_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".tungo")
}

fn config_file() -> PathBuf {
    config_dir().join("config.yml")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_server_url")]
    pub server_url: String,
}

fn default_server_url() -> String {
    "wss://tunnel.tungo.dev".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self { server_url: default_server_url() }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = config_file();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path).context("failed to read config file")?;
        let config = serde_yaml::from_str(&content).context("failed to parse config file")?;
        Ok(config)
    }
}
