// src/config.rs
//! Console configuration (`config.toml`).
//!
//! ```toml
//! [server]
//! url = "http://localhost:3000"   # console query interface
//! token = "..."                   # session token, sent as bearer auth
//! connect_timeout_secs = 10
//!
//! [console]
//! publish_interval_ms = 200       # throttle for streamed row updates
//! history_capacity = 100
//! history_file = "/path/to/history.json"
//! keep_empty_results = false
//! user = "alice"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;

use crate::coordinator::ExecutionPolicy;
use crate::history::DEFAULT_HISTORY_CAPACITY;

pub const CONFIG_ENV: &str = "RIME_CONFIG";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub console: ConsoleConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub url: String,
    pub token: Option<String>,
    pub connect_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000".to_owned(),
            token: None,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub publish_interval_ms: u64,
    pub history_capacity: usize,
    pub history_file: Option<PathBuf>,
    pub keep_empty_results: bool,
    pub user: Option<String>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            publish_interval_ms: 200,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            history_file: None,
            keep_empty_results: false,
            user: None,
        }
    }
}

impl Config {
    /// Load from the first config file found; defaults if there is none.
    pub fn load() -> Result<Self> {
        match Self::locate() {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// `$RIME_CONFIG`, then `config.toml` beside the executable, then the
    /// platform config directory.
    fn locate() -> Option<PathBuf> {
        if let Some(p) = std::env::var_os(CONFIG_ENV) {
            return Some(PathBuf::from(p));
        }
        let beside_exe = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|p| p.join(CONFIG_FILE)));
        let in_config_dir = project_dirs().map(|d| d.config_dir().join(CONFIG_FILE));
        beside_exe.into_iter().chain(in_config_dir).find(|p| p.exists())
    }

    /// Where the durable history log lives.
    pub fn history_path(&self) -> Option<PathBuf> {
        self.console
            .history_file
            .clone()
            .or_else(|| project_dirs().map(|d| d.data_dir().join("history.json")))
    }

    pub fn policy(&self) -> ExecutionPolicy {
        ExecutionPolicy {
            publish_interval: Duration::from_millis(self.console.publish_interval_ms),
            keep_empty_results: self.console.keep_empty_results,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.server.connect_timeout_secs)
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "rime")
}
