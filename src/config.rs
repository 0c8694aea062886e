//! Config model and persistence helpers.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

/// Top-level configuration stored in `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Where the processing API lives and how the session is established.
    pub server: ServerCfg,
    /// Background refresh of the jobs table.
    pub polling: PollingCfg,
    /// Where saved results go.
    pub output: OutputCfg,
}

/// Processing API endpoint and session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCfg {
    /// Scheme, host and port of the web application.
    pub base_url: String,
    /// Page whose markup carries the form token.
    pub page_path: String,
    /// Browser page listing jobs, linked from "queued" notifications.
    pub history_path: String,
    /// Cookies sent with every request, e.g. `sessionid=...; csrftoken=...`.
    #[serde(default)]
    pub session_cookie: String,
    /// Seconds before a request without a response is abandoned.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

/// Interval refresh settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingCfg {
    /// Milliseconds between silent background refreshes.
    pub interval_ms: u64,
}

/// Output settings for saved images and videos.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputCfg {
    /// Directory that receives saved results.
    pub dir: String,
}

impl Default for ServerCfg {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".into(),
            page_path: "/history/".into(),
            history_path: "/history/".into(),
            session_cookie: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for PollingCfg {
    fn default() -> Self {
        Self { interval_ms: 3000 }
    }
}

impl Default for OutputCfg {
    fn default() -> Self {
        Self {
            dir: "results".into(),
        }
    }
}

impl PollingCfg {
    /// Polling period; very small values are raised to keep the server usable.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(250))
    }
}

impl ServerCfg {
    /// Deadline for a whole request; zero is raised to one second.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Absolute url of the history page for notifications.
    pub fn history_link(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.history_path.trim_start_matches('/')
        )
    }
}

impl Config {
    /// Load from disk or create defaults when missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let s = fs::read_to_string(path)?;
            Ok(toml::from_str(&s)?)
        } else {
            let cfg = Self::default();
            cfg.save(path)?;
            Ok(cfg)
        }
    }

    /// Persist the config as pretty TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let s = toml::to_string_pretty(self)?;
        fs::write(path, s)?;
        Ok(())
    }
}
