//! Settings file and remote path history.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Where remote files live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostSettings {
    /// Watch files on this machine.
    #[default]
    Local,
    /// Watch files through the system ssh client.
    Ssh {
        destination: String,
        #[serde(default)]
        port: Option<u16>,
        #[serde(default)]
        identity: Option<PathBuf>,
    },
}

/// Core settings, stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Delay between modification-time polls.
    pub poll_interval_ms: u64,
    /// Root directory for per-channel staging copies.
    pub staging_dir: PathBuf,
    /// External listing→CSV tool, run as `<program> <input> <output>`.
    /// The built-in converter is used when unset.
    pub converter: Option<String>,
    pub host: HostSettings,
    pub data_path_history: PathHistory,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            staging_dir: PathBuf::from("./temp"),
            converter: None,
            host: HostSettings::default(),
            data_path_history: PathHistory::default(),
        }
    }
}

impl Settings {
    /// Read settings from `path`; a missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).context("serializing settings")?;
        std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// PathHistory – most recently used remote paths
// ---------------------------------------------------------------------------

/// Previously used remote paths, most recent first, without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathHistory(Vec<String>);

impl PathHistory {
    /// Record a use of `path`, moving it to the front.  Blank paths are
    /// ignored.
    pub fn touch(&mut self, path: &str) {
        let path = path.trim();
        if path.is_empty() {
            return;
        }
        self.0.retain(|p| p != path);
        self.0.insert(0, path.to_string());
    }

    pub fn entries(&self) -> &[String] {
        &self.0
    }

    pub fn most_recent(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }
}
