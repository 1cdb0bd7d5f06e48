// config.rs — Project layout (.ride/) and the optional config.toml.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Filesystem layout of a ride project.
#[derive(Debug, Clone)]
pub struct RideConfig {
    pub project_root: PathBuf,
    /// `.ride/` under the project root.
    pub ride_dir: PathBuf,
    /// SQLite database for the durable store.
    pub database: PathBuf,
    /// JSONL feed of committed state changes.
    pub events_log: PathBuf,
    /// Optional overrides; defaults apply when absent.
    pub config_file: PathBuf,
}

impl RideConfig {
    pub fn for_project(project_root: impl AsRef<Path>) -> Self {
        let root = project_root.as_ref().to_path_buf();
        let ride_dir = root.join(".ride");
        Self {
            project_root: root,
            database: ride_dir.join("rides.db"),
            events_log: ride_dir.join("events.jsonl"),
            config_file: ride_dir.join("config.toml"),
            ride_dir,
        }
    }
}

/// Contents of `.ride/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RideSettings {
    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub identity: IdentitySettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Which RideStore backs the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    /// Process-local; nothing survives the command. Useful for dry runs.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub backend: StoreBackend,

    /// How long a write waits on another connection's lock.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl StoreSettings {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Append every committed state change to `.ride/events.jsonl`.
    #[serde(default = "default_true")]
    pub events_log: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            events_log: default_true(),
        }
    }
}

/// Bearer token table for the static identity gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentitySettings {
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Level for this project's crates when RUST_LOG is unset.
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of the plain formatter.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

impl RideSettings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let settings = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(settings)
    }

    /// Defaults when the file does not exist. A file that exists but does
    /// not parse is still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }
}
