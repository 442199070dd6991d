//! Configuration management for Runbooks.
//!
//! Loads configuration from TOML files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Session and execution settings
    pub session: SessionConfig,

    /// Live-reload watcher settings
    pub watch: WatchConfig,

    /// Path hints exposed to block scripts
    pub paths: PathsConfig,
}

/// Session and execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell used for blocks without a shebang
    pub shell: String,

    /// Default per-block timeout in seconds
    pub timeout_secs: u64,
}

/// Live-reload watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Debounce window in milliseconds
    pub debounce_ms: u64,

    /// Number of undelivered events buffered per subscriber
    pub subscriber_buffer: usize,
}

/// Path hints exposed to block scripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory for generated files (`$GENERATED_FILES`), relative to the runbook
    pub generated_files: String,

    /// Working-tree root (`$REPO_FILES`), unset by default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_files: Option<String>,
}

impl Config {
    /// Load configuration for a runbook directory.
    ///
    /// Looks for config in:
    /// 1. `.runbooks.toml` in the runbook directory
    /// 2. `~/.config/runbooks/config.toml`
    /// 3. Falls back to defaults
    pub fn load(runbook_dir: &Path) -> anyhow::Result<Self> {
        let local_config = runbook_dir.join(".runbooks.toml");
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(config_dir) = Self::config_dir() {
            let global_config = config_dir.join("config.toml");
            if global_config.exists() {
                return Self::load_from_file(&global_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {e}", path.display()))?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("runbooks"))
    }

    /// Default block timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.session.timeout_secs.max(1))
    }

    /// Debounce window for the watcher.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.watch.debounce_ms)
    }
}

impl PathsConfig {
    /// Resolve the generated-files directory against the runbook directory.
    pub fn generated_files_dir(&self, runbook_dir: &Path) -> PathBuf {
        resolve_path(&self.generated_files, runbook_dir)
    }

    /// Resolve the working-tree root, if configured.
    pub fn repo_files_dir(&self, runbook_dir: &Path) -> Option<PathBuf> {
        self.repo_files.as_deref().map(|p| resolve_path(p, runbook_dir))
    }
}

/// Expand `~` and environment variables, then anchor relative paths.
fn resolve_path(raw: &str, base: &Path) -> PathBuf {
    let expanded = shellexpand::full(raw).map_or_else(|_| raw.to_string(), |p| p.into_owned());
    let path = PathBuf::from(expanded);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { shell: "bash".to_string(), timeout_secs: 300 }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 300, subscriber_buffer: 10 }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self { generated_files: "generated".to_string(), repo_files: None }
    }
}
