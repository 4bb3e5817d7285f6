use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::{Result, eyre::Context, eyre::eyre};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    database: String,
    source_directory: String,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Tuning knobs for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound on playlists fetched at the same time.
    pub max_concurrent_fetches: usize,
    pub write_retry_attempts: usize,
    pub write_retry_base_delay_ms: u64,
    pub fetch_retry_attempts: usize,
    pub fetch_retry_base_delay_ms: u64,
    /// Rate-limit responses asking to wait longer than this fail the playlist.
    pub max_rate_limit_wait_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetches_per_second: Option<u32>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 4,
            write_retry_attempts: 5,
            write_retry_base_delay_ms: 10,
            fetch_retry_attempts: 3,
            fetch_retry_base_delay_ms: 250,
            max_rate_limit_wait_secs: 30,
            fetches_per_second: None,
        }
    }
}

impl SyncConfig {
    pub fn write_retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.write_retry_base_delay_ms)
    }

    pub fn fetch_retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_retry_base_delay_ms)
    }

    pub fn max_rate_limit_wait(&self) -> Duration {
        Duration::from_secs(self.max_rate_limit_wait_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: "~/.local/share/setlist-sync/catalog.db".to_string(),
            source_directory: "~/.local/share/setlist-sync/playlists".to_string(),
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .context(format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join("setlist-sync").join("config.toml"))
    }

    /// Load config from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path().ok_or(eyre!("No config directory on this platform"))?;

        Self::from_file(&config_path)
    }

    /// Write the default config to the default location unless one exists already.
    pub fn create_default() -> Result<PathBuf> {
        let path = Self::config_path().ok_or(eyre!("No config directory on this platform"))?;
        Self::default().write_if_missing(&path)?;
        Ok(path)
    }

    fn write_if_missing(&self, path: &Path) -> Result<()> {
        if path.exists() {
            tracing::info!("Config already exists at {}", path.display());
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create config directory: {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents)
            .context(format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Expand ~ to home directory
    fn expand_path(&self, path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/")
            && let Some(home) = dirs::home_dir()
        {
            return home.join(rest);
        }
        PathBuf::from(path)
    }

    pub fn database_path(&self) -> PathBuf {
        self.expand_path(&self.database)
    }

    pub fn source_directory(&self) -> PathBuf {
        self.expand_path(&self.source_directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_section_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "database = \"/tmp/catalog.db\"\nsource_directory = \"/tmp/playlists\"\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.database_path(), PathBuf::from("/tmp/catalog.db"));
        assert_eq!(config.sync, SyncConfig::default());
    }

    #[test]
    fn test_partial_sync_section_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "database = \"db\"\nsource_directory = \"src\"\n[sync]\nmax_concurrent_fetches = 2\nfetches_per_second = 5\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.sync.max_concurrent_fetches, 2);
        assert_eq!(config.sync.fetches_per_second, Some(5));
        assert_eq!(config.sync.write_retry_attempts, 5);
    }

    #[test]
    fn test_default_config_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        Config::default().write_if_missing(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.sync, SyncConfig::default());

        // A second write leaves the user's file alone
        std::fs::write(&path, "database = \"mine\"\nsource_directory = \"x\"\n").unwrap();
        Config::default().write_if_missing(&path).unwrap();
        assert_eq!(Config::from_file(&path).unwrap().database_path(), PathBuf::from("mine"));
    }
}
