// Configuration management for the MedRelay CLI
//
// Cross-platform config stored in:
// - macOS/Linux: ~/.config/medrelay/config.json
// - Windows: %APPDATA%\medrelay\config.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the remote patient service
    pub backend_url: String,

    /// Per-request HTTP timeout in seconds
    pub request_timeout_secs: u64,

    /// Storage path for the local patient store (defaults to the data dir)
    pub storage_path: Option<String>,

    /// Assume internet connectivity unless told otherwise
    pub assume_online: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:3000".to_string(),
            request_timeout_secs: 8,
            storage_path: None,
            assume_online: true,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("medrelay");

        std::fs::create_dir_all(&config_dir)
            .context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("medrelay");

        std::fs::create_dir_all(&data_dir)
            .context("Failed to create data directory")?;

        Ok(data_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let config_file = Self::config_file()?;

        if config_file.exists() {
            let contents = std::fs::read_to_string(&config_file)
                .context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let config_file = Self::config_file()?;
        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_file, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Resolved path of the local patient store
    pub fn storage_path(&self) -> Result<String> {
        match &self.storage_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?
                .join("patients")
                .to_string_lossy()
                .to_string()),
        }
    }
}
