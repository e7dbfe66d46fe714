use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            static_dir: PathBuf::from("static"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DownloadsConfig {
    /// Directory used when the client asks for "Default" or names a missing path.
    pub default_dir: Option<PathBuf>,
    /// Project-local folder searched for ffmpeg before PATH.
    pub bin_dir: PathBuf,
    pub ytdlp_path: String,
    pub fetch_timeout_secs: u64,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            default_dir: None,
            bin_dir: PathBuf::from("bin"),
            ytdlp_path: "yt-dlp".to_string(),
            fetch_timeout_secs: 60,
        }
    }
}

impl DownloadsConfig {
    pub fn resolved_default_dir(&self) -> PathBuf {
        match &self.default_dir {
            Some(dir) => expand_home(dir),
            None => default_download_dir(),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProgressConfig {
    pub poll_interval_ms: u64,
    pub orphan_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            orphan_ttl_secs: 600,
            sweep_interval_secs: 60,
        }
    }
}

impl ProgressConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn orphan_ttl(&self) -> Duration {
        Duration::from_secs(self.orphan_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub downloads: DownloadsConfig,
    pub progress: ProgressConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        Self::from_toml(&content).with_context(|| format!("Failed to parse config file {}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn get_logging_format(&self) -> &str {
        &self.logging.format
    }
}

/// `<home>/Downloads/Youtube Download`, or a relative folder when no home is known.
pub fn default_download_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join("Downloads").join("Youtube Download"),
        None => PathBuf::from("downloads"),
    }
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
