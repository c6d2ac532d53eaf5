use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Where databases and logs live (defaults to $XDG_DATA_HOME/qmaker)
  pub data_dir: Option<PathBuf>,
  pub remote: RemoteConfig,
  pub storage: StorageConfig,
  pub cache: CacheConfig,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
  /// Base URL of the sync API; `/api/sync` is appended
  pub base_url: String,
  pub timeout_secs: u64,
  /// How often `watch` checks whether the remote is reachable
  pub poll_secs: u64,
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:3000".to_string(),
      timeout_secs: 30,
      poll_secs: 15,
    }
  }
}

impl RemoteConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_secs(self.poll_secs.max(1))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Namespace prefix for key/value entries
  pub key_prefix: String,
  /// Reject key/value writes past this many bytes
  pub quota_bytes: Option<usize>,
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self {
      key_prefix: crate::kv::KEY_PREFIX.to_string(),
      quota_bytes: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Cache generation; bump to invalidate every cached asset
  pub version: u32,
  /// Origin the shell assets are fetched from (defaults to the remote base URL)
  pub origin: Option<String>,
  pub assets: Vec<String>,
  pub shell: String,
  pub sync_tag: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: 1,
      origin: None,
      assets: vec![
        "/index.html".to_string(),
        "/static/js/bundle.js".to_string(),
        "/static/css/main.css".to_string(),
        "/manifest.json".to_string(),
      ],
      shell: "/index.html".to_string(),
      sync_tag: "sync-offline-actions".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Default filter when RUST_LOG is unset
  pub level: String,
  /// Also write daily-rotated log files under <data_dir>/logs
  pub file: bool,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: false,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./qmaker.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/qmaker/config.yaml
  ///
  /// Without a config file every setting takes its default.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    Ok(config.with_env_overrides())
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("qmaker.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("qmaker").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file deserializes to null rather than an empty mapping
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Apply QMAKER_REMOTE_URL over the file setting.
  fn with_env_overrides(mut self) -> Self {
    if let Ok(url) = std::env::var("QMAKER_REMOTE_URL") {
      self.remote.base_url = url;
    }
    self
  }

  /// Resolved data directory.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("qmaker"))
  }

  /// Origin the asset cache fetches from.
  pub fn cache_origin(&self) -> &str {
    self
      .cache
      .origin
      .as_deref()
      .unwrap_or(&self.remote.base_url)
  }
}
