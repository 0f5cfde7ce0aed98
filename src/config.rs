use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::{EntityStore, FileStorage, ResourceKind, SqliteStorage};
use crate::error::{Error, Result};
use crate::ratelimit::Pacing;

const APP_NAME: &str = "activity-cache";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub strava: StravaConfig,
  pub cache: CacheConfig,
  pub batch: BatchConfig,
  pub pacing: Pacing,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StravaConfig {
  pub base_url: String,
  /// Athlete whose activities are cached
  pub athlete_id: Option<u64>,
  /// Per-request timeout
  pub timeout_secs: u64,
}

impl Default for StravaConfig {
  fn default() -> Self {
    Self {
      base_url: "https://www.strava.com/api/v3".to_string(),
      athlete_id: None,
      timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
  /// One JSON file per activity
  #[default]
  File,
  /// Single SQLite database
  Sqlite,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub backend: Backend,
  /// Defaults to $XDG_DATA_HOME/activity-cache
  pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
  pub max_concurrency: usize,
  pub respect_rate_limits: bool,
  #[serde(deserialize_with = "deserialize_kinds")]
  pub required_kinds: Vec<ResourceKind>,
}

impl Default for BatchConfig {
  fn default() -> Self {
    Self {
      max_concurrency: 5,
      respect_rate_limits: true,
      required_kinds: ResourceKind::ALL.to_vec(),
    }
  }
}

fn deserialize_kinds<'de, D>(deserializer: D) -> std::result::Result<Vec<ResourceKind>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  v.iter()
    .map(|s| s.parse().map_err(serde::de::Error::custom))
    .collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Filter directive used when RUST_LOG is unset
  pub level: String,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./activity-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/activity-cache/config.yaml
  ///
  /// Without any file the defaults apply.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(Error::Config(format!(
          "config file not found: {}",
          p.display()
        )));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from(format!("{}.yaml", APP_NAME));
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_NAME).join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
      Error::Config(format!(
        "failed to read config file {}: {}",
        path.display(),
        e
      ))
    })?;
    Self::from_yaml(&contents)
      .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents)
      .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))
  }

  /// Get the Strava access token from environment variables.
  ///
  /// Checks ACTIVITY_CACHE_TOKEN first, then STRAVA_ACCESS_TOKEN as fallback.
  pub fn get_access_token() -> Result<String> {
    std::env::var("ACTIVITY_CACHE_TOKEN")
      .or_else(|_| std::env::var("STRAVA_ACCESS_TOKEN"))
      .map_err(|_| {
        Error::Config(
          "access token not found. Set ACTIVITY_CACHE_TOKEN or STRAVA_ACCESS_TOKEN".to_string(),
        )
      })
  }

  /// Directory holding cached records and logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.cache.dir {
      return Ok(dir.clone());
    }
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::Config("could not determine data directory".to_string()))?;
    Ok(data_dir.join(APP_NAME))
  }

  /// Open the configured storage backend.
  pub fn open_store(&self) -> Result<EntityStore> {
    let dir = self.data_dir()?;
    Ok(match self.cache.backend {
      Backend::File => EntityStore::new(FileStorage::open(dir.join("records"))?),
      Backend::Sqlite => EntityStore::new(SqliteStorage::open(&dir.join("cache.db"))?),
    })
  }
}
