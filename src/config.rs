use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::{CachePolicy, SqliteStore};
use crate::feed::FeedEndpoint;

/// Environment variable that overrides `api.base_url`.
pub const API_URL_ENV: &str = "FEEDLOADER_API_URL";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the feed API; `/v1/feed` is appended
  pub base_url: Option<String>,
  #[serde(default = "default_page_size")]
  pub page_size: usize,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: None,
      page_size: default_page_size(),
    }
  }
}

fn default_page_size() -> usize {
  FeedEndpoint::DEFAULT_PAGE_SIZE
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Database file (defaults to $XDG_DATA_HOME/feedloader/cache.db)
  pub path: Option<PathBuf>,
  /// How long a cached feed stays valid
  #[serde(default = "default_max_age_days")]
  pub max_age_days: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      path: None,
      max_age_days: default_max_age_days(),
    }
  }
}

fn default_max_age_days() -> i64 {
  CachePolicy::DEFAULT_MAX_AGE_DAYS
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Filter directive used when RUST_LOG is unset
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Append logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      file: None,
    }
  }
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./feedloader.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/feedloader/config.yaml
  ///
  /// Without any file the defaults are used. `FEEDLOADER_API_URL` overrides
  /// the API base URL either way.
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

    Ok(config.with_api_url_override(std::env::var(API_URL_ENV).ok()))
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("feedloader.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("feedloader").join("config.yaml");
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
    Ok(serde_yaml::from_str(contents)?)
  }

  fn with_api_url_override(mut self, url: Option<String>) -> Self {
    if let Some(url) = url.filter(|url| !url.trim().is_empty()) {
      self.api.base_url = Some(url);
    }
    self
  }

  /// Feed endpoint built from the `api` section.
  pub fn endpoint(&self) -> Result<FeedEndpoint> {
    let base_url = self.api.base_url.as_deref().ok_or_else(|| {
      eyre!(
        "Feed API URL not configured. Set api.base_url or the {} environment variable.",
        API_URL_ENV
      )
    })?;
    let base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid feed API URL {}: {}", base_url, e))?;

    if self.api.page_size == 0 {
      return Err(eyre!("api.page_size must be at least 1"));
    }

    FeedEndpoint::new(base_url, self.api.page_size)
  }

  pub fn cache_policy(&self) -> Result<CachePolicy> {
    if self.cache.max_age_days <= 0 {
      return Err(eyre!("cache.max_age_days must be at least 1"));
    }
    Ok(CachePolicy::new(chrono::Duration::days(self.cache.max_age_days)))
  }

  /// Where the cache database lives.
  pub fn cache_path(&self) -> Result<PathBuf> {
    match &self.cache.path {
      Some(path) => Ok(path.clone()),
      None => SqliteStore::default_path(),
    }
  }
}
