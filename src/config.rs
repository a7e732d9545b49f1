//! Optional JSON configuration supplying defaults for manifest generation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use tracing::warn;

use crate::generate::GenerateOptions;

/// File name searched for in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "appcache.config.json";

/// Discoverable configuration describing how a manifest is generated.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
  /// Prefix joined in front of every cached path.
  pub prefix: String,
  /// Postfile path or list of postfile paths appended after the generated contents.
  #[serde(deserialize_with = "one_or_many")]
  pub postfile: Vec<PathBuf>,
  /// Stamp the manifest with the creation time instead of the digest.
  pub stamp: bool,
  /// Append a `NETWORK:` wildcard section.
  pub network_star: bool,
  /// Where the manifest is written. Standard output when absent.
  pub output: Option<PathBuf>,
  /// Delay inserted before a regeneration triggered by the watcher.
  pub watch_delay_ms: u64,
}

impl Default for ManifestConfig {
  fn default() -> Self {
    Self {
      prefix: "/".into(),
      postfile: Vec::new(),
      stamp: false,
      network_star: false,
      output: None,
      watch_delay_ms: 1000,
    }
  }
}

/// Errors that can occur while loading an explicit configuration file.
#[derive(Debug)]
pub enum ConfigError {
  /// Failed to read the configuration file from disk.
  Io {
    /// Path that caused the error.
    path: PathBuf,
    /// Source I/O error.
    source: std::io::Error,
  },
  /// Failed to parse the JSON configuration.
  Parse {
    /// Path that caused the error.
    path: PathBuf,
    /// Source parse error.
    source: serde_json::Error,
  },
}

impl ManifestConfig {
  /// Load configuration from `dir`, falling back to defaults.
  ///
  /// A missing file is silently ignored; an unreadable or malformed one is reported with a
  /// warning before the defaults are used.
  pub fn discover(dir: &Path) -> Self {
    let candidate = dir.join(DEFAULT_CONFIG_FILE);
    match Self::from_path(&candidate) {
      Ok(config) => config,
      Err(ConfigError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
        Self::default()
      }
      Err(err) => {
        warn!("ignoring configuration: {err}");
        Self::default()
      }
    }
  }

  /// Read configuration from a specific JSON file.
  pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Generation options described by this configuration.
  pub fn to_options(&self) -> GenerateOptions {
    GenerateOptions {
      prefix: self.prefix.clone(),
      postfiles: self.postfile.clone(),
      stamp: self.stamp,
      network_star: self.network_star,
    }
  }

  /// Debounce delay for watcher-triggered regenerations.
  pub fn watch_delay(&self) -> Duration {
    Duration::from_millis(self.watch_delay_ms)
  }
}

impl std::fmt::Display for ConfigError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Io { path, source } => {
        write!(f, "failed to read {}: {}", path.display(), source)
      }
      Self::Parse { path, source } => {
        write!(f, "failed to parse {}: {}", path.display(), source)
      }
    }
  }
}

impl std::error::Error for ConfigError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Self::Io { source, .. } => Some(source),
      Self::Parse { source, .. } => Some(source),
    }
  }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
  One(PathBuf),
  Many(Vec<PathBuf>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<PathBuf>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(match OneOrMany::deserialize(deserializer)? {
    OneOrMany::One(path) => vec![path],
    OneOrMany::Many(paths) => paths,
  })
}
