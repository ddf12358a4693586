// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration file handling.
//!
//! Settings live in `~/.vidpull/config.json`. A missing file means defaults;
//! every field is optional in the file.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::jobs::{JobSettings, DEFAULT_FORMAT};

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 5000;

/// Default bind address (localhost only).
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    /// Where finished files are written.
    pub downloads_dir: PathBuf,
    /// yt-dlp executable, looked up on `PATH` when not absolute.
    pub ytdlp_path: PathBuf,
    pub default_format: String,
    /// Upper bound on jobs running the engine at once. Unlimited when unset.
    pub max_concurrent_jobs: Option<usize>,
    /// Drop finished and failed snapshots not updated for this many seconds.
    /// Kept forever when unset.
    pub snapshot_ttl_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            downloads_dir: PathBuf::from("downloads"),
            ytdlp_path: PathBuf::from("yt-dlp"),
            default_format: DEFAULT_FORMAT.to_string(),
            max_concurrent_jobs: None,
            snapshot_ttl_secs: None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    /// No home directory to look for the default file in.
    NoHomeDir,
    Read { path: PathBuf, source: io::Error },
    Parse { path: PathBuf, source: serde_json::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoHomeDir => write!(f, "Could not find home directory"),
            Self::Read { path, source } => {
                write!(f, "Failed to read config {}: {}", path.display(), source)
            }
            Self::Parse { path, source } => {
                write!(f, "Invalid config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NoHomeDir => None,
            Self::Read { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
        }
    }
}

/// `~/.vidpull/config.json`
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home.join(".vidpull").join("config.json"))
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicit path must exist; the default one may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let path = default_config_path()?;
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    tracing::debug!(path = %path.display(), "No config file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Settings handed to every job.
    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            downloads_dir: self.downloads_dir.clone(),
            default_format: self.default_format.clone(),
            temp_dir: None,
        }
    }

    pub fn snapshot_ttl(&self) -> Option<Duration> {
        self.snapshot_ttl_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.default_format, "best[height<=720]/best");
        assert_eq!(config.max_concurrent_jobs, None);
        assert_eq!(config.snapshot_ttl(), None);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"port": 8080, "snapshot_ttl_secs": 600}"#).unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.snapshot_ttl(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("nope.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ port: ").unwrap();
        assert!(matches!(Config::load_from(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "port": 9000,
                "bind_address": "0.0.0.0",
                "downloads_dir": "/srv/media",
                "ytdlp_path": "/usr/local/bin/yt-dlp",
                "default_format": "bestaudio",
                "max_concurrent_jobs": 3
            }"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.ytdlp_path, PathBuf::from("/usr/local/bin/yt-dlp"));
        assert_eq!(config.max_concurrent_jobs, Some(3));
        assert_eq!(config.snapshot_ttl_secs, None);
    }

    #[test]
    fn test_job_settings() {
        let config = Config {
            downloads_dir: PathBuf::from("/srv/media"),
            default_format: "bestaudio".to_string(),
            ..Config::default()
        };
        let settings = config.job_settings();
        assert_eq!(settings.downloads_dir, PathBuf::from("/srv/media"));
        assert_eq!(settings.default_format, "bestaudio");
    }

    #[test]
    fn test_zero_ttl_disables_eviction() {
        let config = Config {
            snapshot_ttl_secs: Some(0),
            ..Config::default()
        };
        assert_eq!(config.snapshot_ttl(), None);
    }
}
