//! Sync configuration persistence
//!
//! Stores session defaults and the last chosen master in a simple
//! `key=value` file.

use crate::clock::{DEFAULT_BPM, DEFAULT_MAX_WRAP_ITERATIONS, DEFAULT_SAMPLE_RATE};
use lockstep_control::Group;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Errors that can occur when reading or writing the config file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Sync engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Master tempo the internal clock starts at
    pub default_bpm: f64,
    /// Sample rate assumed until the output device reports one
    pub fallback_sample_rate: u32,
    /// Bound on the virtual clock's wrap loop
    pub max_wrap_iterations: u32,
    /// Master restored at startup (`[Master]` = internal clock)
    pub last_master: Option<Group>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_bpm: DEFAULT_BPM,
            fallback_sample_rate: DEFAULT_SAMPLE_RATE,
            max_wrap_iterations: DEFAULT_MAX_WRAP_ITERATIONS,
            last_master: None,
        }
    }
}

impl SyncConfig {
    /// Load config from the default location
    ///
    /// Returns default config if the file doesn't exist or can't be read.
    pub fn load() -> Self {
        let path = Self::config_path();
        Self::load_from(&path).unwrap_or_default()
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path();
        self.save_to(&path)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.serialize())?;
        Ok(())
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lockstep")
            .join("sync.conf")
    }

    /// Parse config from `key=value` lines
    ///
    /// Unknown keys are ignored; unparseable values keep their defaults.
    fn parse(content: &str) -> Self {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "default_bpm" => match value.parse::<f64>() {
                    Ok(bpm) if bpm > 0.0 && bpm.is_finite() => config.default_bpm = bpm,
                    _ => warn!(value, "ignoring invalid default_bpm"),
                },
                "fallback_sample_rate" => match value.parse::<u32>() {
                    Ok(rate) if rate > 0 => config.fallback_sample_rate = rate,
                    _ => warn!(value, "ignoring invalid fallback_sample_rate"),
                },
                "max_wrap_iterations" => match value.parse::<u32>() {
                    Ok(iterations) if iterations > 0 => config.max_wrap_iterations = iterations,
                    _ => warn!(value, "ignoring invalid max_wrap_iterations"),
                },
                "last_master" => {
                    if !value.is_empty() {
                        match value.parse::<Group>() {
                            Ok(group) => config.last_master = Some(group),
                            Err(e) => warn!(%e, "ignoring invalid last_master"),
                        }
                    }
                }
                _ => {}
            }
        }

        config
    }

    /// Serialize config to `key=value` lines
    fn serialize(&self) -> String {
        let mut lines = vec![
            "# lockstep sync configuration".to_string(),
            format!("default_bpm={}", self.default_bpm),
            format!("fallback_sample_rate={}", self.fallback_sample_rate),
            format!("max_wrap_iterations={}", self.max_wrap_iterations),
        ];
        if let Some(group) = self.last_master {
            lines.push(format!("last_master={}", group));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        assert_eq!(SyncConfig::parse(""), SyncConfig::default());
    }

    #[test]
    fn test_parse_values() {
        let content = "# Comment\ndefault_bpm=128.5\nfallback_sample_rate = 48000\nlast_master=[Channel2]";
        let config = SyncConfig::parse(content);
        assert_eq!(config.default_bpm, 128.5);
        assert_eq!(config.fallback_sample_rate, 48000);
        assert_eq!(config.last_master, Group::deck(2));
    }

    #[test]
    fn test_parse_invalid_values_keep_defaults() {
        let content = "default_bpm=-4\nfallback_sample_rate=fast\nmax_wrap_iterations=0\nlast_master=[Deck9]\nbogus=1";
        assert_eq!(SyncConfig::parse(content), SyncConfig::default());
    }

    #[test]
    fn test_internal_master() {
        let config = SyncConfig::parse("last_master=[Master]");
        assert_eq!(config.last_master, Some(Group::Master));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sync.conf");
        let config = SyncConfig {
            default_bpm: 174.0,
            last_master: Group::deck(3),
            ..SyncConfig::default()
        };

        config.save_to(&path).unwrap();
        assert_eq!(SyncConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SyncConfig::load_from(&dir.path().join("missing.conf")).is_err());
    }
}
