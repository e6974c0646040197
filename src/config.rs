/*
 * CEP Bridge - Filesystem Command Channel for Host Scripting
 * File Path: src/config.rs
 * Responsibility: YAML configuration structure and loading
 */
use crate::security::SecurityPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Rendering and export calls ask for this instead of the default.
pub const LONG_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_DIR_NAME: &str = "cep-bridge";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeSection,
    #[serde(default)]
    pub security: SecurityPolicy,
    #[serde(default)]
    pub janitor: JanitorConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BridgeSection {
    pub directory: Option<PathBuf>, // Defaults to <temp>/cep-bridge
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub keep_timed_out_commands: bool,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            directory: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            keep_timed_out_commands: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct JanitorConfig {
    #[serde(default = "default_true")]
    pub sweep_on_start: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            sweep_on_start: true,
            interval_secs: default_interval_secs(),
            max_age_secs: default_max_age_secs(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    300
}

fn default_max_age_secs() -> u64 {
    600
}

/// What every channel call receives explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub directory: PathBuf,
    pub timeout_ms: u64,
    /// Leave the command file behind when a call times out.
    pub keep_timed_out_commands: bool,
}

impl BridgeConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            keep_timed_out_commands: false,
        }
    }

    /// Copy of this config with a per-call timeout.
    pub fn with_timeout(&self, timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            ..self.clone()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

pub fn default_directory() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_DIR_NAME)
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file at {:?}", path.as_ref()))?;
        let config: Config = serde_yaml::from_str(&content)
            .context("Failed to parse config file")?;
        Ok(config)
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            directory: self.bridge.directory.clone().unwrap_or_else(default_directory),
            timeout_ms: self.bridge.timeout_ms,
            keep_timed_out_commands: self.bridge.keep_timed_out_commands,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.janitor.interval_secs.max(1))
    }

    /// Never shorter than the longest timeout a call may wait, so a stale
    /// sweep cannot remove a command that is still in flight.
    pub fn sweep_max_age(&self) -> Duration {
        let longest_call = Duration::from_millis(self.bridge.timeout_ms.max(LONG_TIMEOUT_MS));
        Duration::from_secs(self.janitor.max_age_secs).max(longest_call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::DEFAULT_MAX_SCRIPT_BYTES;
    use tempfile::tempdir;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        let bridge = config.bridge_config();

        assert_eq!(bridge.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(bridge.directory, default_directory());
        assert!(!bridge.keep_timed_out_commands);
        assert_eq!(config.security.max_script_bytes, DEFAULT_MAX_SCRIPT_BYTES);
        assert!(config.janitor.sweep_on_start);
    }

    #[test]
    fn test_load_reads_all_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bridge.yml");
        fs::write(
            &path,
            r#"
bridge:
  directory: /var/tmp/premiere
  timeout_ms: 5000
  keep_timed_out_commands: true
security:
  max_script_bytes: 1024
  blocked_patterns: ["eval("]
janitor:
  sweep_on_start: false
  interval_secs: 30
  max_age_secs: 90
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        let bridge = config.bridge_config();
        assert_eq!(bridge.directory, PathBuf::from("/var/tmp/premiere"));
        assert_eq!(bridge.timeout_ms, 5000);
        assert!(bridge.keep_timed_out_commands);
        assert_eq!(config.security.max_script_bytes, 1024);
        assert_eq!(config.security.blocked_patterns, vec!["eval(".to_string()]);
        assert!(!config.janitor.sweep_on_start);
        assert_eq!(config.sweep_interval(), Duration::from_secs(30));
        // 90s is below the export timeout, so it is raised to it.
        assert_eq!(config.sweep_max_age(), Duration::from_secs(120));
    }

    #[test]
    fn test_sweep_max_age_covers_longest_call() {
        let mut config = Config::default();
        assert_eq!(config.sweep_max_age(), Duration::from_secs(600));

        config.janitor.max_age_secs = 5;
        assert_eq!(config.sweep_max_age(), Duration::from_millis(LONG_TIMEOUT_MS));

        config.bridge.timeout_ms = 900_000;
        assert_eq!(config.sweep_max_age(), Duration::from_secs(900));
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = tempdir().unwrap();
        let err = Config::load(dir.path().join("absent.yml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_with_timeout_keeps_directory() {
        let base = BridgeConfig::new("/tmp/x");
        let long = base.with_timeout(LONG_TIMEOUT_MS);
        assert_eq!(long.directory, base.directory);
        assert_eq!(long.timeout(), Duration::from_secs(120));
        assert_eq!(base.timeout_ms, DEFAULT_TIMEOUT_MS);
    }
}
