/*
 * CEP Bridge - Filesystem Command Channel for Host Scripting
 * File Path: src/init.rs
 * Responsibility: Configuration discovery and startup preparation
 */

use crate::config::Config;
use crate::janitor;
use anyhow::Result;
use dirs::home_dir;
use std::path::{Path, PathBuf};
use tracing::info;

const CONFIG_ENV: &str = "CEP_BRIDGE_CONFIG";
const DIR_ENV: &str = "CEP_BRIDGE_DIR";

/// Resolve the config file path
/// Priority: CLI > Environment Variable > ~/.cep-bridge/bridge.yml
pub fn resolve_config_path(cli_config: Option<PathBuf>) -> Option<PathBuf> {
    choose_config_path(cli_config, std::env::var(CONFIG_ENV).ok(), home_dir())
}

fn choose_config_path(
    cli_config: Option<PathBuf>,
    env_config: Option<String>,
    home: Option<PathBuf>,
) -> Option<PathBuf> {
    // 1. CLI takes highest priority
    if let Some(path) = cli_config {
        return Some(path);
    }

    // 2. Environment variable
    if let Some(env_path) = env_config.filter(|p| !p.trim().is_empty()) {
        return Some(PathBuf::from(env_path));
    }

    // 3. Home default, only when present
    home.map(|h| h.join(".cep-bridge").join("bridge.yml"))
        .filter(|p| p.exists())
}

/// Loads the configuration, falling back to defaults when no file is found,
/// then applies the directory override (CLI first, then environment).
pub fn load_config(cli_config: Option<PathBuf>, cli_dir: Option<PathBuf>) -> Result<Config> {
    let mut config = match resolve_config_path(cli_config) {
        Some(path) => {
            info!(path = ?path, "Loading configuration");
            Config::load(&path)?
        }
        None => Config::default(),
    };

    let env_dir = std::env::var(DIR_ENV).ok().filter(|d| !d.trim().is_empty());
    if let Some(dir) = cli_dir.or_else(|| env_dir.map(PathBuf::from)) {
        config.bridge.directory = Some(dir);
    }

    Ok(config)
}

/// Startup sweep of whatever a previous session left behind.
pub fn prepare_directory(config: &Config, directory: &Path) {
    if config.janitor.sweep_on_start {
        let report = janitor::sweep(directory);
        info!(
            directory = ?directory,
            removed = report.removed,
            "Startup sweep finished"
        );
    }
}
