//! Application configuration for the identity reconciler.
//!
//! User config lives at `~/.identity/identity.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IdentityError, Result};
use crate::types::TieBreakPolicy;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "identity.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".identity";

// ---------------------------------------------------------------------------
// Config structs (matching identity.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Contact database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Reconciliation behavior.
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the libSQL database file. A leading `~` is expanded.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "~/.identity/contacts.db".into()
}

/// `[reconcile]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Canonical-record choice when `created_at` ties.
    #[serde(default)]
    pub tie_break: TieBreakPolicy,
}

// ---------------------------------------------------------------------------
// Reconcile options (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime reconciliation options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub tie_break: TieBreakPolicy,
}

impl From<&AppConfig> for ReconcileOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            tie_break: config.reconcile.tie_break,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.identity/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| IdentityError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.identity/identity.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| IdentityError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| IdentityError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| IdentityError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| IdentityError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| IdentityError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| IdentityError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}
