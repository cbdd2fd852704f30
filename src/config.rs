// src/config.rs
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use xdg::BaseDirectories;

use crate::users::DEFAULT_PAGE_SIZE;

pub const APP_NAME: &str = "clusterwiz";
pub const DEFAULT_CONFIG_FILENAME: &str = "config.toml";
pub const DEFAULT_REFERENCE_DATA_FILENAME: &str = "reference.yaml";
pub const DEFAULT_USERS_FILENAME: &str = "users.yaml";

// Main configuration structure, mapping to config.toml
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub users: UsersConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AwsConfig {
    /// Region the console runs against; the AWS provider chain is used when unset.
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
    /// Offline reference data (subnets, key pairs per region). Takes precedence over EC2.
    #[serde(default)]
    pub reference_data: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct UsersConfig {
    #[serde(default)]
    pub user_pool_id: Option<String>,
    /// Offline users file. Takes precedence over the user pool.
    #[serde(default)]
    pub users_file: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Default for UsersConfig {
    fn default() -> Self {
        UsersConfig {
            user_pool_id: None,
            users_file: None,
            page_size: default_page_size(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default)]
    pub log_dir: Option<String>, // Path, can use ~; no file logging when unset
    #[serde(default = "default_rotate_daily")]
    pub rotate_daily: bool,
    #[serde(default = "default_log_format")]
    pub format: String, // file log format: "text" or "json"
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_rotate_daily() -> bool {
    true
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            log_dir: None,
            rotate_daily: default_rotate_daily(),
            format: default_log_format(),
        }
    }
}

pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

impl Config {
    pub fn load(config_path_override: Option<&Path>) -> Result<Self> {
        let xdg_dirs = BaseDirectories::with_prefix(APP_NAME)?;
        let config_path = match config_path_override {
            Some(path) => {
                debug!("Using provided config path override: {}", path.display());
                path.to_path_buf()
            }
            None => xdg_dirs
                .find_config_file(DEFAULT_CONFIG_FILENAME)
                .with_context(|| {
                    format!(
                        "Could not find default config file '{}'",
                        DEFAULT_CONFIG_FILENAME
                    )
                })?,
        };

        info!("Loading configuration from {}", config_path.display());
        let mut config = Self::from_file(&config_path)?;

        // Offline data files next to the config file win over the XDG ones
        let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        let find_data_file = |name: &str| {
            Some(config_dir.join(name))
                .filter(|p| p.exists())
                .or_else(|| xdg_dirs.find_config_file(name))
                .map(|p| p.display().to_string())
        };
        if config.aws.reference_data.is_none() {
            config.aws.reference_data = find_data_file(DEFAULT_REFERENCE_DATA_FILENAME);
        }
        if config.users.users_file.is_none() {
            config.users.users_file = find_data_file(DEFAULT_USERS_FILENAME);
        }

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        toml::from_str(&config_str).with_context(|| "Failed to parse TOML configuration")
    }

    pub fn reference_data_path(&self) -> Option<PathBuf> {
        self.aws.reference_data.as_deref().map(expand_path)
    }

    pub fn users_file_path(&self) -> Option<PathBuf> {
        self.users.users_file.as_deref().map(expand_path)
    }

    pub fn log_dir_path(&self) -> Option<PathBuf> {
        self.logging.log_dir.as_deref().map(expand_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.users.page_size, 10);
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.rotate_daily);
    }

    #[test]
    fn partial_overrides_keep_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[aws]
region = "eu-west-1"

[logging]
level = "debug"
log_dir = "~/.clusterwiz/logs"
"#,
        )
        .unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.aws.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.users, UsersConfig::default());
        assert_eq!(config.log_dir_path(), Some(expand_path("~/.clusterwiz/logs")));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[aws]\nzone = \"a\"\n").unwrap();
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn override_path_resolves_sibling_data_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();
        std::fs::write(dir.path().join(DEFAULT_USERS_FILENAME), "[]").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.users_file_path(), Some(dir.path().join(DEFAULT_USERS_FILENAME)));
        // No reference.yaml next to this config (unless one is installed under XDG).
        if let Some(reference) = config.reference_data_path() {
            assert!(reference.exists());
        }
    }
}
