use crate::core::config::data::{path_display, Config};
use crate::core::constants::PLACEHOLDER_API_KEY;
use directories::ProjectDirs;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Errors that stop the process before any transport is opened.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse the configuration file as valid TOML.
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A required secret is unset, blank, or still the sample placeholder.
    MissingEnv { name: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(
                    f,
                    "Failed to read config at {}: {}",
                    path_display(path),
                    source
                )
            }
            ConfigError::Parse { path, source } => {
                write!(
                    f,
                    "Failed to parse config at {}: {}",
                    path_display(path),
                    source
                )
            }
            ConfigError::MissingEnv { name } => {
                write!(
                    f,
                    "{name} is not set. Export it or add it to a .env file in the working directory."
                )
            }
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::MissingEnv { .. } => None,
        }
    }
}

impl Config {
    pub fn load_from_path(config_path: &Path) -> Result<Config, ConfigError> {
        if !config_path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            path: config_path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source,
        })
    }

    /// Loads `explicit` when given, otherwise the per-user config file if one exists.
    pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
        match explicit {
            Some(path) => Self::load_from_path(path),
            None => match Self::default_config_path() {
                Some(path) => Self::load_from_path(&path),
                None => Ok(Config::default()),
            },
        }
    }

    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "cambista", "cambista")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Reads a secret from the environment.
pub fn read_secret(name: &str) -> Result<String, ConfigError> {
    secret_from_value(name, std::env::var(name).ok())
}

pub(crate) fn secret_from_value(name: &str, value: Option<String>) -> Result<String, ConfigError> {
    match value.map(|v| v.trim().to_string()) {
        Some(value) if !value.is_empty() && value != PLACEHOLDER_API_KEY => Ok(value),
        _ => Err(ConfigError::MissingEnv {
            name: name.to_string(),
        }),
    }
}
