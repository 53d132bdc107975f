//! Configuration management for the HSM console
//!
//! Endpoint and transport settings with TOML persistence.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::{api::ClientSettings, ConsoleError, ConsoleResult, SignatureAlgorithm};

/// Console configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Base URL of the HSM API, including its version prefix
    pub endpoint: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// User agent sent with every request
    pub user_agent: String,
    /// Path to a PEM bundle of extra root certificates
    pub ca_bundle_path: Option<PathBuf>,
    /// Algorithm preselected in the sign and verify workflows
    pub default_algorithm: SignatureAlgorithm,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        let client = ClientSettings::default();
        Self {
            endpoint: client.base_url,
            timeout_secs: client.timeout.as_secs(),
            user_agent: client.user_agent,
            ca_bundle_path: None,
            default_algorithm: SignatureAlgorithm::default(),
        }
    }
}

impl ConsoleConfig {
    /// Load configuration from the default location, writing defaults on first use
    pub fn load() -> ConsoleResult<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, creating it with defaults if absent
    pub fn load_from(path: &Path) -> ConsoleResult<Self> {
        if path.exists() {
            let content = fs::read_to_string(path).map_err(|err| config_error(path, err))?;
            toml::from_str(&content).map_err(|err| config_error(path, err))
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> ConsoleResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| config_error(parent, err))?;
        }
        let content = toml::to_string_pretty(self).map_err(|err| config_error(path, err))?;
        fs::write(path, content).map_err(|err| config_error(path, err))
    }

    /// Get the configuration file path
    pub fn config_path() -> PathBuf {
        ProjectDirs::from("com", "hsm-console", "console")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Transport settings derived from this configuration
    pub fn client_settings(&self) -> ConsoleResult<ClientSettings> {
        let ca_bundle_pem = match &self.ca_bundle_path {
            Some(path) => Some(fs::read(path).map_err(|err| config_error(path, err))?),
            None => None,
        };
        Ok(ClientSettings {
            base_url: self.endpoint.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            user_agent: self.user_agent.clone(),
            ca_bundle_pem,
        })
    }
}

fn config_error(path: &Path, err: impl std::fmt::Display) -> ConsoleError {
    ConsoleError::Validation(format!("configuration {}: {err}", path.display()))
}
