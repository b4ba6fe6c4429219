/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::config
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Load Syn-Upd-Core configuration from TOML, layering file
    values over conservative defaults.

  Security / Safety Notes:
    Only reads the configuration file; never writes to it.
    No credentials are expected or stored here.

  Dependencies:
    serde + toml for parsing, dirs for platform directories.

  Operational Scope:
    Consumed by update manager construction and by thin
    callers that need log or plan locations.

  Revision History:
    2024-11-04 COD  Established configuration loader.
    2025-11-17 COD  Reworked sections for update feeds.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Explicit defaults for every tunable
    - Validation before use
============================================================*/

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, SynupdError};

const DEFAULT_APP_NAME: &str = "syn-upd-app";

/// HTTP tunables for catalog and package retrieval.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout in seconds.
    pub timeout: u64,
    pub user_agent: String,
    /// Retries after the first failed catalog request.
    pub catalog_retries: usize,
    /// Upper bound on simultaneous package downloads; 0 means the batch size.
    pub max_parallel_downloads: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: 300,
            user_agent: "Syn-Upd-Core/0.4 (updater)".to_string(),
            catalog_retries: 3,
            max_parallel_downloads: 0,
        }
    }
}

/// Cross-process update lock tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub timeout_ms: u64,
    /// Also serialize read-only catalog checks behind the lock.
    pub lock_checks: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            lock_checks: false,
        }
    }
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// HTTP(S) URL or directory holding the RELEASES catalog and packages.
    pub update_source: String,
    pub application_name: String,
    /// Installation root; defaults to the local data dir plus the app name.
    pub root_dir: Option<PathBuf>,
    pub min_prerelease: Option<String>,
    /// Directory for per-session update logs; defaults to `<root>/logs`.
    pub log_dir: Option<PathBuf>,
    /// Mirror every log line to stderr, not just warnings and errors.
    pub verbose: bool,
    pub http: HttpConfig,
    pub lock: LockConfig,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            update_source: String::new(),
            application_name: DEFAULT_APP_NAME.to_string(),
            root_dir: None,
            min_prerelease: None,
            log_dir: None,
            verbose: false,
            http: HttpConfig::default(),
            lock: LockConfig::default(),
        }
    }
}

impl UpdaterConfig {
    /// Default configuration file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("syn-upd").join("config.toml"))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields defaults; an unreadable or malformed file is an
    /// error.
    pub fn load_from_optional_path(path: Option<&Path>) -> Result<Self> {
        let resolved = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path(),
        };

        let Some(file_path) = resolved else {
            return Ok(Self::default());
        };
        if !file_path.exists() {
            if path.is_some() {
                return Err(SynupdError::Config(format!(
                    "Configuration file {} does not exist",
                    file_path.display()
                )));
            }
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&file_path).map_err(|err| {
            SynupdError::Config(format!(
                "Failed to read configuration {}: {err}",
                file_path.display()
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|err| SynupdError::Config(format!("Failed to parse configuration: {err}")))
    }

    /// Reject configurations that cannot drive an update.
    pub fn validate(&self) -> Result<()> {
        if self.update_source.trim().is_empty() {
            return Err(SynupdError::Config("update_source must not be empty".into()));
        }
        if self.application_name.trim().is_empty() {
            return Err(SynupdError::Config(
                "application_name must not be empty".into(),
            ));
        }
        if self.http.timeout == 0 {
            return Err(SynupdError::Config("http.timeout must be positive".into()));
        }
        Ok(())
    }

    pub fn root_dir(&self) -> PathBuf {
        self.root_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(&self.application_name)
        })
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| self.root_dir().join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let config = UpdaterConfig::from_toml_str(
            r#"
update_source = "https://updates.example.test/app"
application_name = "Example"
min_prerelease = "beta"

[http]
timeout = 30
max_parallel_downloads = 4

[lock]
lock_checks = true
"#,
        )
        .expect("config must parse");

        assert_eq!(config.application_name, "Example");
        assert_eq!(config.min_prerelease.as_deref(), Some("beta"));
        assert_eq!(config.http.timeout, 30);
        assert_eq!(config.http.catalog_retries, 3);
        assert_eq!(config.http.max_parallel_downloads, 4);
        assert!(config.lock.lock_checks);
        assert_eq!(config.lock.timeout(), Duration::from_millis(2000));
        config.validate().expect("valid config");
    }

    #[test]
    fn empty_source_is_rejected() {
        let config = UpdaterConfig::default();
        assert!(matches!(config.validate(), Err(SynupdError::Config(_))));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent.toml");
        let result = UpdaterConfig::load_from_optional_path(Some(&missing));
        assert!(matches!(result, Err(SynupdError::Config(_))));
    }

    #[test]
    fn root_and_log_dirs_follow_overrides() {
        let config = UpdaterConfig {
            root_dir: Some(PathBuf::from("/srv/app")),
            ..UpdaterConfig::default()
        };
        assert_eq!(config.root_dir(), PathBuf::from("/srv/app"));
        assert_eq!(config.log_dir(), PathBuf::from("/srv/app/logs"));
    }
}
