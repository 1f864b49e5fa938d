//! Delivery agent configuration, stored as TOML.
//!
//! Every field has a default, so a missing file or a partial table both
//! load. The engine section is handed to the registry unchanged.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sieve_kernel::config::{EngineConfig, InvalidSetting};
use sieve_kernel::runtime::DEFAULT_MAILBOX;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverConfig {
    /// Mailbox for `keep`, the implicit keep and the failsafe keep.
    pub default_mailbox: String,
    /// Address of the mailbox owner. Vacation falls back to the envelope
    /// recipient when unset.
    pub user: Option<String>,
    /// Directory holding compiled stage programs.
    pub program_dir: Option<PathBuf>,
    /// Stage names, run in order against every message.
    pub stages: Vec<String>,
    pub engine: EngineConfig,
}

impl Default for DeliverConfig {
    fn default() -> Self {
        Self {
            default_mailbox: DEFAULT_MAILBOX.to_string(),
            user: None,
            program_dir: None,
            stages: Vec::new(),
            engine: EngineConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {detail}")]
    Invalid { detail: String },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write config {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

impl From<InvalidSetting> for ConfigError {
    fn from(err: InvalidSetting) -> Self {
        Self::Invalid {
            detail: format!("engine: {err}"),
        }
    }
}

fn invalid(detail: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        detail: detail.into(),
    }
}

impl DeliverConfig {
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_mailbox.trim().is_empty() {
            return Err(invalid("default_mailbox must not be empty"));
        }
        if self.user.as_deref().is_some_and(|u| !u.contains('@')) {
            return Err(invalid("user must be a mail address"));
        }
        let mut seen = BTreeSet::new();
        for stage in &self.stages {
            if stage.is_empty() || stage.contains(['/', '\\']) || stage.starts_with('.') {
                return Err(invalid(format!("invalid stage name '{stage}'")));
            }
            if !seen.insert(stage.as_str()) {
                return Err(invalid(format!("stage '{stage}' listed twice")));
            }
        }
        if !self.stages.is_empty() && self.program_dir.is_none() {
            return Err(invalid("stages require program_dir"));
        }
        self.engine.validate()?;
        Ok(())
    }
}

/// Load and validate a config file. A missing file yields the defaults.
///
/// # Errors
///
/// [`ConfigError`] if the file cannot be read, parsed or validated.
pub fn load_config(path: &Path) -> Result<DeliverConfig, ConfigError> {
    if !path.exists() {
        debug!(path = %path.display(), "config file missing, using defaults");
        return Ok(DeliverConfig::default());
    }
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: DeliverConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    debug!(path = %path.display(), stages = config.stages.len(), "config loaded");
    Ok(config)
}

/// Validate and write `config`, replacing `path` atomically.
///
/// # Errors
///
/// [`ConfigError`] if the config is invalid or the write fails.
pub fn write_config(path: &Path, config: &DeliverConfig) -> Result<(), ConfigError> {
    config.validate()?;
    let content = toml::to_string_pretty(config)?;
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    let tmp = path.with_extension("toml.tmp");
    fs::write(&tmp, content).map_err(write_err)?;
    fs::rename(&tmp, path).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, DeliverConfig::default());
        assert_eq!(config.default_mailbox, "INBOX");
    }

    #[test]
    fn partial_table_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deliver.toml");
        fs::write(
            &path,
            "default_mailbox = \"Inbox\"\n\n[engine.vacation]\nmax_days = 60\n",
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.default_mailbox, "Inbox");
        assert_eq!(config.engine.vacation.max_days, 60);
        assert_eq!(config.engine.vacation.min_days, 1);
        assert_eq!(config.engine.max_actions, 32);
    }

    #[test]
    fn write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deliver.toml");
        let config = DeliverConfig {
            user: Some("alice@example.org".into()),
            program_dir: Some(dir.path().join("programs")),
            stages: vec!["before".into(), "user".into()],
            ..DeliverConfig::default()
        };
        write_config(&path, &config).unwrap();
        assert!(!path.with_extension("toml.tmp").exists());
        assert_eq!(load_config(&path).unwrap(), config);
    }

    #[test]
    fn parse_error_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "stages = 3").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "{err}");
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn rejects_bad_settings() {
        let cases = [
            DeliverConfig {
                default_mailbox: " ".into(),
                ..DeliverConfig::default()
            },
            DeliverConfig {
                user: Some("alice".into()),
                ..DeliverConfig::default()
            },
            DeliverConfig {
                stages: vec!["user".into()],
                ..DeliverConfig::default()
            },
            DeliverConfig {
                program_dir: Some("/tmp".into()),
                stages: vec!["user".into(), "user".into()],
                ..DeliverConfig::default()
            },
            DeliverConfig {
                program_dir: Some("/tmp".into()),
                stages: vec!["../escape".into()],
                ..DeliverConfig::default()
            },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid { .. })),
                "{config:?}"
            );
        }
    }

    #[test]
    fn engine_errors_surface_as_invalid() {
        let mut config = DeliverConfig::default();
        config.engine.vacation.min_days = 40;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("vacation.min_days"), "{err}");
    }
}
