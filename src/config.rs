//! Daemon configuration: defaults, optional TOML file, CLI overrides.

use std::path::PathBuf;

#[cfg(feature = "config-file")]
use serde::Deserialize;

/// Default path of the operator control socket.
pub const DEFAULT_OPERATOR_SOCKET: &str = "/run/hackerneld/control.sock";

/// Resolved daemon configuration: file defaults, overridden field-by-field
/// by whatever the CLI supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Path of the local operator control socket (C7).
    pub operator_socket: PathBuf,
    /// Optional path of a policy file to re-inject on startup (policy is
    /// not persisted by the engine itself; this is daemon-side re-injection
    /// convenience only).
    pub policy_file: Option<PathBuf>,
    /// Log level passed to `env_logger`.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            operator_socket: PathBuf::from(DEFAULT_OPERATOR_SOCKET),
            policy_file: None,
            log_level: "info".to_string(),
        }
    }
}

/// On-disk representation of [`Config`], every field optional so a partial
/// file only overrides what it mentions.
#[cfg(feature = "config-file")]
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    /// See [`Config::operator_socket`].
    pub operator_socket: Option<PathBuf>,
    /// See [`Config::policy_file`].
    pub policy_file: Option<PathBuf>,
    /// See [`Config::log_level`].
    pub log_level: Option<String>,
}

#[cfg(feature = "config-file")]
impl FileConfig {
    /// Load a [`FileConfig`] from `path`, returning an all-`None` config if
    /// the file does not exist (a missing config file is not an error).
    pub fn load(path: &std::path::Path) -> crate::error::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text)
                .map_err(|e| crate::error::Error::Resource(format!("invalid config file: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply this file config's overrides onto `base`.
    pub fn apply(self, base: &mut Config) {
        if let Some(v) = self.operator_socket {
            base.operator_socket = v;
        }
        if let Some(v) = self.policy_file {
            base.policy_file = v.into();
        }
        if let Some(v) = self.log_level {
            base.log_level = v;
        }
    }
}
