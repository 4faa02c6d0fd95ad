//! Command-line surface for the `hackerneld` binary.

use std::path::PathBuf;

use clap::Parser;

/// Host-based access-control daemon.
#[derive(Debug, Parser)]
#[command(name = "hackerneld", version, about)]
pub struct Cli {
    /// Path to a TOML configuration file. Missing is not an error; built-in
    /// defaults apply.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the operator control socket path.
    #[arg(long, value_name = "PATH")]
    pub operator_socket: Option<PathBuf>,

    /// Override the log level (error, warn, info, debug, trace).
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Path to a policy file to re-inject on startup.
    #[arg(long, value_name = "PATH")]
    pub policy_file: Option<PathBuf>,
}

impl Cli {
    /// Fold CLI overrides onto a [`crate::config::Config`] that already has
    /// file-config and built-in defaults applied. CLI flags win.
    pub fn apply(&self, config: &mut crate::config::Config) {
        if let Some(v) = &self.operator_socket {
            config.operator_socket = v.clone();
        }
        if let Some(v) = &self.log_level {
            config.log_level = v.clone();
        }
        if let Some(v) = &self.policy_file {
            config.policy_file = Some(v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn overrides_win_over_existing_config() {
        let mut config = crate::config::Config::default();
        let cli = Cli {
            config: None,
            operator_socket: Some(PathBuf::from("/tmp/custom.sock")),
            log_level: Some("debug".to_string()),
            policy_file: None,
        };
        cli.apply(&mut config);
        assert_eq!(config.operator_socket, PathBuf::from("/tmp/custom.sock"));
        assert_eq!(config.log_level, "debug");
    }
}
