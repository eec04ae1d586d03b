//! Configuration loading with hierarchy merging.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults (`config/default.toml`, compiled into binary)
//! 2. System config: `/etc/fetch-relay/config.toml`
//! 3. User config: `~/.config/fetch-relay/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)
//!
//! Scalars are **overridden** by later sources.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::ConfigError;
use super::schema::{Config, ControlSettings, GeneralSettings, ProxySettings, RelaySettings};
use crate::cli::{Cli, Commands};

/// System-wide configuration path.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/fetch-relay/config.toml";

/// User configuration directory name.
pub const USER_CONFIG_DIR: &str = "fetch-relay";

/// User configuration filename.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Defaults compiled into the binary.
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Configuration loader with support for hierarchy merging.
pub struct ConfigLoader {
    /// Path to system-wide configuration.
    system_path: PathBuf,
    /// Path to user configuration.
    user_path: PathBuf,
}

impl ConfigLoader {
    /// Create a new ConfigLoader with default paths.
    #[must_use]
    pub fn new() -> Self {
        let user_config_dir = dirs::config_dir()
            .map(|p| p.join(USER_CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from(".config").join(USER_CONFIG_DIR));

        Self {
            system_path: PathBuf::from(SYSTEM_CONFIG_PATH),
            user_path: user_config_dir.join(USER_CONFIG_FILE),
        }
    }

    /// Create a ConfigLoader with custom paths (for testing).
    #[must_use]
    pub fn with_paths(system_path: PathBuf, user_path: PathBuf) -> Self {
        Self {
            system_path,
            user_path,
        }
    }

    /// Load and merge configuration from all sources.
    ///
    /// Missing system and user files are skipped. A missing `--config` file
    /// and invalid TOML anywhere are errors.
    pub fn load(&self, cli: &Cli) -> Result<Config, ConfigError> {
        let mut config = Self::embedded_defaults()?;
        debug!("Loaded embedded default configuration");

        if let Some(system_config) = self.load_file(&self.system_path)? {
            config.merge(system_config);
            debug!("Loaded system config from {:?}", self.system_path);
        } else {
            debug!("No system config found at {:?}", self.system_path);
        }

        if let Some(user_config) = self.load_file(&self.user_path)? {
            config.merge(user_config);
            debug!("Loaded user config from {:?}", self.user_path);
        } else {
            debug!("No user config found at {:?}", self.user_path);
        }

        if let Some(ref cli_config_path) = cli.config {
            match self.load_file(cli_config_path)? {
                Some(cli_config) => {
                    config.merge(cli_config);
                    debug!("Loaded additional config from {:?}", cli_config_path);
                }
                None => {
                    return Err(ConfigError::ReadError {
                        path: cli_config_path.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "Specified config file not found",
                        ),
                    });
                }
            }
        }

        config.merge(Self::flags_config(cli));

        Ok(config)
    }

    /// Parse the defaults compiled into the binary.
    pub fn embedded_defaults() -> Result<Config, ConfigError> {
        toml::from_str(DEFAULT_CONFIG).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<embedded:default.toml>"),
            source: e,
        })
    }

    /// The overrides carried by CLI flags, as a config layer.
    fn flags_config(cli: &Cli) -> Config {
        match &cli.command {
            Commands::Serve(args) => Config {
                general: GeneralSettings {
                    audit_syslog: args.syslog.then_some(true),
                    ..Default::default()
                },
                relay: RelaySettings {
                    reply_timeout_ms: args.reply_timeout_ms,
                    self_uninstall: args.no_self_uninstall.then_some(false),
                },
                proxy: ProxySettings {
                    listen_addr: args.listen.map(|addr| addr.to_string()),
                },
                control: ControlSettings {
                    socket_path: args.socket.clone(),
                },
            },
            Commands::Probe { socket } => Config {
                control: ControlSettings {
                    socket_path: socket.clone(),
                },
                ..Default::default()
            },
        }
    }

    /// Get the path to the user config file.
    pub fn user_path(&self) -> &Path {
        &self.user_path
    }

    /// Load a config file, returning None if it doesn't exist.
    fn load_file(&self, path: &PathBuf) -> Result<Option<Config>, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Config =
                    toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                        path: path.clone(),
                        source: e,
                    })?;
                Ok(Some(config))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::ReadError {
                path: path.clone(),
                source: e,
            }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::ServeArgs;
    use std::time::Duration;
    use tempfile::tempdir;

    fn serve_cli(args: ServeArgs) -> Cli {
        Cli {
            command: Commands::Serve(args),
            config: None,
            verbose: 0,
        }
    }

    #[test]
    fn test_missing_files_use_defaults() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::with_paths(
            dir.path().join("nonexistent_system.toml"),
            dir.path().join("nonexistent_user.toml"),
        );

        let config = loader.load(&serve_cli(ServeArgs::default())).unwrap();
        assert_eq!(config, ConfigLoader::embedded_defaults().unwrap());
        // The embedded file is the first layer, so its level applies.
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.relay.reply_timeout_ms, Some(30_000));
    }

    #[test]
    fn test_user_config_overrides_system() {
        let dir = tempdir().unwrap();

        let system_config = r#"
            [general]
            log_level = "warn"

            [relay]
            reply_timeout_ms = 10000
            self_uninstall = false
        "#;
        let system_path = dir.path().join("system.toml");
        fs::write(&system_path, system_config).unwrap();

        let user_config = r#"
            [relay]
            reply_timeout_ms = 2000
        "#;
        let user_path = dir.path().join("user.toml");
        fs::write(&user_path, user_config).unwrap();

        let loader = ConfigLoader::with_paths(system_path, user_path);
        let config = loader.load(&serve_cli(ServeArgs::default())).unwrap();

        assert_eq!(config.relay.reply_timeout_ms, Some(2000));
        // Not set by the user file, so the system value survives.
        assert_eq!(config.relay.self_uninstall, Some(false));
        assert_eq!(config.general.log_level, "warn");
    }

    #[test]
    fn test_cli_config_file_applied_last() {
        let dir = tempdir().unwrap();
        let user_path = dir.path().join("user.toml");
        fs::write(&user_path, "[proxy]\nlisten_addr = \"127.0.0.1:7000\"\n").unwrap();
        let extra_path = dir.path().join("extra.toml");
        fs::write(&extra_path, "[proxy]\nlisten_addr = \"127.0.0.1:7001\"\n").unwrap();

        let loader = ConfigLoader::with_paths(dir.path().join("system.toml"), user_path);
        let mut cli = serve_cli(ServeArgs::default());
        cli.config = Some(extra_path);

        let config = loader.load(&cli).unwrap();
        assert_eq!(config.listen_addr().unwrap().port(), 7001);
    }

    #[test]
    fn test_missing_cli_config_is_error() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::with_paths(
            dir.path().join("system.toml"),
            dir.path().join("user.toml"),
        );
        let mut cli = serve_cli(ServeArgs::default());
        cli.config = Some(dir.path().join("missing.toml"));

        assert!(matches!(
            loader.load(&cli),
            Err(ConfigError::ReadError { .. })
        ));
    }

    #[test]
    fn test_cli_flags_override_files() {
        let dir = tempdir().unwrap();
        let user_path = dir.path().join("user.toml");
        fs::write(
            &user_path,
            "[relay]\nreply_timeout_ms = 9000\n[control]\nsocket_path = \"/tmp/a.sock\"\n",
        )
        .unwrap();

        let loader = ConfigLoader::with_paths(dir.path().join("system.toml"), user_path);
        let cli = serve_cli(ServeArgs {
            reply_timeout_ms: Some(0),
            socket: Some(PathBuf::from("/tmp/b.sock")),
            no_self_uninstall: true,
            ..Default::default()
        });

        let config = loader.load(&cli).unwrap();
        let relay = config.relay_config();
        assert_eq!(relay.reply_timeout, None);
        assert!(!relay.self_uninstall);
        assert_eq!(config.socket_path(), PathBuf::from("/tmp/b.sock"));
    }

    #[test]
    fn test_unset_flags_do_not_override() {
        let dir = tempdir().unwrap();
        let user_path = dir.path().join("user.toml");
        fs::write(&user_path, "[relay]\nreply_timeout_ms = 1500\n").unwrap();

        let loader = ConfigLoader::with_paths(dir.path().join("system.toml"), user_path);
        let config = loader.load(&serve_cli(ServeArgs::default())).unwrap();

        assert_eq!(
            config.relay_config().reply_timeout,
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_probe_socket_flag() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::with_paths(
            dir.path().join("system.toml"),
            dir.path().join("user.toml"),
        );
        let cli = Cli {
            command: Commands::Probe {
                socket: Some(PathBuf::from("/tmp/probe.sock")),
            },
            config: None,
            verbose: 1,
        };

        let config = loader.load(&cli).unwrap();
        assert_eq!(config.socket_path(), PathBuf::from("/tmp/probe.sock"));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = tempdir().unwrap();
        let user_path = dir.path().join("user.toml");
        fs::write(&user_path, "this is not valid TOML [[[").unwrap();

        let loader = ConfigLoader::with_paths(dir.path().join("system.toml"), user_path);
        let result = loader.load(&serve_cli(ServeArgs::default()));

        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }
}
