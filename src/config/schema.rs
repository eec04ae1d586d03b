//! Configuration schema definitions.
//!
//! This module defines the structure of the fetch-relay configuration files.
//! Every field is optional; unset values fall back to the defaults exposed
//! by the accessor methods on [`Config`].

use super::error::ConfigError;
use crate::relay::{DEFAULT_REPLY_TIMEOUT, RelayConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default address of the HTTP front.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// File name of the control socket in the runtime directory.
pub const DEFAULT_SOCKET_NAME: &str = "fetch-relay.sock";

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralSettings,

    /// Interception behavior.
    #[serde(default)]
    pub relay: RelaySettings,

    /// HTTP front settings.
    #[serde(default)]
    pub proxy: ProxySettings,

    /// Control socket settings.
    #[serde(default)]
    pub control: ControlSettings,
}

impl Config {
    /// Merge another config into this one.
    ///
    /// Scalars set in `other` override those in `self`.
    pub fn merge(&mut self, other: Config) {
        self.general.merge(other.general);
        self.relay.merge(other.relay);
        self.proxy.merge(other.proxy);
        self.control.merge(other.control);
    }

    /// Relay settings with defaults applied.
    ///
    /// A reply timeout of 0 means wait indefinitely.
    pub fn relay_config(&self) -> RelayConfig {
        let reply_timeout = match self.relay.reply_timeout_ms {
            None => Some(DEFAULT_REPLY_TIMEOUT),
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
        };

        RelayConfig {
            reply_timeout,
            self_uninstall: self.relay.self_uninstall.unwrap_or(true),
            ..RelayConfig::default()
        }
    }

    /// Address of the HTTP front.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = self
            .proxy
            .listen_addr
            .as_deref()
            .unwrap_or(DEFAULT_LISTEN_ADDR);

        raw.parse().map_err(|e| ConfigError::InvalidValue {
            field: "proxy.listen_addr".to_string(),
            message: format!("{}: {}", raw, e),
        })
    }

    /// Path of the control socket.
    ///
    /// Defaults to the user runtime directory, or the temp directory when
    /// there is none.
    pub fn socket_path(&self) -> PathBuf {
        self.control.socket_path.clone().unwrap_or_else(|| {
            dirs::runtime_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(DEFAULT_SOCKET_NAME)
        })
    }

    /// Whether audit events go to syslog.
    pub fn audit_syslog(&self) -> bool {
        self.general.audit_syslog.unwrap_or(false)
    }
}

/// General application settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct GeneralSettings {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub log_level: String,

    /// Send audit events to syslog.
    #[serde(default)]
    pub audit_syslog: Option<bool>,
}

impl GeneralSettings {
    fn merge(&mut self, other: GeneralSettings) {
        if !other.log_level.is_empty() {
            self.log_level = other.log_level;
        }
        if other.audit_syslog.is_some() {
            self.audit_syslog = other.audit_syslog;
        }
    }
}

/// Interception behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RelaySettings {
    /// How long to wait for a client reply, in milliseconds. 0 = no limit.
    #[serde(default)]
    pub reply_timeout_ms: Option<u64>,

    /// Stop intercepting once the last client disconnects.
    #[serde(default)]
    pub self_uninstall: Option<bool>,
}

impl RelaySettings {
    fn merge(&mut self, other: RelaySettings) {
        if other.reply_timeout_ms.is_some() {
            self.reply_timeout_ms = other.reply_timeout_ms;
        }
        if other.self_uninstall.is_some() {
            self.self_uninstall = other.self_uninstall;
        }
    }
}

/// HTTP front settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxySettings {
    /// Address to listen on, e.g. `127.0.0.1:8080`.
    #[serde(default)]
    pub listen_addr: Option<String>,
}

impl ProxySettings {
    fn merge(&mut self, other: ProxySettings) {
        if other.listen_addr.is_some() {
            self.listen_addr = other.listen_addr;
        }
    }
}

/// Control socket settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ControlSettings {
    /// Path of the Unix socket clients connect to.
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
}

impl ControlSettings {
    fn merge(&mut self, other: ControlSettings) {
        if other.socket_path.is_some() {
            self.socket_path = other.socket_path;
        }
    }
}
