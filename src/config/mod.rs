//! Configuration system for fetch-relay.
//!
//! TOML configuration loading with hierarchy merging.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. System config: `/etc/fetch-relay/config.toml`
//! 2. User config: `~/.config/fetch-relay/config.toml`
//! 3. Additional config file (via `--config` flag)
//! 4. CLI flags (highest priority)
//!
//! No file is required; every setting has a default.
//!
//! ```toml
//! [relay]
//! reply_timeout_ms = 5000
//!
//! [proxy]
//! listen_addr = "127.0.0.1:8080"
//! ```

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{
    Config, ControlSettings, DEFAULT_LISTEN_ADDR, DEFAULT_SOCKET_NAME, GeneralSettings,
    ProxySettings, RelaySettings,
};
