//! fetch-relay: request-interception relay
//!
//! Outbound HTTP calls from an application are routed through the relay.
//! For each qualifying call the relay asks the client context that issued it
//! whether to answer with a mocked response, let the call reach the real
//! network, or fail it like an unreachable network.
//!
//! # Architecture
//!
//! - **Relay**: interception state machine, client registry, correlation table
//! - **Control**: tagged message protocol, in-process and Unix socket transports
//! - **Proxy**: HTTP/1.1 front that feeds application traffic into the relay
//! - **Config**: hierarchical TOML configuration
//! - **Telemetry**: structured syslog records for relay decisions

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cli;
pub mod cli_handler;
pub mod config;
pub mod control;
pub mod proxy;
pub mod relay;
pub mod telemetry;
