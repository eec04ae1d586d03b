//! Command-line interface definitions for fetch-relay.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Request-interception relay.
///
/// fetch-relay sits between an application and the network. Clients connect
/// over a Unix socket, enable mocking, and answer each forwarded call with a
/// mocked response, a pass-through, or a simulated network failure.
#[derive(Parser, Debug)]
#[command(name = "fetch-relay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to additional config file.
    ///
    /// This config file is merged on top of system and user configs,
    /// giving it the highest priority (except for CLI flags).
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Subcommands for fetch-relay.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the relay with its HTTP front and control socket.
    Serve(ServeArgs),

    /// Connect to a running relay and check that it answers.
    ///
    /// Sends a keepalive and an integrity probe, then prints the results.
    Probe {
        /// Control socket of the relay.
        #[arg(long = "socket", value_name = "PATH")]
        socket: Option<PathBuf>,
    },
}

/// Options for `serve`.
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Address for the HTTP front.
    #[arg(long = "listen", value_name = "ADDR")]
    pub listen: Option<SocketAddr>,

    /// Path of the control socket.
    #[arg(long = "socket", value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// How long to wait for a client reply, in milliseconds. 0 waits forever.
    #[arg(long = "reply-timeout-ms", value_name = "MS")]
    pub reply_timeout_ms: Option<u64>,

    /// Keep intercepting after the last client disconnects.
    #[arg(long = "no-self-uninstall")]
    pub no_self_uninstall: bool,

    /// Send audit events to syslog.
    #[arg(long = "syslog")]
    pub syslog: bool,
}
