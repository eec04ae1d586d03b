//! HTTP front for the relay.
//!
//! Applications send their outbound HTTP calls here, either as an HTTP proxy
//! (absolute-form targets) or directly (origin-form targets plus `Host`).
//! Each request is captured as an [`InterceptedCall`](crate::relay::InterceptedCall),
//! run through the relay, and answered with whatever the relay produced.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐   HTTP/1.1   ┌──────────────┐   REQUEST    ┌──────────┐
//! │ Application │─────────────►│  HTTP front  │─────────────►│  Client  │
//! └─────────────┘              │   + Relay    │◄─────────────│          │
//!                              └──────┬───────┘    reply     └──────────┘
//!                                     │ pass-through
//!                                     ▼
//!                              ┌──────────────┐
//!                              │   Network    │
//!                              └──────────────┘
//! ```

pub mod convert;
pub mod error;
pub mod server;

pub use convert::{CLIENT_HEADER, CREDENTIALS_HEADER, capture_call, into_http_response};
pub use error::{ProxyError, ProxyResult};
pub use server::ProxyServer;
