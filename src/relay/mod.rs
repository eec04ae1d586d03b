//! Request-interception relay.
//!
//! The relay sits between an application's outbound HTTP calls and the real
//! network. For each call it asks the client that issued it whether to
//! answer with a substitute response:
//!
//! - **Call**: captured request data and its behavioral flags
//! - **Registry**: connected clients and which of them enabled mocking
//! - **Pending**: correlation table pairing replies with waiting calls
//! - **Upstream**: the real network, used for bypass and pass-through
//! - **Service**: the [`Relay`] state machine tying these together
//!
//! # Example
//!
//! ```ignore
//! use fetch_relay::relay::{ClientRegistry, HyperUpstream, Relay, RelayConfig};
//! use fetch_relay::telemetry::AuditLogger;
//! use std::sync::Arc;
//!
//! let relay = Relay::new(
//!     RelayConfig::default(),
//!     Arc::new(ClientRegistry::new()),
//!     Arc::new(HyperUpstream::new()),
//!     Arc::new(AuditLogger::new_null()),
//! );
//! relay.install();
//! let response = relay.intercept(call).await?;
//! ```

pub mod call;
pub mod error;
pub mod pending;
pub mod registry;
pub mod service;
pub mod upstream;

pub use call::{
    CachePolicy, CallFlags, ClientId, CredentialsPolicy, Headers, InterceptedCall, RedirectMode,
    RelayResponse, RequestMode, ResponseSource, INTENTION_HEADER, MARKER_HEADER, MARKER_VALUE,
};
pub use error::{RelayError, RelayResult, UpstreamError};
pub use pending::{MockedResponse, PendingError, PendingInfo, PendingReplies, Reply};
pub use registry::{ClientInfo, ClientRegistry};
pub use service::{DEFAULT_REPLY_TIMEOUT, Relay, RelayConfig};
pub use upstream::{HyperUpstream, Upstream};
