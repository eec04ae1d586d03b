//! Telemetry and audit logging for fetch-relay.
//!
//! - **Audit logging** (syslog): one JSON record per relay decision
//! - **Debug logging** (tracing): development logs on stderr
//!
//! Events are logged as JSON with an ISO8601 timestamp:
//!
//! ```json
//! {"ts":"2026-10-17T09:12:44Z","event":"call_mocked","method":"GET","url":"http://farm.test/api/alerts","status":200}
//! ```

mod error;
mod events;
mod syslog;

pub use error::TelemetryError;
pub use events::{AuditEvent, PassthroughReason, UninstallReason};
pub use syslog::{AuditLogger, SYSLOG_TAG};
