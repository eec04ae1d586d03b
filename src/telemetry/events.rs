//! Audit event types for structured logging.
//!
//! These events are logged to syslog with the `FETCH_RELAY` tag so a test
//! run can be reconstructed afterwards: which calls were mocked, which went
//! to the network, and why.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Audit events for relay activity.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// The relay started intercepting.
    RelayInstalled,

    /// The relay stopped intercepting.
    RelayUninstalled {
        /// Why it stopped.
        reason: UninstallReason,
    },

    /// A client enabled mocking.
    ClientActivated {
        /// Client identifier.
        client_id: String,
    },

    /// A client disabled mocking.
    ClientDeactivated {
        /// Client identifier.
        client_id: String,
    },

    /// A client disconnected.
    ClientClosed {
        /// Client identifier.
        client_id: String,
        /// Clients still connected.
        remaining: usize,
        /// Calls that were waiting on this client.
        released_calls: usize,
    },

    /// A call was answered by a client.
    CallMocked {
        /// HTTP method.
        method: String,
        /// Target URL.
        url: String,
        /// Status of the substitute response.
        status: u16,
    },

    /// A call went to the real network.
    CallPassthrough {
        /// HTTP method.
        method: String,
        /// Target URL.
        url: String,
        /// Why the call was not mocked.
        reason: PassthroughReason,
    },

    /// A client asked for a call to fail as if offline.
    NetworkErrorEmulated {
        /// HTTP method.
        method: String,
        /// Target URL.
        url: String,
    },

    /// A call was abandoned because the relay could not complete it.
    CallFailed {
        /// HTTP method.
        method: String,
        /// Target URL.
        url: String,
        /// Error description.
        error: String,
    },
}

/// Reasons for the relay to stop intercepting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UninstallReason {
    /// The last client disconnected.
    LastClientClosed,
    /// The relay was shut down.
    Shutdown,
    /// Requested explicitly.
    Manual,
}

/// Reasons a call reached the real network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassthroughReason {
    /// The relay is not installed.
    NotInstalled,
    /// Navigation or cache-only call.
    Excluded,
    /// No client has mocking enabled.
    NoActiveClients,
    /// The call names no client, or an unknown one.
    ClientNotFound,
    /// The client declined to mock.
    ClientDeclined,
    /// The client did not answer in time.
    ReplyTimeout,
    /// The client disconnected before answering.
    ClientGone,
}

/// Wrapper for serializing events with timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent<'a> {
    /// ISO8601 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// The actual event (flattened into this struct).
    #[serde(flatten)]
    pub event: &'a AuditEvent,
}

impl AuditEvent {
    /// Wrap this event with a timestamp for serialization.
    pub fn with_timestamp(&self) -> TimestampedEvent<'_> {
        TimestampedEvent {
            timestamp: Utc::now(),
            event: self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_installed_serialization() {
        let event = AuditEvent::RelayInstalled;
        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"relay_installed\""));
        assert!(json.contains("\"ts\""));
    }

    #[test]
    fn test_call_mocked_serialization() {
        let event = AuditEvent::CallMocked {
            method: "GET".to_string(),
            url: "http://farm.test/api/weather".to_string(),
            status: 200,
        };
        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"call_mocked\""));
        assert!(json.contains("\"url\":\"http://farm.test/api/weather\""));
        assert!(json.contains("\"status\":200"));
    }

    #[test]
    fn test_call_passthrough_serialization() {
        let event = AuditEvent::CallPassthrough {
            method: "POST".to_string(),
            url: "http://farm.test/api/auth/login".to_string(),
            reason: PassthroughReason::ReplyTimeout,
        };
        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"call_passthrough\""));
        assert!(json.contains("\"reason\":\"reply_timeout\""));
    }

    #[test]
    fn test_client_closed_serialization() {
        let event = AuditEvent::ClientClosed {
            client_id: "tab-1".to_string(),
            remaining: 0,
            released_calls: 2,
        };
        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"client_closed\""));
        assert!(json.contains("\"remaining\":0"));
        assert!(json.contains("\"released_calls\":2"));
    }

    #[test]
    fn test_uninstall_serialization() {
        let event = AuditEvent::RelayUninstalled {
            reason: UninstallReason::LastClientClosed,
        };
        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"reason\":\"last_client_closed\""));
    }
}
