//! Message types exchanged between the relay and its clients.
//!
//! Messages are JSON objects tagged by `type`, with an optional `payload`:
//!
//! ```json
//! {"type":"MOCK_ACTIVATE"}
//! {"type":"MOCKING_ENABLED","payload":true}
//! {"type":"PASSTHROUGH","payload":{"id":"6f2c..."}}
//! ```
//!
//! # Message Flow
//!
//! ```text
//! ┌─────────────────┐    RelayToClient    ┌─────────────────┐
//! │                 │────────────────────>│                 │
//! │      Relay      │                     │     Client      │
//! │                 │<────────────────────│                 │
//! └─────────────────┘    ClientToRelay    └─────────────────┘
//! ```

use crate::relay::call::{
    CachePolicy, ClientId, CredentialsPolicy, Headers, InterceptedCall, RedirectMode, RequestMode,
};
use crate::relay::pending::{MockedResponse, Reply};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Build identifier answered to integrity probes.
///
/// Controllers compare it verbatim to decide whether they speak the same
/// protocol revision as the relay.
pub const INTEGRITY_CHECKSUM: &str = "5db6a1c0e4f83b27";

/// A call serialized for delivery to its client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardedRequest {
    /// Correlation id the reply must carry.
    pub id: Uuid,
    /// Target URL.
    pub url: String,
    /// HTTP method.
    pub method: String,
    /// Request headers.
    pub headers: Headers,
    /// Cache policy.
    pub cache: CachePolicy,
    /// Request mode.
    pub mode: RequestMode,
    /// Credentials policy.
    pub credentials: CredentialsPolicy,
    /// Request destination.
    pub destination: String,
    /// Integrity metadata.
    pub integrity: String,
    /// Redirect mode.
    pub redirect: RedirectMode,
    /// Referrer.
    pub referrer: String,
    /// Referrer policy.
    pub referrer_policy: String,
    /// Body as text.
    pub body: String,
    /// Keepalive flag.
    pub keepalive: bool,
}

impl ForwardedRequest {
    /// Serialize `call` under correlation id `id`.
    pub fn from_call(id: Uuid, call: &InterceptedCall) -> Self {
        Self {
            id,
            url: call.url.clone(),
            method: call.method.clone(),
            headers: call.headers.clone(),
            cache: call.flags.cache,
            mode: call.flags.mode,
            credentials: call.flags.credentials,
            destination: call.flags.destination.clone(),
            integrity: call.flags.integrity.clone(),
            redirect: call.flags.redirect,
            referrer: call.flags.referrer.clone(),
            referrer_policy: call.flags.referrer_policy.clone(),
            body: call.body_text(),
            keepalive: call.flags.keepalive,
        }
    }
}

/// Payload of `MOCK_RESPONSE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockResponsePayload {
    /// Correlation id of the call.
    pub id: Uuid,
    /// The substitute response.
    #[serde(flatten)]
    pub response: MockedResponse,
}

/// Payload of `PASSTHROUGH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassthroughPayload {
    /// Correlation id of the call.
    pub id: Uuid,
}

/// Payload of `NETWORK_ERROR`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkErrorPayload {
    /// Correlation id of the call.
    pub id: Uuid,
    /// Human-readable reason.
    #[serde(default)]
    pub message: String,
}

/// A call reply that named its call but could not be decoded.
///
/// Never sent on the wire; the socket transport builds it from a frame
/// that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedReplyPayload {
    /// Correlation id of the call.
    pub id: Uuid,
    /// Decode error.
    pub reason: String,
}

/// Messages sent from a client to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientToRelay {
    /// Liveness probe.
    KeepaliveRequest,
    /// Ask for the relay build checksum.
    IntegrityCheckRequest,
    /// Enable mocking for this client.
    MockActivate,
    /// Disable mocking for this client.
    MockDeactivate,
    /// The client is going away.
    ClientClosed,
    /// Answer a forwarded call with a substitute response.
    MockResponse(MockResponsePayload),
    /// Answer a forwarded call with "use the real network".
    Passthrough(PassthroughPayload),
    /// Answer a forwarded call with a simulated network failure.
    NetworkError(NetworkErrorPayload),
    /// A call reply that arrived undecodable.
    #[serde(skip)]
    MalformedReply(MalformedReplyPayload),
}

impl ClientToRelay {
    /// Split a call reply into its correlation id and [`Reply`].
    ///
    /// Returns `None` for control messages.
    pub fn into_reply(self) -> Option<(Uuid, Reply)> {
        match self {
            ClientToRelay::MockResponse(p) => Some((p.id, Reply::Mock(p.response))),
            ClientToRelay::Passthrough(p) => Some((p.id, Reply::Passthrough)),
            ClientToRelay::NetworkError(p) => Some((
                p.id,
                Reply::NetworkError {
                    message: p.message,
                },
            )),
            ClientToRelay::MalformedReply(p) => Some((p.id, Reply::Invalid { reason: p.reason })),
            _ => None,
        }
    }

    /// Recover the call a reply frame was meant for when the frame itself
    /// does not decode.
    ///
    /// Returns `None` unless the frame is a JSON object whose `type` is a
    /// call reply and whose `payload.id` is a UUID.
    pub fn malformed_reply(raw: &[u8], reason: impl Into<String>) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_slice(raw).ok()?;
        match value.get("type")?.as_str()? {
            "MOCK_RESPONSE" | "PASSTHROUGH" | "NETWORK_ERROR" => {}
            _ => return None,
        }
        let id = value.get("payload")?.get("id")?.as_str()?.parse().ok()?;
        Some(ClientToRelay::MalformedReply(MalformedReplyPayload {
            id,
            reason: reason.into(),
        }))
    }
}

/// Messages sent from the relay to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayToClient {
    /// Identifier assigned to a socket client on connect.
    ClientId(ClientId),
    /// Answer to a liveness probe.
    KeepaliveResponse,
    /// Answer to an integrity probe.
    IntegrityCheckResponse(String),
    /// Acknowledges `MOCK_ACTIVATE`; always `true`.
    MockingEnabled(bool),
    /// A call the client may answer.
    Request(ForwardedRequest),
}

/// A client message tagged with its sender.
#[derive(Debug, Clone)]
pub struct ClientEnvelope {
    /// Sending client.
    pub client_id: ClientId,
    /// The message.
    pub message: ClientToRelay,
}

impl ClientEnvelope {
    /// Tag `message` as coming from `client_id`.
    pub fn new(client_id: ClientId, message: ClientToRelay) -> Self {
        Self { client_id, message }
    }
}
