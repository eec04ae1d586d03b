//! Captured outbound calls and the responses produced for them.
//!
//! An [`InterceptedCall`] is a snapshot of an outbound HTTP request taken the
//! moment the application issues it. It never changes after capture: the
//! relay either forwards a serialized copy to the owning client, or hands the
//! call to the [`Upstream`](super::upstream::Upstream) untouched.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Header used by clients to tag requests with relay bookkeeping.
///
/// It is the only header removed before a pass-through fallback.
pub const INTENTION_HEADER: &str = "x-relay-intention";

/// Header stamped on responses that went through an active client.
pub const MARKER_HEADER: &str = "x-powered-by";

/// Value of [`MARKER_HEADER`].
pub const MARKER_VALUE: &str = "fetch-relay";

/// Identifier of a client context (the analog of a browser tab).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Case-insensitive header map.
///
/// Names are stored lowercased. Repeated values for the same name are joined
/// with `", "`, which is how they appear when serialized for a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any previous value.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Add a value, joining it onto an existing one.
    pub fn append(&mut self, name: &str, value: &str) {
        self.0
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    /// Look up a header by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Remove a header, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    /// Whether a header is present.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    /// Iterate over `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Headers {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

/// Request mode, as in the Fetch standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    /// Top-level page navigation.
    Navigate,
    /// Same-origin only.
    SameOrigin,
    /// Opaque cross-origin request.
    NoCors,
    /// Regular cross-origin request.
    #[default]
    Cors,
    /// WebSocket handshake.
    Websocket,
}

impl RequestMode {
    /// Parse a `Sec-Fetch-Mode` style value. Unknown values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "navigate" => Some(Self::Navigate),
            "same-origin" => Some(Self::SameOrigin),
            "no-cors" => Some(Self::NoCors),
            "cors" => Some(Self::Cors),
            "websocket" => Some(Self::Websocket),
            _ => None,
        }
    }
}

/// Cache mode of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Normal HTTP cache semantics.
    #[default]
    Default,
    /// Bypass the cache entirely.
    NoStore,
    /// Fetch from network and update the cache.
    Reload,
    /// Revalidate cached entries.
    NoCache,
    /// Use any cached entry, stale or not.
    ForceCache,
    /// Only answer from cache.
    OnlyIfCached,
}

/// Credentials mode of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialsPolicy {
    /// Never send credentials.
    Omit,
    /// Send credentials to the same origin only.
    #[default]
    SameOrigin,
    /// Always send credentials.
    Include,
}

impl CredentialsPolicy {
    /// Parse a credentials mode name. Unknown values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "omit" => Some(Self::Omit),
            "same-origin" => Some(Self::SameOrigin),
            "include" => Some(Self::Include),
            _ => None,
        }
    }
}

/// Redirect handling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RedirectMode {
    /// Follow redirects.
    #[default]
    Follow,
    /// Treat a redirect as an error.
    Error,
    /// Return the redirect response as-is.
    Manual,
}

/// Behavioral flags captured alongside a call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallFlags {
    /// Cache policy.
    pub cache: CachePolicy,
    /// Request mode.
    pub mode: RequestMode,
    /// Credentials policy.
    pub credentials: CredentialsPolicy,
    /// Request destination (`""`, `document`, `image`, ...).
    pub destination: String,
    /// Subresource integrity metadata.
    pub integrity: String,
    /// Redirect mode.
    pub redirect: RedirectMode,
    /// Referrer URL, empty when none.
    pub referrer: String,
    /// Referrer policy, empty when none.
    pub referrer_policy: String,
    /// Whether the request may outlive the page.
    pub keepalive: bool,
}

/// An outbound call captured before it reaches the network.
#[derive(Debug, Clone)]
pub struct InterceptedCall {
    /// HTTP method, uppercase.
    pub method: String,
    /// Absolute target URL.
    pub url: String,
    /// Request headers.
    pub headers: Headers,
    /// Request body, if any.
    pub body: Option<Bytes>,
    /// Behavioral flags.
    pub flags: CallFlags,
    /// Client that issued the call, when known.
    pub client_id: Option<ClientId>,
}

impl InterceptedCall {
    /// Create a body-less call with default flags.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            url: url.into(),
            headers: Headers::new(),
            body: None,
            flags: CallFlags::default(),
            client_id: None,
        }
    }

    /// Attach the issuing client.
    pub fn with_client(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    /// Set a header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Replace the flags.
    pub fn with_flags(mut self, flags: CallFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Whether this call must never be routed through the relay.
    ///
    /// Navigation loads are excluded, as are `only-if-cached` calls outside
    /// `same-origin` mode (such calls cannot be fulfilled by a fetch anyway).
    pub fn is_excluded(&self) -> bool {
        if self.flags.mode == RequestMode::Navigate {
            return true;
        }
        self.flags.cache == CachePolicy::OnlyIfCached
            && self.flags.mode != RequestMode::SameOrigin
    }

    /// Body decoded as text. Invalid UTF-8 is replaced.
    pub fn body_text(&self) -> String {
        self.body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }

    /// Copy of this call with the relay intention header removed.
    pub fn without_intention(&self) -> Self {
        let mut call = self.clone();
        call.headers.remove(INTENTION_HEADER);
        call
    }
}

/// Where a [`RelayResponse`] came from. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    /// Supplied by a client.
    Mocked,
    /// Produced by the real network.
    Network,
}

/// The response returned to the original caller.
#[derive(Debug, Clone)]
pub struct RelayResponse {
    /// HTTP status code.
    pub status: u16,
    /// Reason phrase, if the producer supplied one.
    pub status_text: Option<String>,
    /// Response headers.
    pub headers: Headers,
    /// Response body.
    pub body: Bytes,
    /// Producer of the response.
    pub source: ResponseSource,
}

impl RelayResponse {
    /// Build a response produced by the network.
    pub fn network(status: u16, headers: Headers, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            status_text: None,
            headers,
            body: body.into(),
            source: ResponseSource::Network,
        }
    }

    /// Whether the relay marker header is present.
    pub fn is_stamped(&self) -> bool {
        self.headers.get(MARKER_HEADER) == Some(MARKER_VALUE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "application/json");

        assert_eq!(headers.get("content-type"), Some("application/json"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
        assert!(headers.contains("Content-type"));
    }

    #[test]
    fn test_headers_append_joins_values() {
        let headers: Headers = [("Accept", "text/html"), ("accept", "application/json")]
            .into_iter()
            .collect();

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("accept"), Some("text/html, application/json"));
    }

    #[test]
    fn test_navigation_is_excluded() {
        let call = InterceptedCall::new("GET", "http://farm.test/").with_flags(CallFlags {
            mode: RequestMode::Navigate,
            ..Default::default()
        });
        assert!(call.is_excluded());
    }

    #[test]
    fn test_only_if_cached_exclusion_depends_on_mode() {
        let cross_origin = InterceptedCall::new("GET", "http://farm.test/a").with_flags(CallFlags {
            cache: CachePolicy::OnlyIfCached,
            mode: RequestMode::Cors,
            ..Default::default()
        });
        assert!(cross_origin.is_excluded());

        let same_origin = InterceptedCall::new("GET", "http://farm.test/a").with_flags(CallFlags {
            cache: CachePolicy::OnlyIfCached,
            mode: RequestMode::SameOrigin,
            ..Default::default()
        });
        assert!(!same_origin.is_excluded());
    }

    #[test]
    fn test_plain_call_not_excluded() {
        let call = InterceptedCall::new("post", "http://farm.test/api/login");
        assert_eq!(call.method, "POST");
        assert!(!call.is_excluded());
    }

    #[test]
    fn test_without_intention_strips_only_that_header() {
        let call = InterceptedCall::new("GET", "http://farm.test/api/weather")
            .with_header("X-Relay-Intention", "bypass")
            .with_header("Authorization", "Bearer mock-token")
            .with_header("Accept", "*/*");

        let stripped = call.without_intention();
        assert!(!stripped.headers.contains(INTENTION_HEADER));
        assert_eq!(stripped.headers.len(), 2);
        assert_eq!(stripped.headers.get("authorization"), Some("Bearer mock-token"));

        // The original capture is untouched.
        assert!(call.headers.contains(INTENTION_HEADER));
    }

    #[test]
    fn test_body_text_lossy() {
        let call = InterceptedCall::new("POST", "http://farm.test/")
            .with_body(Bytes::from_static(b"{\"otp\":\"123456\"}"));
        assert_eq!(call.body_text(), "{\"otp\":\"123456\"}");

        let empty = InterceptedCall::new("GET", "http://farm.test/");
        assert_eq!(empty.body_text(), "");
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(RequestMode::parse("navigate"), Some(RequestMode::Navigate));
        assert_eq!(RequestMode::parse(" Same-Origin "), Some(RequestMode::SameOrigin));
        assert_eq!(RequestMode::parse("bogus"), None);
    }
}
