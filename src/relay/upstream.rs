//! The real network, as seen by the relay.
//!
//! Pass-through calls and bypassed calls are handed to an [`Upstream`]. The
//! production implementation is [`HyperUpstream`]; tests substitute a
//! recording fake.

use super::call::{Headers, InterceptedCall, RelayResponse};
use super::error::UpstreamError;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

/// Performs calls against the real network.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Perform the call and return the server's response.
    async fn fetch(&self, call: &InterceptedCall) -> Result<RelayResponse, UpstreamError>;
}

/// Plain-HTTP upstream backed by the hyper-util client.
pub struct HyperUpstream {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HyperUpstream {
    /// Create an upstream with a fresh connection pool.
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self { client }
    }
}

impl Default for HyperUpstream {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a hyper request from a captured call.
pub fn build_request(call: &InterceptedCall) -> Result<Request<Full<Bytes>>, UpstreamError> {
    let method = Method::from_bytes(call.method.as_bytes())
        .map_err(|e| UpstreamError::InvalidRequest(format!("method {}: {}", call.method, e)))?;

    let mut builder = Request::builder().method(method).uri(call.url.as_str());
    for (name, value) in call.headers.iter() {
        builder = builder.header(name, value);
    }

    let body = call.body.clone().unwrap_or_default();
    builder
        .body(Full::new(body))
        .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))
}

#[async_trait]
impl Upstream for HyperUpstream {
    async fn fetch(&self, call: &InterceptedCall) -> Result<RelayResponse, UpstreamError> {
        let request = build_request(call)?;
        debug!("Upstream {} {}", call.method, call.url);

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| UpstreamError::Request(e.to_string()))?;

        let (parts, body) = response.into_parts();
        let mut headers = Headers::new();
        for (name, value) in parts.headers.iter() {
            if let Ok(value) = value.to_str() {
                headers.append(name.as_str(), value);
            }
        }

        let body = body
            .collect()
            .await
            .map_err(|e| UpstreamError::Body(e.to_string()))?
            .to_bytes();

        let mut relayed = RelayResponse::network(parts.status.as_u16(), headers, body);
        relayed.status_text = parts.status.canonical_reason().map(str::to_string);
        Ok(relayed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_copies_call() {
        let call = InterceptedCall::new("POST", "http://farm.test/api/auth/login")
            .with_header("Content-Type", "application/json")
            .with_body(Bytes::from_static(b"{\"phone\":\"+919000011111\"}"));

        let request = build_request(&call).unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri(), "http://farm.test/api/auth/login");
        assert_eq!(
            request.headers().get("content-type").unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_build_request_rejects_bad_method() {
        let call = InterceptedCall::new("GE T", "http://farm.test/");
        assert!(matches!(
            build_request(&call),
            Err(UpstreamError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_build_request_rejects_bad_uri() {
        let call = InterceptedCall::new("GET", "http://bad host/");
        assert!(build_request(&call).is_err());
    }
}
