//! Conversion between HTTP messages and relay types.
//!
//! Incoming proxied requests become [`InterceptedCall`]s. The call flags a
//! browser would carry natively are recovered from request headers:
//!
//! | Flag | Source |
//! |---|---|
//! | client | `x-relay-client` (removed) |
//! | mode | `sec-fetch-mode` |
//! | destination | `sec-fetch-dest` (`empty` maps to `""`) |
//! | cache | `cache-control`, then `pragma` |
//! | referrer | `referer` |
//! | credentials | `x-relay-credentials` |
//!
//! [`RelayResponse`]s are written back with hop-by-hop and framing headers
//! dropped; hyper recomputes the framing for the buffered body.

use super::error::{ProxyError, ProxyResult};
use crate::relay::{
    CachePolicy, CallFlags, ClientId, CredentialsPolicy, Headers, InterceptedCall, RelayResponse,
    RequestMode,
};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::ext::ReasonPhrase;
use hyper::{Request, Response, StatusCode};
use tracing::{debug, warn};

/// Request header naming the client that issued the call.
pub const CLIENT_HEADER: &str = "x-relay-client";

/// Request header carrying the credentials mode.
pub const CREDENTIALS_HEADER: &str = "x-relay-credentials";

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Capture a proxied request as a call.
///
/// Absolute-form targets are used as-is; origin-form targets are resolved
/// against the `Host` header.
pub async fn capture_call<B>(req: Request<B>) -> ProxyResult<InterceptedCall>
where
    B: Body<Data = Bytes>,
    B::Error: std::fmt::Display,
{
    let (parts, body) = req.into_parts();

    let url = if parts.uri.scheme().is_some() {
        parts.uri.to_string()
    } else {
        let host = parts
            .headers
            .get(hyper::header::HOST)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ProxyError::InvalidRequest("missing host".into()))?;
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!("http://{}{}", host, path)
    };

    let mut headers = Headers::new();
    for (name, value) in parts.headers.iter() {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        match value.to_str() {
            Ok(value) => headers.append(name.as_str(), value),
            Err(_) => debug!("Skipping non-text header {}", name),
        }
    }

    let client_id = headers
        .remove(CLIENT_HEADER)
        .filter(|id| !id.is_empty())
        .map(ClientId::new);
    let flags = flags_from_headers(&headers);

    let body = body
        .collect()
        .await
        .map_err(|e| ProxyError::Body(e.to_string()))?
        .to_bytes();

    let mut call = InterceptedCall::new(parts.method.as_str(), url).with_flags(flags);
    call.headers = headers;
    if !body.is_empty() {
        call = call.with_body(body);
    }
    if let Some(client_id) = client_id {
        call = call.with_client(client_id);
    }

    Ok(call)
}

/// Recover call flags from request headers.
pub fn flags_from_headers(headers: &Headers) -> CallFlags {
    let mode = headers
        .get("sec-fetch-mode")
        .and_then(RequestMode::parse)
        .unwrap_or_default();

    let destination = match headers.get("sec-fetch-dest") {
        Some("empty") | None => String::new(),
        Some(dest) => dest.to_string(),
    };

    let credentials = headers
        .get(CREDENTIALS_HEADER)
        .and_then(CredentialsPolicy::parse)
        .unwrap_or_default();

    CallFlags {
        cache: cache_policy(headers),
        mode,
        credentials,
        destination,
        referrer: headers.get("referer").unwrap_or_default().to_string(),
        ..CallFlags::default()
    }
}

fn cache_policy(headers: &Headers) -> CachePolicy {
    if let Some(cache_control) = headers.get("cache-control") {
        let directives: Vec<String> = cache_control
            .split(',')
            .map(|d| d.trim().to_ascii_lowercase())
            .collect();
        let has = |name: &str| directives.iter().any(|d| d == name);

        if has("only-if-cached") {
            return CachePolicy::OnlyIfCached;
        }
        if has("no-store") {
            return CachePolicy::NoStore;
        }
        if has("no-cache") {
            return CachePolicy::NoCache;
        }
        if has("max-age=0") {
            return CachePolicy::Reload;
        }
    }

    match headers.get("pragma") {
        Some(pragma) if pragma.eq_ignore_ascii_case("no-cache") => CachePolicy::NoCache,
        _ => CachePolicy::Default,
    }
}

/// Build the HTTP response for a relay result.
pub fn into_http_response(relayed: RelayResponse) -> ProxyResult<Response<Full<Bytes>>> {
    let status = StatusCode::from_u16(relayed.status)
        .map_err(|_| ProxyError::InvalidResponse(format!("status {}", relayed.status)))?;

    let mut builder = Response::builder().status(status);
    for (name, value) in relayed.headers.iter() {
        if HOP_BY_HOP.contains(&name) || name == "content-length" {
            continue;
        }
        builder = builder.header(name, value);
    }

    let custom_reason = relayed
        .status_text
        .filter(|text| Some(text.as_str()) != status.canonical_reason() && !text.is_empty());
    if let Some(text) = custom_reason {
        match ReasonPhrase::try_from(text) {
            Ok(reason) => builder = builder.extension(reason),
            Err(_) => warn!("Dropping invalid status text for {}", status),
        }
    }

    builder
        .body(Full::new(relayed.body))
        .map_err(|e| ProxyError::InvalidResponse(e.to_string()))
}

/// A plain-text error response.
pub fn error_response(status: StatusCode, message: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain"),
    );
    response
}
