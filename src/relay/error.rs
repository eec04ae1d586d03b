//! Error types for relay operations.
//!
//! - Simulated network failures requested by a client
//! - Control-plane failures (client unreachable, reply channel broken)
//! - Upstream (real network) failures during pass-through

use super::call::ClientId;
use thiserror::Error;

/// Errors from the real network.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The call could not be turned into a valid HTTP request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Connecting or exchanging data with the server failed.
    #[error("Upstream request failed: {0}")]
    Request(String),

    /// Reading the response body failed.
    #[error("Failed to read upstream body: {0}")]
    Body(String),
}

/// Errors from intercepting a call.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The client asked for this call to fail like an unreachable network.
    #[error("Network error emulated by client: {0}")]
    NetworkError(String),

    /// The owning client's channel is closed.
    #[error("Failed to deliver call to client {0}")]
    ClientUnavailable(ClientId),

    /// The client's reply cannot be turned into a response.
    #[error("Invalid reply: {0}")]
    InvalidReply(String),

    /// Pass-through to the real network failed.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl RelayError {
    /// Whether this is a deliberate, client-requested network failure.
    pub fn is_network_error(&self) -> bool {
        matches!(self, RelayError::NetworkError(_))
    }
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_error_is_distinguishable() {
        assert!(RelayError::NetworkError("offline".into()).is_network_error());
        assert!(!RelayError::ClientUnavailable(ClientId::new("tab-1")).is_network_error());
    }

    #[test]
    fn test_upstream_conversion() {
        let err: RelayError = UpstreamError::Request("connection refused".into()).into();
        assert!(matches!(err, RelayError::Upstream(_)));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_client_unavailable_display() {
        let err = RelayError::ClientUnavailable(ClientId::new("tab-9"));
        assert!(err.to_string().contains("tab-9"));
    }
}
