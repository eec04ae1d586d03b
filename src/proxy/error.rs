//! Error types for the HTTP front.
//!
//! - Server errors (binding, accept, connection serving)
//! - Request capture errors
//! - Relay errors surfaced to the caller

use crate::relay::RelayError;
use thiserror::Error;

/// Unified error type for HTTP front operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// I/O error (socket operations).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Hyper HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// The request cannot be captured as a call.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Reading the request body failed.
    #[error("Failed to read request body: {0}")]
    Body(String),

    /// The relay produced a response that cannot be written.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Intercepting the call failed.
    #[error(transparent)]
    Relay(#[from] RelayError),
}

/// Result type for HTTP front operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

impl ProxyError {
    /// Whether the client asked for this call to fail like a dead network.
    pub fn is_network_error(&self) -> bool {
        matches!(self, ProxyError::Relay(e) if e.is_network_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_error_display() {
        let err = ProxyError::InvalidRequest("missing host".to_string());
        assert!(err.to_string().contains("missing host"));
    }

    #[test]
    fn test_relay_error_is_transparent() {
        let err: ProxyError = RelayError::NetworkError("offline".into()).into();
        assert!(err.is_network_error());
        assert!(err.to_string().contains("offline"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let proxy_err: ProxyError = io_err.into();
        assert!(matches!(proxy_err, ProxyError::Io(_)));
        assert!(!proxy_err.is_network_error());
    }
}
