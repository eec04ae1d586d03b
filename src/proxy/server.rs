//! HTTP front server.
//!
//! Accepts proxied HTTP/1.1 requests over TCP, runs each through
//! [`Relay::intercept`], and writes the result back. Each connection is
//! handled in a separate Tokio task.
//!
//! # Example
//!
//! ```ignore
//! use fetch_relay::proxy::ProxyServer;
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let server = ProxyServer::bind("127.0.0.1:8080".parse()?, relay, shutdown_rx).await?;
//! println!("listening on {}", server.local_addr());
//! server.run().await?;
//!
//! // To shutdown:
//! shutdown_tx.send(true)?;
//! ```

use super::convert::{capture_call, error_response, into_http_response};
use super::error::{ProxyError, ProxyResult};
use crate::relay::Relay;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// The HTTP front server.
pub struct ProxyServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    relay: Arc<Relay>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ProxyServer {
    /// Bind the server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address to listen on. Port 0 picks a free port.
    /// * `relay` - Relay that every request is run through.
    /// * `shutdown_rx` - Receiver for shutdown signal.
    pub async fn bind(
        addr: SocketAddr,
        relay: Arc<Relay>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> ProxyResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("HTTP front listening on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            relay,
            shutdown_rx,
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until the shutdown signal is received.
    pub async fn run(self) -> ProxyResult<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            debug!("Accepted connection from {}", peer);
                            self.spawn_connection_handler(stream);
                        }
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("HTTP front shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    fn spawn_connection_handler(&self, stream: TcpStream) {
        let relay = self.relay.clone();

        tokio::spawn(async move {
            // Includes connections aborted for emulated network errors.
            if let Err(e) = handle_connection(stream, relay).await {
                debug!("Connection ended: {}", e);
            }
        });
    }
}

/// Serve one client connection.
async fn handle_connection(stream: TcpStream, relay: Arc<Relay>) -> Result<(), ProxyError> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let relay = relay.clone();
        async move { relay_request(req, relay).await }
    });

    http1::Builder::new()
        .serve_connection(io, service)
        .await
        .map_err(ProxyError::from)
}

/// Run one request through the relay.
///
/// An emulated network error is returned as `Err`, which makes hyper drop
/// the connection without a response. Other failures become error
/// responses.
async fn relay_request(
    req: Request<Incoming>,
    relay: Arc<Relay>,
) -> Result<Response<Full<Bytes>>, ProxyError> {
    let call = match capture_call(req).await {
        Ok(call) => call,
        Err(e) => {
            debug!("Rejecting request: {}", e);
            return Ok(error_response(StatusCode::BAD_REQUEST, e.to_string()));
        }
    };

    match relay.intercept(call).await {
        Ok(relayed) => match into_http_response(relayed) {
            Ok(response) => Ok(response),
            Err(e) => Ok(error_response(StatusCode::BAD_GATEWAY, e.to_string())),
        },
        Err(e) if e.is_network_error() => Err(e.into()),
        Err(e) => Ok(error_response(StatusCode::BAD_GATEWAY, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{ClientRegistry, HyperUpstream, RelayConfig};
    use crate::telemetry::AuditLogger;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn create_relay() -> Arc<Relay> {
        Arc::new(Relay::new(
            RelayConfig::default(),
            Arc::new(ClientRegistry::new()),
            Arc::new(HyperUpstream::new()),
            Arc::new(AuditLogger::new_null()),
        ))
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let (_tx, rx) = watch::channel(false);
        let server = ProxyServer::bind("127.0.0.1:0".parse().unwrap(), create_relay(), rx)
            .await
            .unwrap();

        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_missing_host_is_bad_request() {
        let (_tx, rx) = watch::channel(false);
        let server = ProxyServer::bind("127.0.0.1:0".parse().unwrap(), create_relay(), rx)
            .await
            .unwrap();
        let addr = server.local_addr();
        tokio::spawn(server.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /api/farms HTTP/1.0\r\n\r\n")
            .await
            .unwrap();

        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf);
        assert!(text.contains(" 400 "), "got {}", text);
    }

    #[tokio::test]
    async fn test_shutdown_stops_server() {
        let (tx, rx) = watch::channel(false);
        let server = ProxyServer::bind("127.0.0.1:0".parse().unwrap(), create_relay(), rx)
            .await
            .unwrap();
        let handle = tokio::spawn(server.run());

        tx.send(true).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }
}
