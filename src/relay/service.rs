//! The interception state machine.
//!
//! [`Relay::intercept`] decides, for each outbound call, whether to bypass
//! the relay, forward the call to the client that issued it, or fall back to
//! the real network:
//!
//! ```text
//! call ──► installed? ──no──► upstream (unchanged)
//!             │yes
//!          excluded? ──yes──► upstream (unchanged)
//!             │no
//!        any active client? ──no──► upstream (unchanged)
//!             │yes
//!        owning client known? ──no──► upstream (unchanged)
//!             │yes
//!        park id, send REQUEST, await reply
//!             ├─ MOCK_RESPONSE ──► substitute response
//!             ├─ PASSTHROUGH ────► upstream (minus intention header)
//!             ├─ NETWORK_ERROR ──► RelayError::NetworkError
//!             └─ timeout / client gone ──► upstream (minus intention header)
//! ```
//!
//! [`Relay::handle_message`] processes control messages from clients. It is
//! driven by a single dispatcher task, so control messages are applied one at
//! a time.

use super::call::{ClientId, InterceptedCall, MARKER_HEADER, MARKER_VALUE, RelayResponse};
use super::error::{RelayError, RelayResult};
use super::pending::{PendingError, PendingReplies, Reply};
use super::registry::ClientRegistry;
use super::upstream::Upstream;
use crate::control::protocol::{
    ClientToRelay, ForwardedRequest, INTEGRITY_CHECKSUM, RelayToClient,
};
use crate::telemetry::{AuditEvent, AuditLogger, PassthroughReason, UninstallReason};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default bound on waiting for a client reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Relay behavior settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How long to wait for a client reply before falling back to the
    /// network. `None` waits indefinitely.
    pub reply_timeout: Option<Duration>,
    /// Uninstall once the last client disconnects.
    pub self_uninstall: bool,
    /// Answer to integrity probes.
    pub integrity_checksum: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Some(DEFAULT_REPLY_TIMEOUT),
            self_uninstall: true,
            integrity_checksum: INTEGRITY_CHECKSUM.to_string(),
        }
    }
}

/// The request-interception relay.
pub struct Relay {
    config: RelayConfig,
    registry: Arc<ClientRegistry>,
    pending: Arc<PendingReplies>,
    upstream: Arc<dyn Upstream>,
    audit: Arc<AuditLogger>,
    installed: AtomicBool,
}

impl Relay {
    /// Create a relay. It starts uninstalled.
    ///
    /// # Arguments
    ///
    /// * `config` - Relay behavior settings.
    /// * `registry` - Registry of connected clients, shared with the transport.
    /// * `upstream` - The real network.
    /// * `audit` - Audit logger.
    pub fn new(
        config: RelayConfig,
        registry: Arc<ClientRegistry>,
        upstream: Arc<dyn Upstream>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            config,
            registry,
            pending: Arc::new(PendingReplies::new()),
            upstream,
            audit,
            installed: AtomicBool::new(false),
        }
    }

    /// Start intercepting subsequent calls.
    pub fn install(&self) {
        if !self.installed.swap(true, Ordering::SeqCst) {
            info!("Relay installed");
            self.audit.log(AuditEvent::RelayInstalled);
        }
    }

    /// Stop intercepting subsequent calls. Calls in flight are unaffected.
    pub fn uninstall(&self) {
        self.uninstall_with(UninstallReason::Manual);
    }

    fn uninstall_with(&self, reason: UninstallReason) {
        if self.installed.swap(false, Ordering::SeqCst) {
            info!("Relay uninstalled ({:?})", reason);
            self.audit.log(AuditEvent::RelayUninstalled { reason });
        }
    }

    /// Whether the relay is intercepting.
    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    /// The client registry.
    pub fn registry(&self) -> Arc<ClientRegistry> {
        self.registry.clone()
    }

    /// The correlation table.
    pub fn pending(&self) -> Arc<PendingReplies> {
        self.pending.clone()
    }

    /// The active settings.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Enable mocking for a client. Idempotent.
    ///
    /// Returns false if the client is not connected.
    pub fn register_context(&self, client_id: &ClientId) -> bool {
        let known = self.registry.activate(client_id);
        if known {
            debug!("Mocking enabled for client {}", client_id);
            self.audit.log(AuditEvent::ClientActivated {
                client_id: client_id.to_string(),
            });
        } else {
            warn!("Activation from unknown client {}", client_id);
        }
        known
    }

    /// Disable mocking for a client.
    pub fn unregister_context(&self, client_id: &ClientId) {
        if self.registry.deactivate(client_id) {
            debug!("Mocking disabled for client {}", client_id);
            self.audit.log(AuditEvent::ClientDeactivated {
                client_id: client_id.to_string(),
            });
        }
    }

    /// Forget a client that went away.
    ///
    /// Calls waiting on it fall back to the network. If it was the last
    /// client and self-uninstall is enabled, the relay uninstalls.
    pub fn close_context(&self, client_id: &ClientId) {
        let remaining = self.registry.remove(client_id);
        let released_calls = self.pending.release_client(client_id);

        info!(
            "Client {} closed ({} remaining, {} call(s) released)",
            client_id, remaining, released_calls
        );
        self.audit.log(AuditEvent::ClientClosed {
            client_id: client_id.to_string(),
            remaining,
            released_calls,
        });

        if remaining == 0 && self.config.self_uninstall {
            self.uninstall_with(UninstallReason::LastClientClosed);
        }
    }

    /// Drop all clients and pending calls, and uninstall.
    pub fn shutdown(&self) {
        for client in self.registry.list() {
            debug!(
                "Dropping client {} (active: {}, connected {}s)",
                client.id, client.active, client.connected_secs
            );
        }
        for call in self.pending.list_pending() {
            debug!(
                "Abandoning {} {} for client {} after {}s",
                call.method, call.url, call.client_id, call.waiting_secs
            );
        }
        self.registry.clear();
        self.pending.clear();
        self.uninstall_with(UninstallReason::Shutdown);
    }

    /// Process one control message from `client_id`.
    ///
    /// Returns the message to send back, if any.
    pub fn handle_message(
        &self,
        client_id: &ClientId,
        message: ClientToRelay,
    ) -> Option<RelayToClient> {
        match message {
            ClientToRelay::KeepaliveRequest => Some(RelayToClient::KeepaliveResponse),
            ClientToRelay::IntegrityCheckRequest => Some(RelayToClient::IntegrityCheckResponse(
                self.config.integrity_checksum.clone(),
            )),
            ClientToRelay::MockActivate => self
                .register_context(client_id)
                .then_some(RelayToClient::MockingEnabled(true)),
            ClientToRelay::MockDeactivate => {
                self.unregister_context(client_id);
                None
            }
            ClientToRelay::ClientClosed => {
                self.close_context(client_id);
                None
            }
            reply => {
                if let Some((id, reply)) = reply.into_reply() {
                    self.accept_reply(client_id, id, reply);
                }
                None
            }
        }
    }

    /// Queue a message for a client without waiting.
    ///
    /// Returns false if the message was not queued: the client is gone, or
    /// it stopped draining its queue and the message was dropped.
    pub fn send_to_client(&self, client_id: &ClientId, message: RelayToClient) -> bool {
        let Some(tx) = self.registry.sender(client_id) else {
            return false;
        };
        match tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                warn!(
                    "Queue for client {} is full, dropping {:?}",
                    client_id, message
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn accept_reply(&self, client_id: &ClientId, id: Uuid, reply: Reply) {
        match self.pending.resolve(id, client_id, reply) {
            Ok(()) => {}
            Err(PendingError::NotFound(id)) => {
                debug!("Ignoring late or duplicate reply for {}", id);
            }
            Err(e) => {
                warn!("Dropped reply from client {}: {}", client_id, e);
            }
        }
    }

    /// Intercept one outbound call.
    ///
    /// # Errors
    ///
    /// - [`RelayError::NetworkError`] when the client emulates an unreachable
    ///   network. Logged as a warning only.
    /// - Any other error aborts this call and is logged for diagnostics.
    pub async fn intercept(&self, call: InterceptedCall) -> RelayResult<RelayResponse> {
        match self.handle_call(&call).await {
            Ok(response) => Ok(response),
            Err(e) if e.is_network_error() => {
                warn!(
                    "Emulated a network error for request: {} {}",
                    call.method, call.url
                );
                self.audit.log(AuditEvent::NetworkErrorEmulated {
                    method: call.method.clone(),
                    url: call.url.clone(),
                });
                Err(e)
            }
            Err(e) => {
                error!(
                    "Caught an error from the \"{} {}\" request: {}",
                    call.method, call.url, e
                );
                self.audit.log(AuditEvent::CallFailed {
                    method: call.method.clone(),
                    url: call.url.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn handle_call(&self, call: &InterceptedCall) -> RelayResult<RelayResponse> {
        if !self.is_installed() {
            return self.bypass(call, PassthroughReason::NotInstalled).await;
        }
        if call.is_excluded() {
            return self.bypass(call, PassthroughReason::Excluded).await;
        }
        if !self.registry.has_active() {
            return self.bypass(call, PassthroughReason::NoActiveClients).await;
        }

        let Some(client_id) = call.client_id.as_ref() else {
            return self.bypass(call, PassthroughReason::ClientNotFound).await;
        };
        let Some(tx) = self.registry.sender(client_id) else {
            debug!("Client {} not connected", client_id);
            return self.bypass(call, PassthroughReason::ClientNotFound).await;
        };

        let (id, reply_rx) = self.pending.park(client_id.clone(), &call.method, &call.url);
        let message = RelayToClient::Request(ForwardedRequest::from_call(id, call));

        // The deadline also covers queueing the request; a stalled client
        // keeps its queue full.
        let exchange = async {
            tx.send(message)
                .await
                .map_err(|_| RelayError::ClientUnavailable(client_id.clone()))?;
            Ok::<_, RelayError>(reply_rx.await.ok())
        };

        let outcome = match self.config.reply_timeout {
            Some(limit) => match tokio::time::timeout(limit, exchange).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.pending.cancel(id);
                    warn!(
                        "No reply for {} {} within {:?}, using network",
                        call.method, call.url, limit
                    );
                    return self.passthrough(call, PassthroughReason::ReplyTimeout).await;
                }
            },
            None => exchange.await,
        };
        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => {
                self.pending.cancel(id);
                return Err(e);
            }
        };

        let mut response = match reply {
            Some(Reply::Mock(mocked)) => {
                if !(100..=599).contains(&mocked.status) {
                    return Err(RelayError::InvalidReply(format!(
                        "status {} out of range",
                        mocked.status
                    )));
                }
                self.audit.log(AuditEvent::CallMocked {
                    method: call.method.clone(),
                    url: call.url.clone(),
                    status: mocked.status,
                });
                RelayResponse::from(mocked)
            }
            Some(Reply::Passthrough) => {
                self.passthrough(call, PassthroughReason::ClientDeclined).await?
            }
            Some(Reply::NetworkError { message }) => {
                return Err(RelayError::NetworkError(message));
            }
            Some(Reply::Invalid { reason }) => {
                return Err(RelayError::InvalidReply(reason));
            }
            None => self.passthrough(call, PassthroughReason::ClientGone).await?,
        };

        if self.registry.is_active(client_id) {
            response.headers.insert(MARKER_HEADER, MARKER_VALUE);
        }
        Ok(response)
    }

    /// Send the call to the network exactly as captured.
    async fn bypass(
        &self,
        call: &InterceptedCall,
        reason: PassthroughReason,
    ) -> RelayResult<RelayResponse> {
        debug!("Bypassing {} {} ({:?})", call.method, call.url, reason);
        self.audit_passthrough(call, reason);
        Ok(self.upstream.fetch(call).await?)
    }

    /// Send the call to the network after the relay saw it.
    async fn passthrough(
        &self,
        call: &InterceptedCall,
        reason: PassthroughReason,
    ) -> RelayResult<RelayResponse> {
        debug!("Passing through {} {} ({:?})", call.method, call.url, reason);
        self.audit_passthrough(call, reason);
        Ok(self.upstream.fetch(&call.without_intention()).await?)
    }

    fn audit_passthrough(&self, call: &InterceptedCall, reason: PassthroughReason) {
        self.audit.log(AuditEvent::CallPassthrough {
            method: call.method.clone(),
            url: call.url.clone(),
            reason,
        });
    }
}
