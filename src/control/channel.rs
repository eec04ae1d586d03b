//! In-process channels between the relay and its clients.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐                       ┌────────────────┐
//! │     Relay      │                       │     Client     │
//! │                │                       │                │
//! │  registry tx ──┼──► RelayToClient ─────┼► rx            │
//! │                │                       │                │
//! │  inbox rx ◄────┼─── ClientEnvelope ◄───┼── tx           │
//! └────────────────┘                       └────────────────┘
//! ```
//!
//! All clients share one inbox, so the dispatcher sees their messages in a
//! single sequence. Each client has its own outbound channel, held by the
//! [`ClientRegistry`].

use super::protocol::{ClientEnvelope, ClientToRelay, RelayToClient};
use crate::relay::{ClientId, ClientRegistry};
use tokio::sync::mpsc;

/// Default channel buffer size.
pub const DEFAULT_CHANNEL_SIZE: usize = 64;

/// Create the shared inbox for client messages.
#[inline]
pub fn create_inbox() -> (mpsc::Sender<ClientEnvelope>, mpsc::Receiver<ClientEnvelope>) {
    mpsc::channel(DEFAULT_CHANNEL_SIZE)
}

/// Channels held by an in-process client.
#[derive(Debug)]
pub struct ClientChannels {
    client_id: ClientId,
    /// Sender into the relay inbox.
    tx: mpsc::Sender<ClientEnvelope>,
    /// Receiver for messages from the relay.
    rx: mpsc::Receiver<RelayToClient>,
}

/// Connect a new in-process client with a generated id.
///
/// The client is registered as connected but not yet active; it must send
/// `MOCK_ACTIVATE` to receive calls.
pub fn connect_client(
    registry: &ClientRegistry,
    inbox: mpsc::Sender<ClientEnvelope>,
) -> ClientChannels {
    connect_client_with_id(registry, inbox, ClientId::generate())
}

/// Connect a new in-process client under a chosen id.
pub fn connect_client_with_id(
    registry: &ClientRegistry,
    inbox: mpsc::Sender<ClientEnvelope>,
    client_id: ClientId,
) -> ClientChannels {
    let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_SIZE);
    registry.connect(client_id.clone(), tx);

    ClientChannels {
        client_id,
        tx: inbox,
        rx,
    }
}

impl ClientChannels {
    /// This client's id.
    pub fn id(&self) -> &ClientId {
        &self.client_id
    }

    /// Send a message to the relay.
    ///
    /// Returns `Err(msg)` if the relay inbox has been dropped.
    pub async fn send(&self, msg: ClientToRelay) -> Result<(), ClientToRelay> {
        self.tx
            .send(ClientEnvelope::new(self.client_id.clone(), msg))
            .await
            .map_err(|e| e.0.message)
    }

    /// Try to receive a message from the relay without blocking.
    pub fn try_recv(&mut self) -> Option<RelayToClient> {
        self.rx.try_recv().ok()
    }

    /// Receive a message from the relay.
    ///
    /// Returns `None` once the relay side has dropped this client.
    pub async fn recv(&mut self) -> Option<RelayToClient> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_message_is_tagged() {
        let registry = ClientRegistry::new();
        let (inbox_tx, mut inbox_rx) = create_inbox();
        let client = connect_client(&registry, inbox_tx);

        client.send(ClientToRelay::KeepaliveRequest).await.unwrap();

        let envelope = inbox_rx.recv().await.unwrap();
        assert_eq!(&envelope.client_id, client.id());
        assert_eq!(envelope.message, ClientToRelay::KeepaliveRequest);
    }

    #[tokio::test]
    async fn test_registry_sender_reaches_client() {
        let registry = ClientRegistry::new();
        let (inbox_tx, _inbox_rx) = create_inbox();
        let mut client = connect_client_with_id(&registry, inbox_tx, ClientId::new("tab-1"));

        let tx = registry.sender(&ClientId::new("tab-1")).unwrap();
        tx.send(RelayToClient::KeepaliveResponse).await.unwrap();

        assert_eq!(client.recv().await, Some(RelayToClient::KeepaliveResponse));
    }

    #[tokio::test]
    async fn test_try_recv_empty() {
        let registry = ClientRegistry::new();
        let (inbox_tx, _inbox_rx) = create_inbox();
        let mut client = connect_client(&registry, inbox_tx);

        assert!(client.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_removed_client_sees_close() {
        let registry = ClientRegistry::new();
        let (inbox_tx, _inbox_rx) = create_inbox();
        let mut client = connect_client(&registry, inbox_tx);

        registry.remove(client.id());
        assert!(client.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_inbox_drop_detection() {
        let registry = ClientRegistry::new();
        let (inbox_tx, inbox_rx) = create_inbox();
        let client = connect_client(&registry, inbox_tx);

        drop(inbox_rx);
        assert!(client.send(ClientToRelay::MockActivate).await.is_err());
    }
}
