//! Registry of connected client contexts.
//!
//! Every connected client is *known* to the registry and owns an outbound
//! channel. A client becomes *active* once it asks for mocking
//! (`MOCK_ACTIVATE`) and stays active until it deactivates or disconnects.
//! Only calls from known clients are forwarded, and the relay does nothing
//! at all while no client is active.
//!
//! The registry is owned and injected rather than global, so several relays
//! can run side by side (each test builds its own).

use super::call::ClientId;
use crate::control::protocol::RelayToClient;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::debug;

/// State of one connected client.
struct ClientState {
    /// Channel for messages to the client.
    tx: mpsc::Sender<RelayToClient>,
    /// Whether the client asked for mocking.
    active: bool,
    /// When the client connected.
    connected_at: Instant,
}

/// Snapshot of a client (for diagnostics).
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Client identifier.
    pub id: ClientId,
    /// Whether mocking is enabled for the client.
    pub active: bool,
    /// Seconds since the client connected.
    pub connected_secs: u64,
}

/// Connected clients and their activation state.
#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<ClientId, ClientState>>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ClientId, ClientState>> {
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a newly connected client. A reconnect replaces the channel and
    /// resets activation.
    pub fn connect(&self, id: ClientId, tx: mpsc::Sender<RelayToClient>) {
        debug!("Client {} connected", id);
        self.lock().insert(
            id,
            ClientState {
                tx,
                active: false,
                connected_at: Instant::now(),
            },
        );
    }

    /// Mark a client active. Returns false if the client is unknown.
    ///
    /// Activating an already active client is a no-op.
    pub fn activate(&self, id: &ClientId) -> bool {
        match self.lock().get_mut(id) {
            Some(state) => {
                state.active = true;
                true
            }
            None => false,
        }
    }

    /// Clear a client's active flag. Returns false if the client is unknown.
    pub fn deactivate(&self, id: &ClientId) -> bool {
        match self.lock().get_mut(id) {
            Some(state) => {
                state.active = false;
                true
            }
            None => false,
        }
    }

    /// Forget a client. Returns the number of clients still connected.
    pub fn remove(&self, id: &ClientId) -> usize {
        let mut clients = self.lock();
        if clients.remove(id).is_some() {
            debug!("Client {} removed", id);
        }
        clients.len()
    }

    /// Forget every client.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Outbound channel of a known client.
    pub fn sender(&self, id: &ClientId) -> Option<mpsc::Sender<RelayToClient>> {
        self.lock().get(id).map(|state| state.tx.clone())
    }

    /// Whether the client is connected.
    pub fn contains(&self, id: &ClientId) -> bool {
        self.lock().contains_key(id)
    }

    /// Whether the client is connected and active.
    pub fn is_active(&self, id: &ClientId) -> bool {
        self.lock().get(id).is_some_and(|state| state.active)
    }

    /// Whether any client is active.
    pub fn has_active(&self) -> bool {
        self.lock().values().any(|state| state.active)
    }

    /// Number of active clients.
    pub fn active_count(&self) -> usize {
        self.lock().values().filter(|state| state.active).count()
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.lock().len()
    }

    /// Snapshot of all clients.
    pub fn list(&self) -> Vec<ClientInfo> {
        self.lock()
            .iter()
            .map(|(id, state)| ClientInfo {
                id: id.clone(),
                active: state.active,
                connected_secs: state.connected_at.elapsed().as_secs(),
            })
            .collect()
    }
}
