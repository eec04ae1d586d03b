//! Control message dispatcher.
//!
//! The `Dispatcher` owns the relay inbox and applies client messages to the
//! [`Relay`] one at a time, sending back whatever reply each message calls
//! for. Registry mutations therefore never race with each other.
//!
//! # Responsibilities
//!
//! - Answer keepalive and integrity probes
//! - Apply activate / deactivate / close to the registry
//! - Route call replies to the correlation table
//! - Reinstall a self-uninstalled relay when a client activates again
//! - Clear relay state on shutdown

use super::protocol::{ClientEnvelope, ClientToRelay};
use crate::relay::Relay;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Runs as a separate task, processing client messages.
pub struct Dispatcher {
    relay: Arc<Relay>,
    inbox: mpsc::Receiver<ClientEnvelope>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Dispatcher {
    /// Create a dispatcher.
    ///
    /// # Arguments
    ///
    /// * `relay` - The relay to drive.
    /// * `inbox` - Receiver shared by all client transports.
    /// * `shutdown_rx` - Shutdown signal receiver.
    pub fn new(
        relay: Arc<Relay>,
        inbox: mpsc::Receiver<ClientEnvelope>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            relay,
            inbox,
            shutdown_rx,
        }
    }

    /// Run the dispatch loop until shutdown or until every inbox sender is
    /// dropped.
    pub async fn run(mut self) {
        info!("Dispatcher started");

        loop {
            tokio::select! {
                envelope = self.inbox.recv() => {
                    match envelope {
                        Some(envelope) => self.dispatch(envelope),
                        None => {
                            info!("Inbox closed, dispatcher stopping");
                            break;
                        }
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("Dispatcher received shutdown signal");
                        self.relay.shutdown();
                        break;
                    }
                }
            }
        }

        info!("Dispatcher stopped");
    }

    /// Apply one message and deliver its reply.
    fn dispatch(&mut self, envelope: ClientEnvelope) {
        let ClientEnvelope { client_id, message } = envelope;
        debug!("Message from {}: {:?}", client_id, message);

        // A client starting up again is what brings the relay back after it
        // uninstalled itself.
        if message == ClientToRelay::MockActivate
            && !self.relay.is_installed()
            && self.relay.registry().contains(&client_id)
        {
            self.relay.install();
        }

        // Never waits: one client that stops reading must not stall the rest.
        if let Some(reply) = self.relay.handle_message(&client_id, message)
            && !self.relay.send_to_client(&client_id, reply)
        {
            debug!("Reply to client {} was not delivered", client_id);
        }
    }
}
