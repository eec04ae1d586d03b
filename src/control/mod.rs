//! Control plane between the relay and its clients.
//!
//! - [`protocol`]: message types and their JSON shape
//! - [`channel`]: in-process client links
//! - [`socket`]: Unix socket transport for out-of-process clients
//! - [`dispatcher`]: single task applying client messages to the relay

pub mod channel;
pub mod dispatcher;
pub mod protocol;
pub mod socket;

pub use channel::{ClientChannels, connect_client, connect_client_with_id, create_inbox};
pub use dispatcher::Dispatcher;
pub use protocol::{ClientEnvelope, ClientToRelay, ForwardedRequest, INTEGRITY_CHECKSUM, RelayToClient};
pub use socket::{ControlSocketClient, ControlSocketServer, SocketError, SocketResult};
