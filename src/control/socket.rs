//! Unix socket transport for out-of-process clients.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐  Unix Socket  ┌──────────────────────────┐
//! │      Relay Process       │←─────────────→│      Client Process      │
//! │  ┌──────────────────┐    │     JSON      │  ┌──────────────────┐    │
//! │  │  ControlSocket   │    │               │  │  ControlSocket   │    │
//! │  │  Server          │    │               │  │  Client          │    │
//! │  └──────────────────┘    │               │  └──────────────────┘    │
//! └──────────────────────────┘               └──────────────────────────┘
//! ```
//!
//! Every accepted connection is a client. The server mints its id, registers
//! it, and sends `CLIENT_ID` as the first frame. When the connection ends
//! without an explicit `CLIENT_CLOSED`, the server emits one on the client's
//! behalf.
//!
//! # Message Framing
//!
//! ```text
//! [4 bytes: message length (big-endian u32)]
//! [N bytes: JSON-encoded message]
//! ```

use super::channel::DEFAULT_CHANNEL_SIZE;
use super::protocol::{ClientEnvelope, ClientToRelay, RelayToClient};
use crate::relay::{ClientId, ClientRegistry};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;
use std::os::unix::net::UnixListener as StdUnixListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Errors from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Encoding or decoding error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Connection closed.
    #[error("Connection closed")]
    ConnectionClosed,
    /// Message too large.
    #[error("Message too large: {0} bytes (max {1})")]
    MessageTooLarge(usize, usize),
    /// The server did not open with `CLIENT_ID`.
    #[error("Unexpected handshake message: {0}")]
    Handshake(String),
}

/// Maximum message size.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Result type for socket operations.
pub type SocketResult<T> = Result<T, SocketError>;

/// Relay-side socket accepting any number of clients.
pub struct ControlSocketServer {
    /// Bound with std so the server can be created outside the runtime.
    /// Taken out by `run()`.
    listener: Option<StdUnixListener>,
    socket_path: PathBuf,
}

impl ControlSocketServer {
    /// Bind a socket server at the given path.
    ///
    /// Any existing socket file at the path is removed first.
    pub fn new<P: AsRef<Path>>(socket_path: P) -> SocketResult<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();

        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }

        let listener = StdUnixListener::bind(&socket_path)?;
        listener.set_nonblocking(true)?;
        info!("Control socket listening on {:?}", socket_path);

        Ok(Self {
            listener: Some(listener),
            socket_path,
        })
    }

    /// Get the socket path.
    pub fn path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept clients until shutdown.
    ///
    /// # Arguments
    ///
    /// * `registry` - Where accepted clients are registered.
    /// * `inbox` - Relay inbox that client messages are forwarded to.
    /// * `shutdown_rx` - Shutdown signal receiver.
    pub async fn run(
        mut self,
        registry: Arc<ClientRegistry>,
        inbox: mpsc::Sender<ClientEnvelope>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> SocketResult<()> {
        let std_listener = self
            .listener
            .take()
            .ok_or_else(|| io::Error::other("listener already consumed"))?;
        let listener = UnixListener::from_std(std_listener)?;

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            serve_connection(stream, &registry, inbox.clone());
                        }
                        Err(e) => {
                            error!("Control socket accept failed: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Control socket shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

impl Drop for ControlSocketServer {
    fn drop(&mut self) {
        if self.socket_path.exists()
            && let Err(e) = std::fs::remove_file(&self.socket_path)
        {
            warn!("Failed to remove socket file: {}", e);
        }
    }
}

/// Register one connection and spawn its reader and writer tasks.
fn serve_connection(
    stream: UnixStream,
    registry: &ClientRegistry,
    inbox: mpsc::Sender<ClientEnvelope>,
) {
    let client_id = ClientId::generate();
    let (tx, rx) = mpsc::channel::<RelayToClient>(DEFAULT_CHANNEL_SIZE);

    // Queued before the writer starts, so it is always the first frame.
    if tx.try_send(RelayToClient::ClientId(client_id.clone())).is_err() {
        warn!("Could not queue CLIENT_ID for {}", client_id);
        return;
    }
    registry.connect(client_id.clone(), tx);
    info!("Client {} connected to control socket", client_id);

    let (read_half, write_half) = stream.into_split();

    let writer_id = client_id.clone();
    tokio::spawn(async move {
        if let Err(e) = frame_writer(write_half, rx).await
            && !matches!(e, SocketError::ConnectionClosed)
        {
            error!("Socket writer error for {}: {}", writer_id, e);
        }
        debug!("Socket writer for {} finished", writer_id);
    });

    tokio::spawn(async move {
        client_reader(read_half, client_id, inbox).await;
    });
}

/// Forward a client's frames to the inbox, closing it out when the
/// connection ends.
async fn client_reader(
    mut reader: OwnedReadHalf,
    client_id: ClientId,
    inbox: mpsc::Sender<ClientEnvelope>,
) {
    loop {
        let data = match read_message(&mut reader).await {
            Ok(data) => data,
            Err(SocketError::ConnectionClosed) => break,
            Err(e) => {
                error!("Socket reader error for {}: {}", client_id, e);
                break;
            }
        };
        let msg = match decode_client_frame(&data) {
            Some(msg) => msg,
            None => {
                warn!("Dropping malformed frame from {}", client_id);
                continue;
            }
        };

        let closing = msg == ClientToRelay::ClientClosed;
        if inbox
            .send(ClientEnvelope::new(client_id.clone(), msg))
            .await
            .is_err()
        {
            return;
        }
        if closing {
            debug!("Client {} closed explicitly", client_id);
            return;
        }
    }

    debug!("Client {} disconnected", client_id);
    let _ = inbox
        .send(ClientEnvelope::new(client_id, ClientToRelay::ClientClosed))
        .await;
}

/// Decode a client frame.
///
/// A call reply that fails to decode but still names its call is turned
/// into [`ClientToRelay::MalformedReply`] so that call fails instead of
/// waiting for an answer that will never come.
fn decode_client_frame(data: &[u8]) -> Option<ClientToRelay> {
    match serde_json::from_slice(data) {
        Ok(msg) => Some(msg),
        Err(e) => {
            debug!("Undecodable client frame: {}", e);
            ClientToRelay::malformed_reply(data, e.to_string())
        }
    }
}

/// Client side of the control socket.
pub struct ControlSocketClient {
    client_id: ClientId,
    tx: mpsc::Sender<ClientToRelay>,
    rx: mpsc::Receiver<RelayToClient>,
}

impl ControlSocketClient {
    /// Connect to the relay and wait for it to assign a client id.
    pub async fn connect<P: AsRef<Path>>(socket_path: P) -> SocketResult<Self> {
        let socket_path = socket_path.as_ref();
        let stream = UnixStream::connect(socket_path).await?;
        let (mut read_half, write_half) = stream.into_split();

        let client_id = match read_frame::<RelayToClient, _>(&mut read_half).await? {
            RelayToClient::ClientId(id) => id,
            other => return Err(SocketError::Handshake(format!("{:?}", other))),
        };
        info!("Connected to {:?} as client {}", socket_path, client_id);

        let (out_tx, out_rx) = mpsc::channel::<ClientToRelay>(DEFAULT_CHANNEL_SIZE);
        let (in_tx, in_rx) = mpsc::channel::<RelayToClient>(DEFAULT_CHANNEL_SIZE);

        tokio::spawn(async move {
            if let Err(e) = frame_reader(read_half, in_tx).await
                && !matches!(e, SocketError::ConnectionClosed)
            {
                error!("Socket reader error: {}", e);
            }
            debug!("Client socket reader finished");
        });

        tokio::spawn(async move {
            if let Err(e) = frame_writer(write_half, out_rx).await
                && !matches!(e, SocketError::ConnectionClosed)
            {
                error!("Socket writer error: {}", e);
            }
            debug!("Client socket writer finished");
        });

        Ok(Self {
            client_id,
            tx: out_tx,
            rx: in_rx,
        })
    }

    /// The id the relay assigned to this connection.
    pub fn id(&self) -> &ClientId {
        &self.client_id
    }

    /// Send a message to the relay.
    pub async fn send(&self, msg: ClientToRelay) -> Result<(), ClientToRelay> {
        self.tx.send(msg).await.map_err(|e| e.0)
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&mut self) -> Option<RelayToClient> {
        self.rx.try_recv().ok()
    }

    /// Receive a message from the relay.
    pub async fn recv(&mut self) -> Option<RelayToClient> {
        self.rx.recv().await
    }
}

/// Read a length-prefixed frame from the stream.
async fn read_message<R: AsyncReadExt + Unpin>(reader: &mut R) -> SocketResult<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(SocketError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(SocketError::MessageTooLarge(len, MAX_MESSAGE_SIZE));
    }

    let mut buf = vec![0u8; len];
    match reader.read_exact(&mut buf).await {
        Ok(_) => Ok(buf),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(SocketError::ConnectionClosed),
        Err(e) => Err(e.into()),
    }
}

/// Write a length-prefixed frame to the stream.
async fn write_message<W: AsyncWriteExt + Unpin>(writer: &mut W, data: &[u8]) -> SocketResult<()> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(SocketError::MessageTooLarge(data.len(), MAX_MESSAGE_SIZE));
    }

    let len = data.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;

    Ok(())
}

async fn read_frame<T: DeserializeOwned, R: AsyncReadExt + Unpin>(
    reader: &mut R,
) -> SocketResult<T> {
    let data = read_message(reader).await?;
    Ok(serde_json::from_slice(&data)?)
}

async fn write_frame<T: Serialize, W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg: &T,
) -> SocketResult<()> {
    let data = serde_json::to_vec(msg)?;
    write_message(writer, &data).await
}

/// Decode frames from the socket into a channel.
async fn frame_reader<T: DeserializeOwned + std::fmt::Debug>(
    mut reader: OwnedReadHalf,
    tx: mpsc::Sender<T>,
) -> SocketResult<()> {
    loop {
        let msg: T = read_frame(&mut reader).await?;
        debug!("Received: {:?}", msg);

        if tx.send(msg).await.is_err() {
            break;
        }
    }
    Ok(())
}

/// Encode messages from a channel onto the socket.
async fn frame_writer<T: Serialize + std::fmt::Debug>(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<T>,
) -> SocketResult<()> {
    while let Some(msg) = rx.recv().await {
        debug!("Sending: {:?}", msg);
        write_frame(&mut writer, &msg).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    struct Harness {
        registry: Arc<ClientRegistry>,
        inbox_rx: mpsc::Receiver<ClientEnvelope>,
        shutdown_tx: watch::Sender<bool>,
        socket_path: PathBuf,
        _dir: tempfile::TempDir,
    }

    fn start_server() -> Harness {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("relay.sock");
        let server = ControlSocketServer::new(&socket_path).unwrap();

        let registry = Arc::new(ClientRegistry::new());
        let (inbox_tx, inbox_rx) = mpsc::channel(DEFAULT_CHANNEL_SIZE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(server.run(registry.clone(), inbox_tx, shutdown_rx));

        Harness {
            registry,
            inbox_rx,
            shutdown_tx,
            socket_path,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_connect_assigns_registered_id() {
        let h = start_server();
        let client = ControlSocketClient::connect(&h.socket_path).await.unwrap();

        assert!(h.registry.contains(client.id()));
        assert!(!h.registry.is_active(client.id()));
    }

    #[tokio::test]
    async fn test_messages_flow_both_ways() {
        let mut h = start_server();
        let mut client = ControlSocketClient::connect(&h.socket_path).await.unwrap();

        client.send(ClientToRelay::MockActivate).await.unwrap();
        let envelope = h.inbox_rx.recv().await.unwrap();
        assert_eq!(&envelope.client_id, client.id());
        assert_eq!(envelope.message, ClientToRelay::MockActivate);

        let tx = h.registry.sender(client.id()).unwrap();
        tx.send(RelayToClient::MockingEnabled(true)).await.unwrap();
        assert_eq!(client.recv().await, Some(RelayToClient::MockingEnabled(true)));
    }

    #[tokio::test]
    async fn test_disconnect_emits_client_closed() {
        let mut h = start_server();
        let client = ControlSocketClient::connect(&h.socket_path).await.unwrap();
        let id = client.id().clone();

        drop(client);

        let envelope = tokio::time::timeout(Duration::from_secs(2), h.inbox_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.client_id, id);
        assert_eq!(envelope.message, ClientToRelay::ClientClosed);
    }

    #[tokio::test]
    async fn test_explicit_close_not_duplicated() {
        let mut h = start_server();
        let client = ControlSocketClient::connect(&h.socket_path).await.unwrap();

        client.send(ClientToRelay::ClientClosed).await.unwrap();
        let first = h.inbox_rx.recv().await.unwrap();
        assert_eq!(first.message, ClientToRelay::ClientClosed);

        drop(client);
        let second = tokio::time::timeout(Duration::from_millis(200), h.inbox_rx.recv()).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_each_connection_gets_distinct_id() {
        let h = start_server();
        let a = ControlSocketClient::connect(&h.socket_path).await.unwrap();
        let b = ControlSocketClient::connect(&h.socket_path).await.unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(h.registry.client_count(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let h = start_server();
        h.shutdown_tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Server dropped, so the socket file is gone.
        assert!(!h.socket_path.exists());
    }

    #[tokio::test]
    async fn test_undecodable_reply_reaches_inbox() {
        let mut h = start_server();
        let mut stream = UnixStream::connect(&h.socket_path).await.unwrap();
        let handshake: RelayToClient = read_frame(&mut stream).await.unwrap();
        assert!(matches!(handshake, RelayToClient::ClientId(_)));

        let id = uuid::Uuid::new_v4();
        let bad_mock = serde_json::json!({
            "type": "MOCK_RESPONSE",
            "payload": {"id": id, "headers": {}, "body": "{}"}
        });
        let junk = serde_json::json!({"type": "NOT_A_MESSAGE"});
        write_frame(&mut stream, &junk).await.unwrap();
        write_frame(&mut stream, &bad_mock).await.unwrap();

        let envelope = tokio::time::timeout(Duration::from_secs(2), h.inbox_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match envelope.message {
            ClientToRelay::MalformedReply(payload) => {
                assert_eq!(payload.id, id);
                assert!(payload.reason.contains("status"));
            }
            other => panic!("Expected MalformedReply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let len = (MAX_MESSAGE_SIZE as u32 + 1).to_be_bytes();
        a.write_all(&len).await.unwrap();

        let result = read_message(&mut b).await;
        assert!(matches!(result, Err(SocketError::MessageTooLarge(_, _))));
    }
}
