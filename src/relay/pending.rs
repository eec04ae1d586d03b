//! Correlation table for calls awaiting a client reply.
//!
//! When a call is forwarded to a client, it is parked here under a freshly
//! minted correlation id. The intercepting task awaits the returned
//! receiver; the dispatcher resolves the id when the client answers.
//!
//! Each id is resolved at most once: resolving removes the entry, so a late
//! or duplicate reply finds nothing and is reported as
//! [`PendingError::NotFound`].
//!
//! # Example
//!
//! ```no_run
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use fetch_relay::relay::{ClientId, PendingReplies, Reply};
//!
//! let pending = PendingReplies::new();
//! let client = ClientId::new("tab-1");
//!
//! let (id, reply_rx) = pending.park(client.clone(), "GET", "http://farm.test/api/alerts");
//! pending.resolve(id, &client, Reply::Passthrough)?;
//!
//! assert!(matches!(reply_rx.await?, Reply::Passthrough));
//! # Ok(())
//! # }
//! ```

use super::call::{ClientId, Headers, RelayResponse, ResponseSource};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

/// Substitute response supplied by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Reason phrase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    /// Response headers.
    #[serde(default)]
    pub headers: Headers,
    /// Response body as text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl From<MockedResponse> for RelayResponse {
    fn from(mocked: MockedResponse) -> Self {
        RelayResponse {
            status: mocked.status,
            status_text: mocked.status_text,
            headers: mocked.headers,
            body: mocked.body.map(bytes::Bytes::from).unwrap_or_default(),
            source: ResponseSource::Mocked,
        }
    }
}

/// A client's answer to a forwarded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Use this response instead of the network.
    Mock(MockedResponse),
    /// No mock applies; perform the real call.
    Passthrough,
    /// Behave as if the network were unreachable.
    NetworkError {
        /// Message reported by the client.
        message: String,
    },
    /// The client answered, but the answer could not be decoded.
    Invalid {
        /// What was wrong with it.
        reason: String,
    },
}

/// A call waiting for its reply.
struct PendingReply {
    /// Client the call was forwarded to.
    client_id: ClientId,
    /// Method of the call.
    method: String,
    /// Target of the call.
    url: String,
    /// When the call was parked.
    parked_at: Instant,
    /// Channel to deliver the reply.
    reply_tx: oneshot::Sender<Reply>,
}

/// Information about a pending call (for diagnostics).
#[derive(Debug, Clone)]
pub struct PendingInfo {
    /// Correlation id.
    pub id: Uuid,
    /// Client the call was forwarded to.
    pub client_id: ClientId,
    /// Method of the call.
    pub method: String,
    /// Target of the call.
    pub url: String,
    /// Seconds spent waiting so far.
    pub waiting_secs: u64,
}

/// Calls awaiting a reply, keyed by correlation id.
#[derive(Default)]
pub struct PendingReplies {
    pending: Mutex<HashMap<Uuid, PendingReply>>,
}

impl PendingReplies {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, PendingReply>> {
        // A panic while holding the lock leaves the map itself consistent.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Park a call forwarded to `client_id`.
    ///
    /// Returns the minted correlation id and a receiver for the reply.
    pub fn park(
        &self,
        client_id: ClientId,
        method: &str,
        url: &str,
    ) -> (Uuid, oneshot::Receiver<Reply>) {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();

        debug!("Parked {} {} as {} for client {}", method, url, id, client_id);

        self.lock().insert(
            id,
            PendingReply {
                client_id,
                method: method.to_string(),
                url: url.to_string(),
                parked_at: Instant::now(),
                reply_tx: tx,
            },
        );

        (id, rx)
    }

    /// Deliver a reply from `from` for the call parked under `id`.
    ///
    /// # Errors
    ///
    /// - [`PendingError::NotFound`] if the id was never parked or was already
    ///   resolved, cancelled, or released.
    /// - [`PendingError::WrongClient`] if `from` is not the client the call was
    ///   forwarded to. The entry stays parked.
    /// - [`PendingError::CallerGone`] if the waiting task stopped listening.
    pub fn resolve(&self, id: Uuid, from: &ClientId, reply: Reply) -> Result<(), PendingError> {
        let entry = {
            let mut pending = self.lock();
            match pending.get(&id) {
                None => return Err(PendingError::NotFound(id)),
                Some(entry) if entry.client_id != *from => {
                    return Err(PendingError::WrongClient {
                        id,
                        expected: entry.client_id.clone(),
                        actual: from.clone(),
                    });
                }
                Some(_) => pending.remove(&id),
            }
        };
        let Some(entry) = entry else {
            return Err(PendingError::NotFound(id));
        };

        debug!("Reply for {} ({} {})", id, entry.method, entry.url);

        entry
            .reply_tx
            .send(reply)
            .map_err(|_| PendingError::CallerGone(id))
    }

    /// Drop a parked call so any later reply is ignored.
    ///
    /// Returns true if the call was still pending.
    pub fn cancel(&self, id: Uuid) -> bool {
        let removed = self.lock().remove(&id);
        if removed.is_some() {
            debug!("Cancelled pending call {}", id);
            true
        } else {
            false
        }
    }

    /// Drop every call forwarded to `client_id`.
    ///
    /// The waiting tasks observe a closed channel. Returns how many were
    /// released.
    pub fn release_client(&self, client_id: &ClientId) -> usize {
        let mut pending = self.lock();
        let before = pending.len();
        pending.retain(|_, entry| entry.client_id != *client_id);
        let released = before - pending.len();
        if released > 0 {
            debug!("Released {} pending call(s) of client {}", released, client_id);
        }
        released
    }

    /// Drop every pending call.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Snapshot of pending calls.
    pub fn list_pending(&self) -> Vec<PendingInfo> {
        self.lock()
            .iter()
            .map(|(id, p)| PendingInfo {
                id: *id,
                client_id: p.client_id.clone(),
                method: p.method.clone(),
                url: p.url.clone(),
                waiting_secs: p.parked_at.elapsed().as_secs(),
            })
            .collect()
    }

    /// Number of pending calls.
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }
}

/// Errors from correlation table operations.
#[derive(Debug, Error)]
pub enum PendingError {
    /// No pending call has this id.
    #[error("No pending call with id {0}")]
    NotFound(Uuid),

    /// The reply came from a client the call was not forwarded to.
    #[error("Reply for {id} came from client {actual}, expected {expected}")]
    WrongClient {
        /// Correlation id.
        id: Uuid,
        /// Client the call was forwarded to.
        expected: ClientId,
        /// Client that replied.
        actual: ClientId,
    },

    /// The intercepting task is no longer waiting.
    #[error("Caller for {0} stopped waiting")]
    CallerGone(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_response() -> MockedResponse {
        let mut headers = Headers::new();
        headers.insert("content-type", "application/json");
        MockedResponse {
            status: 200,
            status_text: None,
            headers,
            body: Some("{\"ok\":true}".to_string()),
        }
    }

    #[tokio::test]
    async fn test_park_and_resolve_mock() {
        let pending = PendingReplies::new();
        let client = ClientId::new("tab-1");

        let (id, rx) = pending.park(client.clone(), "GET", "http://farm.test/api/farms");
        assert_eq!(pending.pending_count(), 1);

        pending.resolve(id, &client, Reply::Mock(ok_response())).unwrap();

        assert_eq!(rx.await.unwrap(), Reply::Mock(ok_response()));
        assert_eq!(pending.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_reply_ignored() {
        let pending = PendingReplies::new();
        let client = ClientId::new("tab-1");

        let (id, rx) = pending.park(client.clone(), "GET", "http://farm.test/");
        pending.resolve(id, &client, Reply::Passthrough).unwrap();

        let second = pending.resolve(id, &client, Reply::Mock(ok_response()));
        assert!(matches!(second, Err(PendingError::NotFound(_))));

        // The first reply is the one delivered.
        assert_eq!(rx.await.unwrap(), Reply::Passthrough);
    }

    #[test]
    fn test_resolve_unknown_id() {
        let pending = PendingReplies::new();
        let result = pending.resolve(Uuid::new_v4(), &ClientId::new("x"), Reply::Passthrough);
        assert!(matches!(result, Err(PendingError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_wrong_client_keeps_entry() {
        let pending = PendingReplies::new();
        let owner = ClientId::new("tab-1");
        let intruder = ClientId::new("tab-2");

        let (id, rx) = pending.park(owner.clone(), "GET", "http://farm.test/");

        let result = pending.resolve(id, &intruder, Reply::Passthrough);
        assert!(matches!(result, Err(PendingError::WrongClient { .. })));
        assert_eq!(pending.pending_count(), 1);

        pending.resolve(id, &owner, Reply::Passthrough).unwrap();
        assert_eq!(rx.await.unwrap(), Reply::Passthrough);
    }

    #[test]
    fn test_caller_gone() {
        let pending = PendingReplies::new();
        let client = ClientId::new("tab-1");

        let (id, rx) = pending.park(client.clone(), "GET", "http://farm.test/");
        drop(rx);

        let result = pending.resolve(id, &client, Reply::Passthrough);
        assert!(matches!(result, Err(PendingError::CallerGone(_))));
    }

    #[test]
    fn test_cancel() {
        let pending = PendingReplies::new();
        let (id, _rx) = pending.park(ClientId::new("tab-1"), "GET", "http://farm.test/");

        assert!(pending.cancel(id));
        assert_eq!(pending.pending_count(), 0);
        assert!(!pending.cancel(id));
    }

    #[tokio::test]
    async fn test_release_client() {
        let pending = PendingReplies::new();
        let a = ClientId::new("tab-a");
        let b = ClientId::new("tab-b");

        let (_id1, rx1) = pending.park(a.clone(), "GET", "http://farm.test/1");
        let (_id2, _rx2) = pending.park(a.clone(), "GET", "http://farm.test/2");
        let (_id3, _rx3) = pending.park(b.clone(), "GET", "http://farm.test/3");

        assert_eq!(pending.release_client(&a), 2);
        assert_eq!(pending.pending_count(), 1);

        // The waiter sees the sender dropped.
        assert!(rx1.await.is_err());
    }

    #[test]
    fn test_list_pending() {
        let pending = PendingReplies::new();
        let (_id1, _rx1) = pending.park(ClientId::new("tab-1"), "GET", "http://farm.test/api/soil");
        let (_id2, _rx2) = pending.park(ClientId::new("tab-1"), "POST", "http://farm.test/api/chat");

        let list = pending.list_pending();
        assert_eq!(list.len(), 2);
        let urls: Vec<&str> = list.iter().map(|p| p.url.as_str()).collect();
        assert!(urls.contains(&"http://farm.test/api/soil"));
        assert!(urls.contains(&"http://farm.test/api/chat"));
        assert!(list.iter().all(|p| p.waiting_secs <= 1));
    }

    #[test]
    fn test_ids_are_unique() {
        let pending = PendingReplies::new();
        let (id1, _rx1) = pending.park(ClientId::new("tab-1"), "GET", "http://farm.test/");
        let (id2, _rx2) = pending.park(ClientId::new("tab-1"), "GET", "http://farm.test/");
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_mocked_response_into_relay_response() {
        let response: RelayResponse = ok_response().into();
        assert_eq!(response.status, 200);
        assert_eq!(response.source, ResponseSource::Mocked);
        assert_eq!(&response.body[..], b"{\"ok\":true}");
    }
}
