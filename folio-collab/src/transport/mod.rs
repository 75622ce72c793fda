//! Network transport contract for a replicated document.
//!
//! A transport is constructed for one document id and the shared
//! [`ReplicatedDocument`](crate::document::ReplicatedDocument). Remote
//! updates are applied to that document directly; everything the session
//! must react to arrives on the event channel from [`Transport::take_events`].
//!
//! All methods return immediately. `connect` starts a background attempt
//! whose outcome is reported as [`TransportEvent::Connected`] (handshake
//! complete) or a later [`TransportEvent::Disconnected`].

pub mod queue;
pub mod ws;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::document::ReplicatedDocument;
use crate::protocol::AwarenessState;

pub use queue::OfflineQueue;
pub use ws::{WsTransport, WsTransportFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake finished; updates now flow both ways.
    Connected,
    /// The link dropped. The transport keeps retrying on its own.
    Disconnected,
    /// Server acknowledgment; `unsynced` client updates still outstanding.
    Synced { unsynced: u64 },
    /// Server refused the session. The transport stops retrying.
    AuthenticationFailed { reason: String },
    /// A remote update was applied to the shared document.
    RemoteUpdate(Vec<u8>),
    /// Full awareness list for the document.
    Awareness(Vec<AwarenessState>),
}

pub trait Transport: Send {
    fn status(&self) -> TransportStatus;

    /// Start connecting. No-op while a connection or attempt is live.
    fn connect(&mut self);

    /// Drop the link without discarding queued updates.
    fn disconnect(&mut self);

    /// Drop the link and release everything; the transport is unusable after.
    fn destroy(&mut self);

    /// Send a local update, queueing it while not connected.
    fn send_update(&mut self, update: Vec<u8>);

    /// Publish this client's presence; re-sent on every reconnect.
    fn send_awareness(&mut self, state: AwarenessState);

    /// Take the event receiver (only once).
    fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>>;
}

/// A transport shared by a session handle and its supervisor task.
pub(crate) type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

pub(crate) fn lock_transport(transport: &SharedTransport) -> MutexGuard<'_, Box<dyn Transport>> {
    transport.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Builds one transport per opened document.
pub trait TransportFactory: Send + Sync {
    fn create(&self, document_id: &str, document: Arc<ReplicatedDocument>) -> Box<dyn Transport>;
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Base WebSocket URL; the document id is appended as a path segment.
    pub server_url: String,
    /// Appended as `?token=` when set.
    pub auth_token: Option<String>,
    /// Max local updates held while disconnected
    pub offline_queue_capacity: usize,
    /// Pause between reconnect attempts
    pub reconnect_delay: Duration,
    pub event_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:9090".to_string(),
            auth_token: None,
            offline_queue_capacity: 10_000,
            reconnect_delay: Duration::from_secs(1),
            event_capacity: 256,
        }
    }
}

impl TransportConfig {
    /// Fast retries against a local test server.
    pub fn for_testing(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            auth_token: None,
            offline_queue_capacity: 100,
            reconnect_delay: Duration::from_millis(20),
            event_capacity: 64,
        }
    }

    pub fn document_url(&self, document_id: &str) -> String {
        let base = self.server_url.trim_end_matches('/');
        match &self.auth_token {
            Some(token) => format!("{base}/{document_id}?token={token}"),
            None => format!("{base}/{document_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_url() {
        let mut config = TransportConfig::for_testing("ws://localhost:9090/");
        assert_eq!(config.document_url("abc"), "ws://localhost:9090/abc");

        config.auth_token = Some("t0k".into());
        assert_eq!(config.document_url("abc"), "ws://localhost:9090/abc?token=t0k");
    }

    #[test]
    fn test_config_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.offline_queue_capacity, 10_000);
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
    }
}
