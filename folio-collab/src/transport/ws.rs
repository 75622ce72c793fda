//! WebSocket transport.
//!
//! One background task per connected document. The task dials
//! `{server_url}/{document_id}`, sends `SyncStep1` with the local state
//! vector and waits for the server's `SyncStep2`. Only then is the link
//! reported `Connected`, the offline queue replayed and the presence state
//! re-announced. When the socket drops the task retries after
//! `reconnect_delay` until it is aborted or the server rejects the session.

use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use super::{OfflineQueue, Transport, TransportConfig, TransportEvent, TransportFactory, TransportStatus};
use crate::document::ReplicatedDocument;
use crate::protocol::{AwarenessState, MessageType, SyncMessage};

/// Connection state shared between the handle and its task.
#[derive(Debug)]
struct Link {
    status: TransportStatus,
    outgoing: Option<mpsc::UnboundedSender<Vec<u8>>>,
    queue: OfflineQueue,
    clock: u64,
    awareness: Option<AwarenessState>,
}

fn lock(link: &Mutex<Link>) -> MutexGuard<'_, Link> {
    link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct WsTransport {
    peer_id: Uuid,
    document_id: String,
    document: Arc<ReplicatedDocument>,
    config: TransportConfig,
    link: Arc<Mutex<Link>>,
    event_tx: mpsc::Sender<TransportEvent>,
    event_rx: Option<mpsc::Receiver<TransportEvent>>,
    task: Option<JoinHandle<()>>,
    destroyed: bool,
}

impl WsTransport {
    pub fn new(document_id: impl Into<String>, document: Arc<ReplicatedDocument>, config: TransportConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity);
        let link = Link {
            status: TransportStatus::Disconnected,
            outgoing: None,
            queue: OfflineQueue::new(config.offline_queue_capacity),
            clock: 0,
            awareness: None,
        };
        Self {
            peer_id: Uuid::new_v4(),
            document_id: document_id.into(),
            document,
            config,
            link: Arc::new(Mutex::new(link)),
            event_tx,
            event_rx: Some(event_rx),
            task: None,
            destroyed: false,
        }
    }

    pub fn peer_id(&self) -> Uuid {
        self.peer_id
    }

    /// Local updates waiting for the next handshake.
    pub fn queued(&self) -> usize {
        lock(&self.link).queue.len()
    }

    fn stop_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let mut link = lock(&self.link);
        link.status = TransportStatus::Disconnected;
        link.outgoing = None;
    }
}

impl Transport for WsTransport {
    fn status(&self) -> TransportStatus {
        lock(&self.link).status
    }

    fn connect(&mut self) {
        if self.destroyed {
            return;
        }
        if self.task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        lock(&self.link).status = TransportStatus::Connecting;

        let worker = Worker {
            peer_id: self.peer_id,
            document_id: self.document_id.clone(),
            document: self.document.clone(),
            config: self.config.clone(),
            link: self.link.clone(),
            events: self.event_tx.clone(),
        };
        self.task = Some(tokio::spawn(worker.run()));
    }

    fn disconnect(&mut self) {
        self.stop_task();
    }

    fn destroy(&mut self) {
        self.stop_task();
        let mut link = lock(&self.link);
        link.queue.clear();
        link.awareness = None;
        self.destroyed = true;
    }

    fn send_update(&mut self, update: Vec<u8>) {
        let mut link = lock(&self.link);
        link.clock += 1;
        let clock = link.clock;

        if link.status == TransportStatus::Connected {
            if let Some(tx) = &link.outgoing {
                match SyncMessage::delta(self.peer_id, &self.document_id, clock, update.clone()).encode() {
                    Ok(encoded) => {
                        if tx.send(encoded).is_ok() {
                            return;
                        }
                    }
                    Err(e) => {
                        log::warn!("Failed to encode delta for {}: {}", self.document_id, e);
                        return;
                    }
                }
            }
        }

        if let Err(e) = link.queue.push(clock, update) {
            log::warn!("Offline queue for {} rejected an update: {}", self.document_id, e);
        }
    }

    fn send_awareness(&mut self, state: AwarenessState) {
        let mut link = lock(&self.link);
        if link.status == TransportStatus::Connected {
            if let Some(tx) = &link.outgoing {
                let clock = link.clock;
                match SyncMessage::awareness(self.peer_id, &self.document_id, clock, std::slice::from_ref(&state))
                    .and_then(|m| m.encode())
                {
                    Ok(encoded) => {
                        let _ = tx.send(encoded);
                    }
                    Err(e) => log::warn!("Failed to encode awareness for {}: {}", self.document_id, e),
                }
            }
        }
        link.awareness = Some(state);
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.event_rx.take()
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// How one socket lifetime ended.
enum Outcome {
    Lost,
    Rejected,
}

struct Worker {
    peer_id: Uuid,
    document_id: String,
    document: Arc<ReplicatedDocument>,
    config: TransportConfig,
    link: Arc<Mutex<Link>>,
    events: mpsc::Sender<TransportEvent>,
}

impl Worker {
    async fn run(self) {
        loop {
            let outcome = self.connection().await;

            let was_connected = {
                let mut link = lock(&self.link);
                let was_connected = link.status == TransportStatus::Connected;
                link.outgoing = None;
                link.status = match outcome {
                    Outcome::Lost => TransportStatus::Connecting,
                    Outcome::Rejected => TransportStatus::Disconnected,
                };
                was_connected
            };
            if was_connected {
                log::info!("Connection lost for document {}", self.document_id);
                self.emit(TransportEvent::Disconnected).await;
            }

            if let Outcome::Rejected = outcome {
                return;
            }
            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    async fn connection(&self) -> Outcome {
        let url = self.config.document_url(&self.document_id);
        let ws_stream = match tokio_tungstenite::connect_async(&url).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::debug!("Connect to {} failed: {}", url, e);
                return Outcome::Lost;
            }
        };
        let (mut writer, mut reader) = ws_stream.split();

        let step1 = SyncMessage::sync_step1(self.peer_id, &self.document_id, self.document.state_vector());
        let Ok(encoded) = step1.encode() else {
            return Outcome::Lost;
        };
        if writer.send(Message::Binary(encoded.into())).await.is_err() {
            return Outcome::Lost;
        }

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        loop {
            tokio::select! {
                Some(data) = out_rx.recv() => {
                    if writer.send(Message::Binary(data.into())).await.is_err() {
                        return Outcome::Lost;
                    }
                }
                msg = reader.next() => {
                    let data = match msg {
                        Some(Ok(Message::Binary(data))) => data,
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return Outcome::Lost,
                        _ => continue,
                    };
                    let bytes: Vec<u8> = data.into();
                    let sync_msg = match SyncMessage::decode(&bytes) {
                        Ok(m) => m,
                        Err(e) => {
                            log::warn!("Dropping malformed message: {}", e);
                            continue;
                        }
                    };
                    if sync_msg.peer_id == self.peer_id {
                        continue;
                    }

                    match sync_msg.msg_type {
                        MessageType::SyncStep1 => {
                            let diff = match self.document.diff_since(&sync_msg.payload) {
                                Ok(diff) => diff,
                                Err(e) => {
                                    log::warn!("Bad state vector from server: {}", e);
                                    continue;
                                }
                            };
                            let reply = SyncMessage::sync_step2(self.peer_id, &self.document_id, diff);
                            if let Ok(encoded) = reply.encode() {
                                if writer.send(Message::Binary(encoded.into())).await.is_err() {
                                    return Outcome::Lost;
                                }
                            }
                        }
                        MessageType::SyncStep2 => {
                            if let Err(e) = self.document.apply_update(&sync_msg.payload) {
                                log::warn!("Failed to apply server state: {}", e);
                            }
                            if self.complete_handshake(&out_tx) {
                                log::info!("Connected to document {}", self.document_id);
                                self.emit(TransportEvent::Connected).await;
                            }
                            self.emit(TransportEvent::RemoteUpdate(sync_msg.payload)).await;
                        }
                        MessageType::Delta => match self.document.apply_update(&sync_msg.payload) {
                            Ok(()) => self.emit(TransportEvent::RemoteUpdate(sync_msg.payload)).await,
                            Err(e) => log::warn!("Failed to apply remote delta: {}", e),
                        },
                        MessageType::Awareness => match sync_msg.awareness_states() {
                            Ok(states) => self.emit(TransportEvent::Awareness(states)).await,
                            Err(e) => log::warn!("Bad awareness payload: {}", e),
                        },
                        MessageType::SyncAck => match sync_msg.unsynced() {
                            Ok(unsynced) => self.emit(TransportEvent::Synced { unsynced }).await,
                            Err(e) => log::warn!("Bad sync ack payload: {}", e),
                        },
                        MessageType::AuthFailed => {
                            let reason = sync_msg.auth_reason().unwrap_or_default();
                            log::warn!("Server rejected document {}: {}", self.document_id, reason);
                            self.emit(TransportEvent::AuthenticationFailed { reason }).await;
                            return Outcome::Rejected;
                        }
                    }
                }
            }
        }
    }

    /// Publish the outgoing channel and replay queued state. Returns `false`
    /// if the link was already connected.
    fn complete_handshake(&self, out_tx: &mpsc::UnboundedSender<Vec<u8>>) -> bool {
        let mut link = lock(&self.link);
        if link.status == TransportStatus::Connected {
            return false;
        }
        link.status = TransportStatus::Connected;
        link.outgoing = Some(out_tx.clone());

        let queued = link.queue.take_all();
        if !queued.is_empty() {
            log::info!("Replaying {} queued updates for {}", queued.len(), self.document_id);
        }
        for (clock, payload) in queued {
            if let Ok(encoded) = SyncMessage::delta(self.peer_id, &self.document_id, clock, payload).encode() {
                let _ = out_tx.send(encoded);
            }
        }

        if let Some(state) = &link.awareness {
            let clock = link.clock;
            if let Ok(encoded) = SyncMessage::awareness(self.peer_id, &self.document_id, clock, std::slice::from_ref(state))
                .and_then(|m| m.encode())
            {
                let _ = out_tx.send(encoded);
            }
        }
        true
    }

    async fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event).await;
    }
}

/// Builds a [`WsTransport`] per document against one server.
#[derive(Debug, Clone)]
pub struct WsTransportFactory {
    config: TransportConfig,
}

impl WsTransportFactory {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

impl TransportFactory for WsTransportFactory {
    fn create(&self, document_id: &str, document: Arc<ReplicatedDocument>) -> Box<dyn Transport> {
        Box::new(WsTransport::new(document_id, document, self.config.clone()))
    }
}
