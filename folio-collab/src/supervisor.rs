//! Connection supervision for one collaboration session.
//!
//! The supervisor is the task that drives a session's transport and owns its
//! cache handle and timers. The transport itself is shared with the session
//! handle, which destroys it on close without waiting for the task. It turns transport events, local edits and timer expiry into
//! [`SessionEvent`]s, folds them through [`reduce`] and publishes the result
//! on a watch channel.
//!
//! Two timers exist: the connect timeout (armed while waiting for the first
//! handshake) and the disconnect grace window (armed when a collaborating
//! session loses its link). Both are [`ScopedTimer`]s owned by the task, so
//! every exit path, including abort, drops them.

use std::future::pending;
use std::pin::Pin;
use std::sync::{Arc, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch};
use tokio::time::Sleep;

use crate::cache::LocalCache;
use crate::document::ReplicatedDocument;
use crate::protocol::AwarenessState;
use crate::status::{reduce, SessionEvent, SessionState, SessionStatus};
use crate::transport::{lock_transport, SharedTransport, Transport, TransportEvent, TransportStatus};

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How long a session may wait for its first handshake.
    pub connect_timeout: Duration,
    /// How long a dropped link may take to come back before going offline.
    pub disconnect_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            disconnect_grace: Duration::from_secs(3),
        }
    }
}

impl SupervisorConfig {
    pub fn for_testing() -> Self {
        Self {
            connect_timeout: Duration::from_millis(200),
            disconnect_grace: Duration::from_millis(50),
        }
    }
}

/// A one-shot timer that is cleared when it fires, when cancelled or when
/// dropped.
#[derive(Debug, Default)]
pub struct ScopedTimer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ScopedTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)start the timer.
    pub fn arm(&mut self, after: Duration) {
        self.sleep = Some(Box::pin(tokio::time::sleep(after)));
    }

    pub fn cancel(&mut self) {
        self.sleep = None;
    }

    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// Resolves once when the armed deadline passes; never resolves while
    /// unarmed.
    pub async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => pending::<()>().await,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    Reset,
    SetEditable(bool),
    Close,
}

pub(crate) struct Supervisor {
    document: Arc<ReplicatedDocument>,
    transport: SharedTransport,
    cache: Arc<dyn LocalCache>,
    config: SupervisorConfig,
    local_user: Option<AwarenessState>,
    state: watch::Sender<SessionState>,
    connect_timer: ScopedTimer,
    grace_timer: ScopedTimer,
}

impl Supervisor {
    pub(crate) fn new(
        document: Arc<ReplicatedDocument>,
        transport: SharedTransport,
        cache: Arc<dyn LocalCache>,
        config: SupervisorConfig,
        local_user: Option<AwarenessState>,
        state: watch::Sender<SessionState>,
    ) -> Self {
        Self {
            document,
            transport,
            cache,
            config,
            local_user,
            state,
            connect_timer: ScopedTimer::new(),
            grace_timer: ScopedTimer::new(),
        }
    }

    fn transport(&self) -> MutexGuard<'_, Box<dyn Transport>> {
        lock_transport(&self.transport)
    }

    fn document_id(&self) -> String {
        self.state.borrow().document_id.clone()
    }

    fn editable(&self) -> bool {
        self.state.borrow().editable
    }

    fn status(&self) -> SessionStatus {
        self.state.borrow().status
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut events = self.transport().take_events();
        let mut local_updates = self.document.subscribe();

        self.load_cache();
        self.start();

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Reset) => self.reset(),
                    Some(Command::SetEditable(editable)) => self.set_editable(editable),
                    Some(Command::Close) | None => break,
                },
                Some(event) = next_event(&mut events) => self.on_transport_event(event),
                Some(update) = local_updates.recv() => self.on_local_update(update),
                _ = self.connect_timer.fired() => {
                    log::warn!("Connect timeout for document {}", self.document_id());
                    self.apply(SessionEvent::ConnectTimeout);
                }
                _ = self.grace_timer.fired() => self.apply(SessionEvent::GraceElapsed),
            }
        }
    }

    fn load_cache(&mut self) {
        let document_id = self.document_id();
        match self.cache.load(&document_id) {
            Ok(Some(state)) => {
                if let Err(e) = self.document.apply_update(&state) {
                    log::warn!("Discarding unreadable cache for {}: {}", document_id, e);
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("Cache load failed for {}: {}", document_id, e),
        }
    }

    /// Announce the loaded cache and, for editable sessions, start the
    /// connect attempt under the connect timeout.
    fn start(&mut self) {
        self.apply(SessionEvent::CacheLoaded);
        if !self.editable() {
            return;
        }

        if let Some(user) = self.local_user.clone() {
            self.transport().send_awareness(user);
        }
        if self.transport().status() == TransportStatus::Connected {
            self.apply(SessionEvent::Connected);
            return;
        }
        self.connect_timer.arm(self.config.connect_timeout);
        self.transport().connect();
    }

    fn reset(&mut self) {
        self.connect_timer.cancel();
        self.grace_timer.cancel();
        self.apply(SessionEvent::Reset);
        self.start();
    }

    fn set_editable(&mut self, editable: bool) {
        self.state.send_modify(|s| s.editable = editable);
        if !editable {
            self.transport().disconnect();
        }
        self.reset();
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                self.connect_timer.cancel();
                self.grace_timer.cancel();
                self.apply(SessionEvent::Connected);
            }
            TransportEvent::Disconnected => {
                self.apply(SessionEvent::Disconnected);
                if self.status() == SessionStatus::Collaborating && !self.grace_timer.is_armed() {
                    self.grace_timer.arm(self.config.disconnect_grace);
                }
            }
            TransportEvent::Synced { unsynced } => self.apply(SessionEvent::Synced { unsynced }),
            TransportEvent::AuthenticationFailed { reason } => {
                log::warn!("Authentication failed for {}: {}", self.document_id(), reason);
                self.connect_timer.cancel();
                self.grace_timer.cancel();
                self.transport().disconnect();
                self.apply(SessionEvent::AuthenticationFailed { reason });
            }
            TransportEvent::RemoteUpdate(update) => self.store(&update),
            TransportEvent::Awareness(states) => self.apply(SessionEvent::Awareness(states)),
        }
    }

    fn on_local_update(&mut self, update: Vec<u8>) {
        self.store(&update);
        let transport_connected = self.transport().status() == TransportStatus::Connected;
        if self.editable() {
            self.transport().send_update(update);
        }
        self.apply(SessionEvent::LocalChange { transport_connected });
    }

    fn store(&self, update: &[u8]) {
        let document_id = self.document_id();
        if let Err(e) = self.cache.store_update(&document_id, update) {
            log::warn!("Cache write failed for {}: {}", document_id, e);
        }
    }

    fn apply(&self, event: SessionEvent) {
        let now = now_ms();
        self.state.send_if_modified(|state| {
            let next = reduce(state, event, now);
            if next == *state {
                return false;
            }
            if next.status != state.status {
                log::debug!("Session {}: {:?} -> {:?}", state.document_id, state.status, next.status);
            }
            *state = next;
            true
        });
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.connect_timer.cancel();
        self.grace_timer.cancel();
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
