use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::cache::LocalCache;
use crate::document::ReplicatedDocument;
use crate::protocol::AwarenessState;
use crate::status::SessionState;
use crate::supervisor::{Command, Supervisor, SupervisorConfig};
use crate::transport::{lock_transport, SharedTransport, TransportFactory};

/// Handle to one open document's collaboration.
///
/// Owns the supervisor task. Dropping the handle destroys the transport,
/// detaches the document's subscribers and aborts the task before it returns.
pub struct CollaborationSession {
    document_id: String,
    document: Arc<ReplicatedDocument>,
    transport: SharedTransport,
    state: watch::Receiver<SessionState>,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// Everything a session needs besides its id.
#[derive(Clone)]
pub struct SessionContext {
    pub factory: Arc<dyn TransportFactory>,
    pub cache: Arc<dyn LocalCache>,
    pub config: SupervisorConfig,
    pub local_user: Option<AwarenessState>,
}

impl CollaborationSession {
    /// Must be called from within a tokio runtime.
    pub fn open(document_id: impl Into<String>, editable: bool, ctx: &SessionContext) -> Self {
        let document_id = document_id.into();
        let document = Arc::new(ReplicatedDocument::new());
        let transport: SharedTransport = Arc::new(Mutex::new(ctx.factory.create(&document_id, document.clone())));

        let (state_tx, state_rx) = watch::channel(SessionState::new(document_id.clone(), editable));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let supervisor = Supervisor::new(
            document.clone(),
            transport.clone(),
            ctx.cache.clone(),
            ctx.config.clone(),
            ctx.local_user.clone(),
            state_tx,
        );
        log::info!("Opening collaboration session for {} (editable: {})", document_id, editable);
        let task = tokio::spawn(supervisor.run(cmd_rx));

        Self {
            document_id,
            document,
            transport,
            state: state_rx,
            commands: cmd_tx,
            task,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Latest published state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// A receiver that observes every later state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn document(&self) -> Arc<ReplicatedDocument> {
        self.document.clone()
    }

    pub fn is_editable(&self) -> bool {
        self.state.borrow().editable
    }

    /// Back to `loading` defaults and restart supervision. Subscribers keep
    /// their receivers.
    pub fn reset(&self) {
        let _ = self.commands.send(Command::Reset);
    }

    pub fn set_editable(&self, editable: bool) {
        let _ = self.commands.send(Command::SetEditable(editable));
    }

    /// Tear the session down. The transport is destroyed and no timer fires
    /// after this returns.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for CollaborationSession {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Close);
        lock_transport(&self.transport).destroy();
        self.document.unsubscribe_all();
        self.task.abort();
    }
}

impl std::fmt::Debug for CollaborationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollaborationSession")
            .field("document_id", &self.document_id)
            .field("status", &self.state.borrow().status)
            .finish()
    }
}
