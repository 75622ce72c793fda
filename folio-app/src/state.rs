//! Application state: the tree store and the collaboration sessions.
//!
//! `AppState` is the single owner of both. UI code reads tree and session
//! state through their watch channels and routes every navigation through
//! [`AppState::open_document`] so the open document and the active
//! collaboration session never disagree.

use std::sync::Arc;

use folio_collab::{LocalCache, SessionRegistry, SessionState, SupervisorConfig, TransportFactory};
use folio_core::{DocumentApi, TreeError, TreeStore};

pub struct AppState {
    pub tree: TreeStore,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn new(api: Arc<dyn DocumentApi>, factory: Arc<dyn TransportFactory>, cache: Arc<dyn LocalCache>) -> Self {
        Self::with_config(api, factory, cache, SupervisorConfig::default())
    }

    pub fn with_config(
        api: Arc<dyn DocumentApi>,
        factory: Arc<dyn TransportFactory>,
        cache: Arc<dyn LocalCache>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            tree: TreeStore::new(api),
            sessions: SessionRegistry::with_config(factory, cache, config),
        }
    }

    /// Navigate to `id`: fetch its record, then make its session the only
    /// live one. Returns `None` when the document is missing or forbidden,
    /// in which case no session stays open.
    pub async fn open_document(&mut self, id: &str) -> Result<Option<SessionState>, TreeError> {
        self.tree.set_current_document_id(Some(id)).await?;

        let current = self.tree.state().current_document.as_ref().map(|d| d.permission);
        let Some(permission) = current else {
            self.sessions.close_all();
            return Ok(None);
        };
        // Absent permission means the backend does not restrict editing.
        let editable = permission.is_none_or(|p| p.can_edit());

        let session = self.sessions.switch_to(id, editable);
        Ok(Some(session.state()))
    }

    pub async fn close_document(&mut self) -> Result<(), TreeError> {
        self.sessions.close_all();
        self.tree.set_current_document_id(None).await
    }

    /// Delete `id` and navigate to the document the tree store picks.
    pub async fn delete_document(&mut self, id: &str) -> Result<Option<SessionState>, TreeError> {
        let next = self.tree.delete(id).await?;
        self.sessions.close(id);
        self.open_document(&next).await
    }
}
