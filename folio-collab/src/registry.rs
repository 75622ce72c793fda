//! Process-wide map from document id to its collaboration session.
//!
//! The application root owns one registry. Navigating to a document goes
//! through [`SessionRegistry::switch_to`], which tears down every other
//! session in the same call so no timers or sockets outlive the navigation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::LocalCache;
use crate::protocol::AwarenessState;
use crate::session::{CollaborationSession, SessionContext};
use crate::status::SessionState;
use crate::supervisor::SupervisorConfig;
use crate::transport::TransportFactory;

pub struct SessionRegistry {
    sessions: HashMap<String, CollaborationSession>,
    active: Option<String>,
    ctx: SessionContext,
}

impl SessionRegistry {
    pub fn new(factory: Arc<dyn TransportFactory>, cache: Arc<dyn LocalCache>) -> Self {
        Self::with_config(factory, cache, SupervisorConfig::default())
    }

    pub fn with_config(factory: Arc<dyn TransportFactory>, cache: Arc<dyn LocalCache>, config: SupervisorConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            active: None,
            ctx: SessionContext {
                factory,
                cache,
                config,
                local_user: None,
            },
        }
    }

    /// Presence this client announces on every session it opens.
    pub fn set_local_user(&mut self, user: AwarenessState) {
        self.ctx.local_user = Some(user);
    }

    /// Session for `document_id`, created on first open. An existing session
    /// whose editability differs is switched over instead of replaced.
    pub fn open(&mut self, document_id: &str, editable: bool) -> &CollaborationSession {
        let ctx = &self.ctx;
        let session = self
            .sessions
            .entry(document_id.to_string())
            .or_insert_with(|| CollaborationSession::open(document_id, editable, ctx));
        if session.is_editable() != editable {
            session.set_editable(editable);
        }
        session
    }

    pub fn get(&self, document_id: &str) -> Option<&CollaborationSession> {
        self.sessions.get(document_id)
    }

    pub fn state(&self, document_id: &str) -> Option<SessionState> {
        self.sessions.get(document_id).map(|s| s.state())
    }

    /// Restore `loading` defaults without dropping subscribers. Returns
    /// `false` if no such session is open.
    pub fn reset(&self, document_id: &str) -> bool {
        match self.sessions.get(document_id) {
            Some(session) => {
                session.reset();
                true
            }
            None => false,
        }
    }

    pub fn set_editable(&self, document_id: &str, editable: bool) -> bool {
        match self.sessions.get(document_id) {
            Some(session) => {
                session.set_editable(editable);
                true
            }
            None => false,
        }
    }

    pub fn close(&mut self, document_id: &str) -> bool {
        if self.active.as_deref() == Some(document_id) {
            self.active = None;
        }
        match self.sessions.remove(document_id) {
            Some(session) => {
                log::info!("Closing collaboration session for {}", document_id);
                session.close();
                true
            }
            None => false,
        }
    }

    /// Make `document_id` the active document, closing every other session.
    pub fn switch_to(&mut self, document_id: &str, editable: bool) -> &CollaborationSession {
        let stale: Vec<String> = self
            .sessions
            .keys()
            .filter(|id| id.as_str() != document_id)
            .cloned()
            .collect();
        for id in stale {
            self.close(&id);
        }
        self.active = Some(document_id.to_string());
        self.open(document_id, editable)
    }

    pub fn active_document(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn close_all(&mut self) {
        self.active = None;
        for (_, session) in self.sessions.drain() {
            session.close();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
