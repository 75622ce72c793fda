//! Collaboration session state machine.
//!
//! ```text
//!            CacheLoaded            Connected
//!  loading ─────────────► connecting ─────────► collaborating
//!     │  (read-only)          │  ConnectTimeout      │  GraceElapsed
//!     ▼                       ▼                      ▼
//!  readonly                 error                 offline
//!
//!  any ── AuthenticationFailed ──► unauthorized   (terminal until Reset)
//! ```
//!
//! [`reduce`] is pure: timers and the transport live in the supervisor,
//! which turns what they observe into [`SessionEvent`]s.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::presence::{collapse, Presence};
use crate::protocol::AwarenessState;

pub const CONNECT_TIMEOUT_MESSAGE: &str = "Connection timed out";
pub const OFFLINE_MESSAGE: &str = "You are offline. Changes are kept locally and will sync when the connection returns.";
pub const UNAUTHORIZED_MESSAGE: &str = "You are not authorized to edit this document.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Loading,
    Connecting,
    Collaborating,
    Offline,
    Error,
    Unauthorized,
    Readonly,
}

impl SessionStatus {
    /// Statuses the UI must explain with an `error` string.
    pub fn needs_message(&self) -> bool {
        matches!(self, SessionStatus::Error | SessionStatus::Unauthorized | SessionStatus::Offline)
    }
}

/// What the UI renders for one open document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub document_id: String,
    pub editable: bool,
    pub status: SessionStatus,
    pub active_users: HashMap<String, Presence>,
    pub pending_changes: bool,
    /// Milliseconds since the Unix epoch.
    pub last_synced_at: Option<u64>,
    pub is_local_cache_loaded: bool,
    pub error: Option<String>,
}

impl SessionState {
    pub fn new(document_id: impl Into<String>, editable: bool) -> Self {
        Self {
            document_id: document_id.into(),
            editable,
            status: SessionStatus::Loading,
            active_users: HashMap::new(),
            pending_changes: false,
            last_synced_at: None,
            is_local_cache_loaded: false,
            error: None,
        }
    }
}

/// Everything that can move a session between states.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    CacheLoaded,
    Connected,
    Disconnected,
    /// The disconnect grace window ran out without a reconnect.
    GraceElapsed,
    ConnectTimeout,
    Synced { unsynced: u64 },
    AuthenticationFailed { reason: String },
    LocalChange { transport_connected: bool },
    Awareness(Vec<AwarenessState>),
    /// Back to loading defaults, keeping id and editability.
    Reset,
}

/// Compute the next state. `now` is milliseconds since the Unix epoch.
pub fn reduce(state: &SessionState, event: SessionEvent, now: u64) -> SessionState {
    let mut next = state.clone();

    if state.status == SessionStatus::Unauthorized
        && !matches!(event, SessionEvent::Reset | SessionEvent::Awareness(_))
    {
        return next;
    }

    match event {
        SessionEvent::Reset => {
            next = SessionState::new(state.document_id.clone(), state.editable);
        }
        SessionEvent::CacheLoaded => {
            next.is_local_cache_loaded = true;
            if state.status == SessionStatus::Loading {
                next.status = if state.editable {
                    SessionStatus::Connecting
                } else {
                    SessionStatus::Readonly
                };
            }
        }
        SessionEvent::Connected => {
            if state.editable {
                next.status = SessionStatus::Collaborating;
                next.error = None;
                next.last_synced_at = Some(now);
            }
        }
        // Debounced by the supervisor's grace timer.
        SessionEvent::Disconnected => {}
        SessionEvent::GraceElapsed => {
            if matches!(state.status, SessionStatus::Collaborating | SessionStatus::Connecting) {
                next.status = SessionStatus::Offline;
                next.error = Some(OFFLINE_MESSAGE.to_string());
            }
        }
        SessionEvent::ConnectTimeout => {
            if matches!(state.status, SessionStatus::Loading | SessionStatus::Connecting) {
                next.status = SessionStatus::Error;
                next.error = Some(CONNECT_TIMEOUT_MESSAGE.to_string());
            }
        }
        SessionEvent::Synced { unsynced } => {
            if unsynced == 0 {
                next.pending_changes = false;
                next.last_synced_at = Some(now);
            }
        }
        SessionEvent::AuthenticationFailed { reason } => {
            next.status = SessionStatus::Unauthorized;
            next.error = Some(if reason.trim().is_empty() {
                UNAUTHORIZED_MESSAGE.to_string()
            } else {
                reason
            });
        }
        SessionEvent::LocalChange { transport_connected } => {
            if !transport_connected {
                next.pending_changes = true;
            }
        }
        SessionEvent::Awareness(states) => {
            next.active_users = collapse(&states);
        }
    }

    next
}

#[cfg(test)]
mod tests {
    use super::*;

    fn editable() -> SessionState {
        SessionState::new("doc", true)
    }

    fn run(state: SessionState, events: Vec<SessionEvent>) -> SessionState {
        events.into_iter().fold(state, |s, e| reduce(&s, e, 1_000))
    }

    #[test]
    fn test_happy_path() {
        let state = run(editable(), vec![SessionEvent::CacheLoaded]);
        assert_eq!(state.status, SessionStatus::Connecting);
        assert!(state.is_local_cache_loaded);

        let state = reduce(&state, SessionEvent::Connected, 42);
        assert_eq!(state.status, SessionStatus::Collaborating);
        assert_eq!(state.last_synced_at, Some(42));
        assert!(state.error.is_none());
    }

    #[test]
    fn test_read_only_cache_load() {
        let state = run(SessionState::new("doc", false), vec![SessionEvent::CacheLoaded, SessionEvent::Connected]);
        assert_eq!(state.status, SessionStatus::Readonly);
        assert!(state.last_synced_at.is_none());
    }

    #[test]
    fn test_timeout_only_while_connecting() {
        let state = run(editable(), vec![SessionEvent::CacheLoaded, SessionEvent::ConnectTimeout]);
        assert_eq!(state.status, SessionStatus::Error);
        assert_eq!(state.error.as_deref(), Some(CONNECT_TIMEOUT_MESSAGE));

        let state = run(
            editable(),
            vec![SessionEvent::CacheLoaded, SessionEvent::Connected, SessionEvent::ConnectTimeout],
        );
        assert_eq!(state.status, SessionStatus::Collaborating);
    }

    #[test]
    fn test_reconnect_clears_error() {
        let state = run(
            editable(),
            vec![SessionEvent::CacheLoaded, SessionEvent::ConnectTimeout, SessionEvent::Connected],
        );
        assert_eq!(state.status, SessionStatus::Collaborating);
        assert!(state.error.is_none());
    }

    #[test]
    fn test_disconnect_alone_keeps_status() {
        let state = run(
            editable(),
            vec![SessionEvent::CacheLoaded, SessionEvent::Connected, SessionEvent::Disconnected],
        );
        assert_eq!(state.status, SessionStatus::Collaborating);

        let state = reduce(&state, SessionEvent::GraceElapsed, 0);
        assert_eq!(state.status, SessionStatus::Offline);
        assert!(state.error.is_some());
    }

    #[test]
    fn test_unauthorized_is_terminal() {
        let state = run(
            editable(),
            vec![
                SessionEvent::CacheLoaded,
                SessionEvent::AuthenticationFailed { reason: "token revoked".into() },
                SessionEvent::Connected,
                SessionEvent::ConnectTimeout,
            ],
        );
        assert_eq!(state.status, SessionStatus::Unauthorized);
        assert_eq!(state.error.as_deref(), Some("token revoked"));

        let state = reduce(&state, SessionEvent::Reset, 0);
        assert_eq!(state.status, SessionStatus::Loading);
        assert!(state.error.is_none());
    }

    #[test]
    fn test_pending_changes() {
        let state = run(
            editable(),
            vec![SessionEvent::CacheLoaded, SessionEvent::LocalChange { transport_connected: false }],
        );
        assert!(state.pending_changes);

        let state = reduce(&state, SessionEvent::Synced { unsynced: 2 }, 0);
        assert!(state.pending_changes);
        let state = reduce(&state, SessionEvent::Synced { unsynced: 0 }, 7);
        assert!(!state.pending_changes);
        assert_eq!(state.last_synced_at, Some(7));
    }

    #[test]
    fn test_local_change_while_connected_not_pending() {
        let state = reduce(&editable(), SessionEvent::LocalChange { transport_connected: true }, 0);
        assert!(!state.pending_changes);
    }

    #[test]
    fn test_awareness_dedup() {
        let states = vec![
            AwarenessState::new("1", "Ada", Some("ada@example.com".into())).with_last_active(1),
            AwarenessState::new("2", "Ada", Some("ada@example.com".into())).with_last_active(5),
        ];
        let state = reduce(&editable(), SessionEvent::Awareness(states), 0);
        assert_eq!(state.active_users.len(), 1);
        assert_eq!(state.active_users["ada@example.com"].last_active, 5);
    }

    #[test]
    fn test_terminal_statuses_carry_message() {
        for event in [
            SessionEvent::ConnectTimeout,
            SessionEvent::AuthenticationFailed { reason: String::new() },
        ] {
            let state = run(editable(), vec![SessionEvent::CacheLoaded, event]);
            assert!(state.status.needs_message());
            assert!(state.error.as_deref().is_some_and(|e| !e.is_empty()));
        }
    }
}
