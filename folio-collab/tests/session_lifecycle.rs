//! Session lifecycle tests against a scripted transport.
//!
//! The transport never touches the network; each test drives it by pushing
//! `TransportEvent`s and inspects what the supervisor asked of it. Timers
//! run on tokio's paused clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use folio_collab::status::{CONNECT_TIMEOUT_MESSAGE, UNAUTHORIZED_MESSAGE};
use folio_collab::{
    AwarenessState, LocalCache, MemoryCache, ReplicatedDocument, SessionRegistry, SessionStatus, SupervisorConfig,
    Transport, TransportEvent, TransportFactory, TransportStatus,
};
use tokio::sync::mpsc;
use tokio::time::sleep;

// ─── Scripted transport ──────────────────────────────────────────────────────

#[derive(Default)]
struct CallLog {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    destroys: AtomicUsize,
    connected: AtomicBool,
    updates: Mutex<Vec<Vec<u8>>>,
    awareness: Mutex<Vec<AwarenessState>>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl CallLog {
    fn emit(&self, event: TransportEvent) {
        match &event {
            TransportEvent::Connected => self.connected.store(true, Ordering::SeqCst),
            TransportEvent::Disconnected | TransportEvent::AuthenticationFailed { .. } => {
                self.connected.store(false, Ordering::SeqCst)
            }
            _ => {}
        }
        let tx = self.events.lock().unwrap().clone().expect("transport created");
        tx.try_send(event).unwrap();
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }
}

struct ScriptedTransport {
    log: Arc<CallLog>,
    rx: Option<mpsc::Receiver<TransportEvent>>,
}

impl Transport for ScriptedTransport {
    fn status(&self) -> TransportStatus {
        if self.log.connected.load(Ordering::SeqCst) {
            TransportStatus::Connected
        } else {
            TransportStatus::Disconnected
        }
    }

    fn connect(&mut self) {
        self.log.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn disconnect(&mut self) {
        self.log.disconnects.fetch_add(1, Ordering::SeqCst);
        self.log.connected.store(false, Ordering::SeqCst);
    }

    fn destroy(&mut self) {
        self.log.destroys.fetch_add(1, Ordering::SeqCst);
        self.log.connected.store(false, Ordering::SeqCst);
    }

    fn send_update(&mut self, update: Vec<u8>) {
        self.log.updates.lock().unwrap().push(update);
    }

    fn send_awareness(&mut self, state: AwarenessState) {
        self.log.awareness.lock().unwrap().push(state);
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.rx.take()
    }
}

#[derive(Default)]
struct ScriptedFactory {
    logs: Mutex<HashMap<String, Arc<CallLog>>>,
}

impl ScriptedFactory {
    fn calls(&self, document_id: &str) -> Arc<CallLog> {
        self.logs.lock().unwrap()[document_id].clone()
    }
}

impl TransportFactory for ScriptedFactory {
    fn create(&self, document_id: &str, _document: Arc<ReplicatedDocument>) -> Box<dyn Transport> {
        let (tx, rx) = mpsc::channel(64);
        let log = Arc::new(CallLog::default());
        *log.events.lock().unwrap() = Some(tx);
        self.logs.lock().unwrap().insert(document_id.to_string(), log.clone());
        Box::new(ScriptedTransport { log, rx: Some(rx) })
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn registry() -> (SessionRegistry, Arc<ScriptedFactory>, Arc<MemoryCache>) {
    let factory = Arc::new(ScriptedFactory::default());
    let cache = Arc::new(MemoryCache::new());
    let registry = SessionRegistry::with_config(factory.clone(), cache.clone(), SupervisorConfig::default());
    (registry, factory, cache)
}

/// Let the supervisor task drain its queues.
async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

fn status(registry: &SessionRegistry, id: &str) -> SessionStatus {
    registry.state(id).unwrap().status
}

// ─── Connect timeout ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_fires_once() {
    let (mut registry, factory, _) = registry();
    let mut rx = registry.open("doc", true).subscribe();
    settle().await;

    assert_eq!(status(&registry, "doc"), SessionStatus::Connecting);
    assert_eq!(factory.calls("doc").connects(), 1);

    sleep(Duration::from_millis(9_900)).await;
    assert_eq!(status(&registry, "doc"), SessionStatus::Connecting);

    sleep(Duration::from_millis(200)).await;
    let state = rx.borrow_and_update().clone();
    assert_eq!(state.status, SessionStatus::Error);
    assert_eq!(state.error.as_deref(), Some(CONNECT_TIMEOUT_MESSAGE));

    let again = tokio::time::timeout(Duration::from_secs(60), rx.changed()).await;
    assert!(again.is_err(), "no further transitions after the timeout");
}

#[tokio::test(start_paused = true)]
async fn test_handshake_cancels_connect_timeout() {
    let (mut registry, factory, _) = registry();
    registry.open("doc", true);
    settle().await;

    sleep(Duration::from_secs(4)).await;
    factory.calls("doc").emit(TransportEvent::Connected);
    settle().await;

    let state = registry.state("doc").unwrap();
    assert_eq!(state.status, SessionStatus::Collaborating);
    assert!(state.last_synced_at.is_some());

    sleep(Duration::from_secs(30)).await;
    assert_eq!(status(&registry, "doc"), SessionStatus::Collaborating);
}

#[tokio::test(start_paused = true)]
async fn test_late_connect_recovers_from_timeout() {
    let (mut registry, factory, _) = registry();
    registry.open("doc", true);
    sleep(Duration::from_secs(11)).await;
    assert_eq!(status(&registry, "doc"), SessionStatus::Error);

    factory.calls("doc").emit(TransportEvent::Connected);
    settle().await;

    let state = registry.state("doc").unwrap();
    assert_eq!(state.status, SessionStatus::Collaborating);
    assert!(state.error.is_none());
}

// ─── Disconnect grace ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_short_disconnect_is_suppressed() {
    let (mut registry, factory, _) = registry();
    registry.open("doc", true);
    settle().await;
    let log = factory.calls("doc");
    log.emit(TransportEvent::Connected);
    settle().await;

    log.emit(TransportEvent::Disconnected);
    sleep(Duration::from_millis(2_000)).await;
    assert_eq!(status(&registry, "doc"), SessionStatus::Collaborating);

    log.emit(TransportEvent::Connected);
    sleep(Duration::from_secs(5)).await;
    assert_eq!(status(&registry, "doc"), SessionStatus::Collaborating);
}

#[tokio::test(start_paused = true)]
async fn test_long_disconnect_goes_offline() {
    let (mut registry, factory, _) = registry();
    registry.open("doc", true);
    settle().await;
    let log = factory.calls("doc");
    log.emit(TransportEvent::Connected);
    settle().await;

    log.emit(TransportEvent::Disconnected);
    sleep(Duration::from_millis(3_100)).await;

    let state = registry.state("doc").unwrap();
    assert_eq!(state.status, SessionStatus::Offline);
    assert!(state.error.as_deref().is_some_and(|e| !e.is_empty()));

    log.emit(TransportEvent::Connected);
    settle().await;
    assert_eq!(status(&registry, "doc"), SessionStatus::Collaborating);
}

// ─── Presence, pending changes, auth ─────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_presence_collapses_by_email() {
    let (mut registry, factory, _) = registry();
    registry.open("doc", true);
    settle().await;

    factory.calls("doc").emit(TransportEvent::Awareness(vec![
        AwarenessState::new("11", "Ada", Some("ada@example.com".into())).with_last_active(100),
        AwarenessState::new("12", "Ada", Some("ada@example.com".into())).with_last_active(300),
        AwarenessState::new("13", "Guest", None).with_last_active(200),
    ]));
    settle().await;

    let users = registry.state("doc").unwrap().active_users;
    assert_eq!(users.len(), 2);
    assert_eq!(users["ada@example.com"].last_active, 300);
    assert_eq!(users["ada@example.com"].client_id, "12");
    assert!(users.contains_key("13"));
}

#[tokio::test(start_paused = true)]
async fn test_local_user_announced() {
    let (mut registry, factory, _) = registry();
    registry.set_local_user(AwarenessState::new("me", "Me", Some("me@example.com".into())));
    registry.open("doc", true);
    settle().await;

    let announced = factory.calls("doc").awareness.lock().unwrap().clone();
    assert_eq!(announced.len(), 1);
    assert_eq!(announced[0].name, "Me");
}

#[tokio::test(start_paused = true)]
async fn test_offline_edits_mark_pending_until_synced() {
    let (mut registry, factory, cache) = registry();
    let document = registry.open("doc", true).document();
    settle().await;

    document.insert(0, "offline edit");
    settle().await;

    let state = registry.state("doc").unwrap();
    assert!(state.pending_changes);
    let log = factory.calls("doc");
    assert_eq!(log.updates.lock().unwrap().len(), 1);
    assert!(cache.load("doc").unwrap().is_some());

    log.emit(TransportEvent::Connected);
    log.emit(TransportEvent::Synced { unsynced: 1 });
    settle().await;
    assert!(registry.state("doc").unwrap().pending_changes);

    log.emit(TransportEvent::Synced { unsynced: 0 });
    settle().await;
    assert!(!registry.state("doc").unwrap().pending_changes);
}

#[tokio::test(start_paused = true)]
async fn test_connected_edits_not_pending() {
    let (mut registry, factory, _) = registry();
    let document = registry.open("doc", true).document();
    settle().await;
    factory.calls("doc").emit(TransportEvent::Connected);
    settle().await;

    document.insert(0, "live edit");
    settle().await;
    assert!(!registry.state("doc").unwrap().pending_changes);
}

#[tokio::test(start_paused = true)]
async fn test_auth_failure_is_terminal_until_reset() {
    let (mut registry, factory, _) = registry();
    registry.open("doc", true);
    settle().await;
    let log = factory.calls("doc");

    log.emit(TransportEvent::AuthenticationFailed { reason: String::new() });
    settle().await;

    let state = registry.state("doc").unwrap();
    assert_eq!(state.status, SessionStatus::Unauthorized);
    assert_eq!(state.error.as_deref(), Some(UNAUTHORIZED_MESSAGE));
    assert_eq!(log.disconnects.load(Ordering::SeqCst), 1);

    // Connect timer was cleared with the rejection.
    sleep(Duration::from_secs(20)).await;
    assert_eq!(status(&registry, "doc"), SessionStatus::Unauthorized);

    assert!(registry.reset("doc"));
    settle().await;
    assert_eq!(status(&registry, "doc"), SessionStatus::Connecting);
    assert_eq!(log.connects(), 2);
}

// ─── Read-only and editability ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_read_only_skips_connection() {
    let (mut registry, factory, _) = registry();
    registry.open("doc", false);
    settle().await;

    let state = registry.state("doc").unwrap();
    assert_eq!(state.status, SessionStatus::Readonly);
    assert!(state.is_local_cache_loaded);
    assert_eq!(factory.calls("doc").connects(), 0);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(status(&registry, "doc"), SessionStatus::Readonly);
}

#[tokio::test(start_paused = true)]
async fn test_toggle_editable_keeps_subscribers() {
    let (mut registry, factory, _) = registry();
    let mut rx = registry.open("doc", false).subscribe();
    settle().await;
    assert_eq!(rx.borrow_and_update().status, SessionStatus::Readonly);

    assert!(registry.set_editable("doc", true));
    settle().await;

    assert!(rx.has_changed().unwrap());
    let state = rx.borrow_and_update().clone();
    assert!(state.editable);
    assert_eq!(state.status, SessionStatus::Connecting);
    assert_eq!(factory.calls("doc").connects(), 1);
    assert_eq!(registry.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cached_body_restored_before_network() {
    let (mut registry, _, cache) = registry();
    let seed = ReplicatedDocument::new();
    seed.set_content("from last session");
    cache.store_update("doc", &seed.encode_state()).unwrap();

    let document = registry.open("doc", false).document();
    settle().await;

    assert_eq!(document.content(), "from last session");
    assert!(registry.state("doc").unwrap().is_local_cache_loaded);
}

// ─── Registry teardown ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_switch_tears_down_previous_session() {
    let (mut registry, factory, _) = registry();
    let a_rx = registry.switch_to("a", true).subscribe();
    settle().await;

    registry.switch_to("b", true);
    // Torn down within the call, before the old task gets polled again.
    assert_eq!(factory.calls("a").destroys(), 1);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.active_document(), Some("b"));
    assert!(registry.get("a").is_none());

    settle().await;
    assert_eq!(factory.calls("a").destroys(), 1);

    // The old session's connect timer never fires.
    sleep(Duration::from_secs(20)).await;
    assert_eq!(a_rx.borrow().status, SessionStatus::Connecting);
    assert_eq!(status(&registry, "b"), SessionStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn test_fast_navigation_leaves_one_session() {
    let (mut registry, factory, _) = registry();
    for id in ["a", "b", "c", "a", "d"] {
        registry.switch_to(id, true);
    }
    for id in ["b", "c"] {
        assert_eq!(factory.calls(id).destroys(), 1);
    }
    settle().await;

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.active_document(), Some("d"));
    assert_eq!(factory.calls("d").connects(), 1);
    for id in ["b", "c"] {
        assert_eq!(factory.calls(id).destroys(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_open_reuses_session() {
    let (mut registry, factory, _) = registry();
    let first = registry.open("doc", true).document();
    let second = registry.open("doc", true).document();
    settle().await;

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(factory.calls("doc").connects(), 1);

    assert!(registry.close("doc"));
    assert_eq!(factory.calls("doc").destroys(), 1);
    assert!(!registry.close("doc"));
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_close_detaches_document() {
    let (mut registry, _, cache) = registry();
    let document = registry.open("doc", true).document();
    settle().await;
    document.insert(0, "kept");
    settle().await;

    registry.close("doc");
    document.insert(4, " dropped");
    settle().await;

    let cached = cache.load("doc").unwrap().unwrap();
    let replica = ReplicatedDocument::new();
    replica.apply_update(&cached).unwrap();
    assert_eq!(replica.content(), "kept");
}
