//! Folio demo: a workspace tree plus collaboration sessions, wired to the
//! in-memory backend.
//!
//! Environment:
//! - `FOLIO_SERVER_URL`: collaboration server base URL
//! - `FOLIO_CACHE_PATH`: directory of the local document cache
//! - `RUST_LOG`: log verbosity

mod state;

use std::path::PathBuf;
use std::sync::Arc;

use folio_collab::{CacheConfig, LocalCache, MemoryCache, RocksCache, TransportConfig, WsTransportFactory};
use folio_core::api::MoveRequest;
use folio_core::{MemoryDocumentApi, Permission, TreeError};
use log::{info, warn};
use state::AppState;

fn open_cache() -> Arc<dyn LocalCache> {
    let mut config = CacheConfig::default();
    if let Ok(path) = std::env::var("FOLIO_CACHE_PATH") {
        config.path = PathBuf::from(path);
    }
    match RocksCache::open(config) {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            warn!("Local cache unavailable ({e}); using memory cache");
            Arc::new(MemoryCache::new())
        }
    }
}

fn print_tree(app: &AppState) {
    fn walk(nodes: &[folio_core::DocumentNode], depth: usize) {
        for node in nodes {
            info!("{}{} ({})", "  ".repeat(depth), node.title, node.id);
            if let Some(children) = &node.children {
                walk(children, depth + 1);
            }
        }
    }
    walk(&app.tree.state().tree_data, 0);
}

#[tokio::main]
async fn main() -> Result<(), TreeError> {
    env_logger::init();
    info!("Starting Folio...");

    let mut transport = TransportConfig::default();
    if let Ok(url) = std::env::var("FOLIO_SERVER_URL") {
        transport.server_url = url;
    }

    let api = Arc::new(MemoryDocumentApi::new());
    api.seed("welcome", "Welcome", None);
    api.seed("notes", "Notes", None);
    api.seed("ideas", "Ideas", Some("notes"));

    let mut app = AppState::new(api.clone(), Arc::new(WsTransportFactory::new(transport)), open_cache());

    app.tree.load_children(None).await?;
    app.tree.load_children(Some("notes")).await?;
    print_tree(&app);

    let draft = app.tree.create(Some("notes"), "Draft").await?;
    info!("Created {draft} under notes");

    app.tree.move_document(MoveRequest::new(draft.as_str(), "welcome", 1)).await?;
    info!("Moved {draft} after welcome");
    print_tree(&app);

    let next = app.tree.delete("ideas").await?;
    info!("Deleted ideas, navigating to {next}");
    print_tree(&app);

    // Open a shared page without edit rights; no connection is attempted.
    api.set_permission("welcome", Permission::Read);
    if let Some(session) = app.open_document("welcome").await? {
        info!("Session for {} is {:?}", session.document_id, session.status);
    }
    tokio::task::yield_now().await;
    if let Some(state) = app.sessions.state("welcome") {
        info!(
            "Session for {} settled as {:?} (cache loaded: {})",
            state.document_id, state.status, state.is_local_cache_loaded
        );
    }

    app.close_document().await?;
    info!("Done");
    Ok(())
}
