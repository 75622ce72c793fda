//! End-to-end tests for the tree store against in-process document services.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use folio_core::api::{CoverUpdate, CreateDocument, DocumentPatch};
use folio_core::node::CoverImage;
use folio_core::tree;
use folio_core::{
    ApiError, DocumentApi, DocumentDetail, DocumentNode, FlatDocumentRecord, MemoryDocumentApi, MoveRequest,
    MoveResult, TreeError, TreeStore,
};

/// Serves fixed answers and counts move calls.
struct ScriptedApi {
    roots: Vec<DocumentNode>,
    move_result: MoveResult,
    move_calls: Mutex<usize>,
}

#[async_trait]
impl DocumentApi for ScriptedApi {
    async fn get_children(&self, parent_id: Option<&str>) -> Result<Vec<DocumentNode>, ApiError> {
        match parent_id {
            None => Ok(self.roots.clone()),
            Some(_) => Ok(Vec::new()),
        }
    }

    async fn get_nested_tree(&self, _root_id: Option<&str>) -> Result<Vec<FlatDocumentRecord>, ApiError> {
        Ok(Vec::new())
    }

    async fn get_document(&self, id: &str) -> Result<DocumentDetail, ApiError> {
        Err(ApiError::NotFound(id.to_string()))
    }

    async fn create(&self, _input: CreateDocument) -> Result<DocumentNode, ApiError> {
        Err(ApiError::BadRequest("scripted".into()))
    }

    async fn update(&self, _id: &str, _patch: DocumentPatch) -> Result<(), ApiError> {
        Ok(())
    }

    async fn delete(&self, _id: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn duplicate(&self, id: &str) -> Result<DocumentNode, ApiError> {
        Err(ApiError::Network(format!("duplicate {id} timed out")))
    }

    async fn move_document(&self, _request: &MoveRequest) -> Result<MoveResult, ApiError> {
        *self.move_calls.lock().unwrap() += 1;
        Ok(self.move_result.clone())
    }

    async fn update_cover(&self, _id: &str, _cover: CoverUpdate) -> Result<CoverImage, ApiError> {
        Err(ApiError::BadRequest("scripted".into()))
    }

    async fn remove_cover(&self, _id: &str) -> Result<(), ApiError> {
        Ok(())
    }
}

/// Delegates to the memory backend; while `stalled`, record edits hang.
struct StallingApi {
    inner: Arc<MemoryDocumentApi>,
    stalled: AtomicBool,
}

impl StallingApi {
    async fn maybe_stall(&self) {
        if self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }
}

#[async_trait]
impl DocumentApi for StallingApi {
    async fn get_children(&self, parent_id: Option<&str>) -> Result<Vec<DocumentNode>, ApiError> {
        self.inner.get_children(parent_id).await
    }

    async fn get_nested_tree(&self, root_id: Option<&str>) -> Result<Vec<FlatDocumentRecord>, ApiError> {
        self.inner.get_nested_tree(root_id).await
    }

    async fn get_document(&self, id: &str) -> Result<DocumentDetail, ApiError> {
        self.inner.get_document(id).await
    }

    async fn create(&self, input: CreateDocument) -> Result<DocumentNode, ApiError> {
        self.inner.create(input).await
    }

    async fn update(&self, id: &str, patch: DocumentPatch) -> Result<(), ApiError> {
        self.maybe_stall().await;
        self.inner.update(id, patch).await
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.inner.delete(id).await
    }

    async fn duplicate(&self, id: &str) -> Result<DocumentNode, ApiError> {
        self.inner.duplicate(id).await
    }

    async fn move_document(&self, request: &MoveRequest) -> Result<MoveResult, ApiError> {
        self.inner.move_document(request).await
    }

    async fn update_cover(&self, id: &str, cover: CoverUpdate) -> Result<CoverImage, ApiError> {
        self.maybe_stall().await;
        self.inner.update_cover(id, cover).await
    }

    async fn remove_cover(&self, id: &str) -> Result<(), ApiError> {
        self.maybe_stall().await;
        self.inner.remove_cover(id).await
    }
}

fn count_occurrences(nodes: &[DocumentNode], id: &str) -> usize {
    nodes
        .iter()
        .map(|n| {
            let own = usize::from(n.id == id);
            own + n.children.as_deref().map_or(0, |c| count_occurrences(c, id))
        })
        .sum()
}

fn workspace() -> Arc<MemoryDocumentApi> {
    let api = Arc::new(MemoryDocumentApi::new());
    api.seed("a", "A", None);
    api.seed("b", "B", None);
    api.seed("a1", "A1", Some("a"));
    api.seed("a2", "A2", Some("a"));
    api.seed("b1", "B1", Some("b"));
    api
}

#[tokio::test]
async fn test_move_into_empty_folder_end_to_end() {
    let folder = DocumentNode::new("1", "A").with_children(Vec::new());
    let page = DocumentNode::new("2", "B").with_position(1);
    let api = Arc::new(ScriptedApi {
        roots: vec![folder, page],
        move_result: MoveResult::Reparented {
            old_tree: Vec::new(),
            new_tree: vec![DocumentNode::new("2", "B").with_parent("1")],
        },
        move_calls: Mutex::new(0),
    });
    let mut store = TreeStore::new(api.clone());
    store.load_children(None).await.unwrap();

    store.move_document(MoveRequest::new("2", "1", 0)).await.unwrap();

    let state = store.snapshot();
    assert_eq!(state.tree_data.len(), 1);
    let root = &state.tree_data[0];
    assert_eq!(root.id, "1");
    let children = root.children.as_ref().unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, "2");
    assert_eq!(children[0].parent_id.as_deref(), Some("1"));
    assert!(state.expanded_keys.contains("1"));
    assert_eq!(*api.move_calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_self_move_never_reaches_api() {
    let api = Arc::new(ScriptedApi {
        roots: vec![DocumentNode::new("x", "X")],
        move_result: MoveResult::Reordered(Vec::new()),
        move_calls: Mutex::new(0),
    });
    let mut store = TreeStore::new(api.clone());
    store.load_children(None).await.unwrap();

    let err = store.move_document(MoveRequest::new("x", "x", 1)).await.unwrap_err();
    assert!(matches!(err, TreeError::InvalidMove { .. }));
    assert_eq!(*api.move_calls.lock().unwrap(), 0);
    assert_eq!(store.snapshot().tree_data.len(), 1);
}

#[tokio::test]
async fn test_duplicate_failure_has_user_message() {
    let api = Arc::new(ScriptedApi {
        roots: vec![DocumentNode::new("x", "X")],
        move_result: MoveResult::Reordered(Vec::new()),
        move_calls: Mutex::new(0),
    });
    let mut store = TreeStore::new(api);
    store.load_children(None).await.unwrap();

    match store.duplicate("x").await {
        Err(TreeError::DuplicateFailed(message)) => assert!(message.starts_with("Failed to duplicate")),
        other => panic!("Expected DuplicateFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_reorder_within_parent_does_not_duplicate() {
    let api = workspace();
    let mut store = TreeStore::new(api);
    store.load_children(None).await.unwrap();
    store.load_children(Some("a")).await.unwrap();

    store.move_document(MoveRequest::new("a2", "a1", -1)).await.unwrap();
    let state = store.snapshot();
    let ids: Vec<_> = tree::children_of(&state.tree_data, Some("a"))
        .unwrap()
        .iter()
        .map(|n| n.id.clone())
        .collect();
    assert_eq!(ids, vec!["a2", "a1"]);

    // Dropping it back where it already is.
    store.move_document(MoveRequest::new("a2", "a1", -1)).await.unwrap();
    let state = store.snapshot();
    assert_eq!(count_occurrences(&state.tree_data, "a2"), 1);
    assert_eq!(tree::children_of(&state.tree_data, Some("a")).unwrap().len(), 2);
}

#[tokio::test]
async fn test_cross_parent_move_carries_loaded_subtree() {
    let api = workspace();
    let mut store = TreeStore::new(api);
    store.load_children(None).await.unwrap();
    store.load_children(Some("a")).await.unwrap();
    store.load_children(Some("b")).await.unwrap();

    store.move_document(MoveRequest::new("b", "a", 0)).await.unwrap();

    let state = store.snapshot();
    assert_eq!(state.tree_data.len(), 1);
    let moved = tree::find(&state.tree_data, "b").unwrap();
    assert_eq!(moved.parent_id.as_deref(), Some("a"));
    assert_eq!(moved.children.as_ref().map(Vec::len), Some(1));
    assert_eq!(count_occurrences(&state.tree_data, "b"), 1);
    assert_eq!(tree::find_parent_id(&state.tree_data, "b1").as_deref(), Some("b"));
}

#[tokio::test]
async fn test_move_last_child_out_marks_source_leaf() {
    let api = workspace();
    let mut store = TreeStore::new(api);
    store.load_children(None).await.unwrap();
    store.load_children(Some("b")).await.unwrap();

    store.move_document(MoveRequest::new("b1", "a", 1)).await.unwrap();

    let state = store.snapshot();
    let source = tree::find(&state.tree_data, "b").unwrap();
    assert!(source.is_leaf);
    assert!(!source.has_loaded_children());
    assert_eq!(count_occurrences(&state.tree_data, "b1"), 1);
    let roots: Vec<_> = state.tree_data.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(roots, vec!["a", "b1", "b"]);
}

#[tokio::test]
async fn test_moving_current_document_refetches_it() {
    let api = workspace();
    let mut store = TreeStore::new(api);
    store.load_children(None).await.unwrap();
    store.load_children(Some("a")).await.unwrap();
    store.set_current_document_id(Some("b")).await.unwrap();
    assert_eq!(store.snapshot().current_document.unwrap().parent_id, None);

    store.move_document(MoveRequest::new("b", "a", 0)).await.unwrap();
    let current = store.snapshot().current_document.unwrap();
    assert_eq!(current.parent_id.as_deref(), Some("a"));
}

#[tokio::test]
async fn test_delete_returns_parent() {
    let api = workspace();
    let mut store = TreeStore::new(api);
    store.load_children(None).await.unwrap();
    store.load_children(Some("a")).await.unwrap();

    assert_eq!(store.delete("a1").await.unwrap(), "a");
    assert!(store.find("a1").is_none());
}

#[tokio::test]
async fn test_delete_root_returns_first_sibling() {
    let api = workspace();
    let mut store = TreeStore::new(api);
    store.load_children(None).await.unwrap();

    assert_eq!(store.delete("a").await.unwrap(), "b");
}

#[tokio::test]
async fn test_delete_last_child_marks_parent_leaf() {
    let api = workspace();
    let mut store = TreeStore::new(api);
    store.load_children(None).await.unwrap();
    store.load_children(Some("b")).await.unwrap();
    store.set_expanded("b1", true);

    store.delete("b1").await.unwrap();
    let parent = store.find("b").unwrap();
    assert!(parent.is_leaf);
    assert_eq!(parent.children, Some(Vec::new()));
    assert!(!store.is_expanded("b1"));
}

#[tokio::test]
async fn test_delete_last_document_creates_untitled() {
    let api = Arc::new(MemoryDocumentApi::new());
    api.seed("only", "Only", None);
    let mut store = TreeStore::new(api.clone());
    store.load_children(None).await.unwrap();
    store.set_current_document_id(Some("only")).await.unwrap();

    let next = store.delete("only").await.unwrap();

    let state = store.snapshot();
    assert_eq!(state.tree_data.len(), 1);
    let fresh = &state.tree_data[0];
    assert_eq!(fresh.id, next);
    assert_eq!(fresh.title, "Untitled");
    assert_eq!(fresh.parent_id, None);
    assert!(state.current_document_id.is_none());
    assert_eq!(api.len(), 1);
}

#[tokio::test]
async fn test_delete_failure_keeps_node() {
    let api = workspace();
    let mut store = TreeStore::new(api.clone());
    store.load_children(None).await.unwrap();

    api.fail_next(ApiError::Forbidden("b".into()));
    let err = store.delete("b").await.unwrap_err();
    assert!(matches!(err, TreeError::Api(ApiError::Forbidden(_))));
    assert!(store.find("b").is_some());
    assert_eq!(api.len(), 5);
}

#[tokio::test]
async fn test_nested_subtree_expands_path() {
    let api = workspace();
    api.seed("deep", "Deep", Some("a1"));
    let mut store = TreeStore::new(api);

    store.load_nested_subtree(Some("deep")).await.unwrap();

    let state = store.snapshot();
    assert!(state.expanded_keys.contains("a"));
    assert!(state.expanded_keys.contains("a1"));
    assert!(tree::find(&state.tree_data, "deep").is_some());
    assert_eq!(tree::find_parent_id(&state.tree_data, "deep").as_deref(), Some("a1"));
}

#[tokio::test]
async fn test_duplicate_lands_after_source() {
    let api = workspace();
    let mut store = TreeStore::new(api);
    store.load_children(None).await.unwrap();
    store.load_children(Some("a")).await.unwrap();

    let copy = store.duplicate("a1").await.unwrap();
    let state = store.snapshot();
    let ids: Vec<_> = tree::children_of(&state.tree_data, Some("a"))
        .unwrap()
        .iter()
        .map(|n| n.id.clone())
        .collect();
    assert_eq!(ids, vec!["a1".to_string(), copy, "a2".to_string()]);
    assert!(state.expanded_keys.contains("a"));
}

#[tokio::test]
async fn test_loading_flag_observed_by_subscribers() {
    let api = workspace();
    let mut store = TreeStore::new(api);
    let mut rx = store.subscribe();

    store.load_children(None).await.unwrap();

    assert!(rx.has_changed().unwrap());
    let state = rx.borrow_and_update().clone();
    assert!(!state.loading);
    assert_eq!(state.tree_data.len(), 2);
}

#[tokio::test]
async fn test_record_edits_report_loading_while_in_flight() {
    let inner = workspace();
    let api = Arc::new(StallingApi {
        inner: inner.clone(),
        stalled: AtomicBool::new(true),
    });
    let mut store = TreeStore::new(api.clone());
    store.load_children(None).await.unwrap();
    let rx = store.subscribe();
    let cover = || CoverUpdate {
        url: Some("cover.png".into()),
        ..Default::default()
    };

    let pending = tokio::time::timeout(Duration::from_millis(50), store.rename("a", "Renamed")).await;
    assert!(pending.is_err());
    assert!(rx.borrow().loading);

    let pending = tokio::time::timeout(Duration::from_millis(50), store.update_cover("a", cover())).await;
    assert!(pending.is_err());
    assert!(rx.borrow().loading);

    let pending = tokio::time::timeout(Duration::from_millis(50), store.remove_cover("a")).await;
    assert!(pending.is_err());
    assert!(rx.borrow().loading);

    api.stalled.store(false, Ordering::SeqCst);
    store.rename("a", "Renamed").await.unwrap();
    assert!(!rx.borrow().loading);
    assert_eq!(store.find("a").unwrap().title, "Renamed");

    store.update_cover("a", cover()).await.unwrap();
    assert!(!rx.borrow().loading);
    store.remove_cover("a").await.unwrap();
    assert!(!rx.borrow().loading);
    assert!(store.find("a").unwrap().cover_image.is_none());

    inner.fail_next(ApiError::Network("offline".into()));
    assert!(store.rename("a", "Lost").await.is_err());
    assert!(!rx.borrow().loading);
    assert_eq!(store.find("a").unwrap().title, "Renamed");
}
