//! Stateful tree orchestration.
//!
//! `TreeStore` is the single writer of the workspace tree. Each operation
//! sequences an API call and reconciles the server's answer into the local
//! forest through [`crate::tree`].
//!
//! ```text
//!   UI action ──► TreeStore::move_document()
//!                      │  reject self/descendant moves
//!                      ▼
//!                 DocumentApi::move_document()      (loading = true)
//!                      │
//!                      ▼
//!                 tree::merge() into source + destination sibling lists
//!                      │
//!                      ▼
//!                 watch channel ──► subscribers re-render
//! ```
//!
//! Mutations are confirm-then-apply, except `delete`, which removes the node
//! eagerly and restores the pre-delete snapshot if the server refuses.
//! Overlapping mutations of the same node are not queued; callers serialize
//! them (`&mut self` enforces this within one store).

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;

use crate::api::{ApiError, CoverUpdate, CreateDocument, DocumentApi, DocumentPatch, MoveRequest, MoveResult};
use crate::node::{DocumentDetail, DocumentNode};
use crate::tree;

/// User-facing message when the current document cannot be shown.
pub const NOT_AUTHORIZED_MESSAGE: &str = "You do not have access to this document, or it no longer exists.";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("Document not in tree: {0}")]
    NodeNotFound(String),
    #[error("Cannot move {id} onto {target_id}: {reason}")]
    InvalidMove {
        id: String,
        target_id: String,
        reason: String,
    },
    #[error("{0}")]
    DuplicateFailed(String),
}

/// Tree store configuration.
#[derive(Debug, Clone)]
pub struct TreeStoreConfig {
    /// Title of the document created when the last one is deleted.
    pub default_title: String,
}

impl Default for TreeStoreConfig {
    fn default() -> Self {
        Self {
            default_title: "Untitled".to_string(),
        }
    }
}

/// Everything the UI renders from the tree store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeStoreState {
    pub tree_data: Vec<DocumentNode>,
    pub expanded_keys: HashSet<String>,
    pub current_document_id: Option<String>,
    /// The open document, tree fields plus body reference.
    pub current_document: Option<DocumentDetail>,
    pub loading: bool,
    pub error: Option<String>,
}

pub struct TreeStore {
    api: Arc<dyn DocumentApi>,
    config: TreeStoreConfig,
    state: watch::Sender<TreeStoreState>,
}

impl TreeStore {
    pub fn new(api: Arc<dyn DocumentApi>) -> Self {
        Self::with_config(api, TreeStoreConfig::default())
    }

    pub fn with_config(api: Arc<dyn DocumentApi>, config: TreeStoreConfig) -> Self {
        let (state, _) = watch::channel(TreeStoreState::default());
        Self { api, config, state }
    }

    /// Read the current state. Do not hold the guard across an `.await`.
    pub fn state(&self) -> watch::Ref<'_, TreeStoreState> {
        self.state.borrow()
    }

    pub fn snapshot(&self) -> TreeStoreState {
        self.state.borrow().clone()
    }

    /// Receive every subsequent state change, including `loading` flips.
    pub fn subscribe(&self) -> watch::Receiver<TreeStoreState> {
        self.state.subscribe()
    }

    pub fn find(&self, id: &str) -> Option<DocumentNode> {
        tree::find(&self.state.borrow().tree_data, id).cloned()
    }

    fn set_loading(&self, loading: bool) {
        self.state.send_if_modified(|s| {
            let changed = s.loading != loading;
            s.loading = loading;
            changed
        });
    }

    // ─── Expansion ────────────────────────────────────────────────────

    pub fn is_expanded(&self, id: &str) -> bool {
        self.state.borrow().expanded_keys.contains(id)
    }

    pub fn set_expanded(&self, id: &str, expanded: bool) {
        self.state.send_modify(|s| {
            if expanded {
                s.expanded_keys.insert(id.to_string());
            } else {
                s.expanded_keys.remove(id);
            }
        });
    }

    pub fn toggle_expanded(&self, id: &str) -> bool {
        let expanded = !self.is_expanded(id);
        self.set_expanded(id, expanded);
        expanded
    }

    // ─── Loading ──────────────────────────────────────────────────────

    /// Fetch one level of children and reconcile it into the tree.
    ///
    /// On failure the tree is left exactly as it was.
    pub async fn load_children(&mut self, parent_id: Option<&str>) -> Result<(), TreeError> {
        if let Some(parent) = parent_id {
            if self.find(parent).is_none() {
                return Err(TreeError::NodeNotFound(parent.to_string()));
            }
        }

        self.set_loading(true);
        let result = self.api.get_children(parent_id).await;
        self.set_loading(false);

        let children = result.map_err(|e| {
            log::error!("Failed to load children of {parent_id:?}: {e}");
            TreeError::from(e)
        })?;

        self.state.send_modify(|s| {
            let previous = tree::children_of(&s.tree_data, parent_id)
                .map(<[DocumentNode]>::to_vec)
                .unwrap_or_default();
            let merged = tree::merge(&previous, children);
            tree::set_children(&mut s.tree_data, parent_id, merged);
        });
        Ok(())
    }

    /// Fetch a whole subtree in one call and pre-expand the path into it.
    pub async fn load_nested_subtree(&mut self, root_id: Option<&str>) -> Result<(), TreeError> {
        self.set_loading(true);
        let result = self.api.get_nested_tree(root_id).await;
        self.set_loading(false);

        let records = result.map_err(|e| {
            log::error!("Failed to load nested tree for {root_id:?}: {e}");
            TreeError::from(e)
        })?;

        let built = tree::build_from_flat_list(records);
        log::debug!(
            "Loaded nested tree: {} roots, {} expanded",
            built.nodes.len(),
            built.ancestor_ids.len()
        );
        self.state.send_modify(|s| {
            let merged = tree::merge(&s.tree_data, built.nodes);
            s.tree_data = merged;
            s.expanded_keys = built.ancestor_ids;
        });
        Ok(())
    }

    // ─── Mutations ────────────────────────────────────────────────────

    /// Create a document under `parent_id` (or at root) once the server confirms it.
    pub async fn create(&mut self, parent_id: Option<&str>, title: &str) -> Result<String, TreeError> {
        self.set_loading(true);
        let result = self
            .api
            .create(CreateDocument {
                parent_id: parent_id.map(String::from),
                title: title.to_string(),
                content: None,
            })
            .await;
        self.set_loading(false);

        let node = result.map_err(|e| {
            log::error!("Failed to create document under {parent_id:?}: {e}");
            TreeError::from(e)
        })?;
        let id = node.id.clone();

        let parent_loaded = parent_id.map(|p| self.find(p).map(|n| n.children.is_some()));
        match parent_loaded {
            None | Some(Some(true)) => {
                self.state.send_modify(|s| {
                    if !tree::insert_child(&mut s.tree_data, parent_id, node) {
                        log::warn!("Parent {parent_id:?} vanished before insert");
                    }
                });
            }
            Some(Some(false)) => {
                // Inserting alone would hide the siblings we never fetched.
                if self.load_children(parent_id).await.is_err() {
                    self.state.send_modify(|s| {
                        tree::insert_child(&mut s.tree_data, parent_id, node);
                    });
                }
                if let Some(parent) = parent_id {
                    self.state.send_modify(|s| {
                        if let Some(p) = tree::find_mut(&mut s.tree_data, parent) {
                            p.is_leaf = false;
                        }
                    });
                }
            }
            Some(None) => log::warn!("Created {id} under {parent_id:?}, which is not in the local tree"),
        }

        if let Some(parent) = parent_id {
            self.set_expanded(parent, true);
        }
        log::info!("Created document {id}");
        Ok(id)
    }

    /// Delete `id` and return the id the UI should navigate to.
    ///
    /// The node disappears locally before the server answers; if the server
    /// refuses, the pre-delete tree is restored. When the last document is
    /// deleted a fresh default document is created so the workspace is never
    /// empty.
    pub async fn delete(&mut self, id: &str) -> Result<String, TreeError> {
        let (snapshot, parent_id, removed_ids) = {
            let state = self.state.borrow();
            let node = tree::find(&state.tree_data, id).ok_or_else(|| TreeError::NodeNotFound(id.to_string()))?;
            (
                state.tree_data.clone(),
                tree::find_parent_id(&state.tree_data, id),
                tree::subtree_ids(node),
            )
        };

        self.state.send_modify(|s| {
            let nodes = std::mem::take(&mut s.tree_data);
            s.tree_data = tree::remove(nodes, id);
        });

        self.set_loading(true);
        let result = self.api.delete(id).await;
        self.set_loading(false);

        if let Err(e) = result {
            log::error!("Failed to delete document {id}: {e}");
            self.state.send_modify(|s| s.tree_data = snapshot);
            return Err(e.into());
        }

        self.state.send_modify(|s| {
            for removed in &removed_ids {
                s.expanded_keys.remove(removed);
            }
            if s.current_document_id.as_ref().is_some_and(|c| removed_ids.contains(c)) {
                s.current_document_id = None;
                s.current_document = None;
            }
        });

        // A failed refresh keeps the eager removal; the tree is still consistent.
        let _ = self.load_children(parent_id.as_deref()).await;

        if let Some(parent) = parent_id {
            self.state.send_modify(|s| {
                if let Some(p) = tree::find_mut(&mut s.tree_data, &parent) {
                    if p.children.as_ref().is_some_and(Vec::is_empty) {
                        p.is_leaf = true;
                    }
                }
            });
            log::info!("Deleted document {id}");
            return Ok(parent);
        }

        let first_root = self.state.borrow().tree_data.first().map(|n| n.id.clone());
        if let Some(sibling) = first_root {
            log::info!("Deleted document {id}");
            return Ok(sibling);
        }

        log::info!("Deleted last document {id}; creating a fresh one");
        let title = self.config.default_title.clone();
        self.create(None, &title).await
    }

    /// Move a document relative to `target_id` and reconcile both ends.
    pub async fn move_document(&mut self, request: MoveRequest) -> Result<(), TreeError> {
        let (source_parent, target_accepts_inside) = {
            let state = self.state.borrow();
            let nodes = &state.tree_data;
            if request.id == request.target_id || tree::is_descendant(nodes, &request.id, &request.target_id) {
                return Err(TreeError::InvalidMove {
                    id: request.id.clone(),
                    target_id: request.target_id.clone(),
                    reason: "a document cannot be moved into itself".into(),
                });
            }
            if tree::find(nodes, &request.id).is_none() {
                return Err(TreeError::NodeNotFound(request.id.clone()));
            }
            let target = tree::find(nodes, &request.target_id)
                .ok_or_else(|| TreeError::NodeNotFound(request.target_id.clone()))?;
            (tree::find_parent_id(nodes, &request.id), target.accepts_drop_inside())
        };

        self.set_loading(true);
        let result = self.api.move_document(&request).await;
        self.set_loading(false);

        let outcome = result.map_err(|e| {
            log::error!("Failed to move {} onto {}: {e}", request.id, request.target_id);
            TreeError::from(e)
        })?;

        let into_target = request.is_inside() && target_accepts_inside;
        self.state.send_modify(|s| match outcome {
            MoveResult::Reordered(siblings) => {
                reconcile(&mut s.tree_data, source_parent.as_deref(), siblings, None);
            }
            MoveResult::Reparented { old_tree, new_tree } => {
                let moved = tree::take(&mut s.tree_data, &request.id);

                match source_parent.as_deref() {
                    Some(parent) if old_tree.is_empty() => {
                        if let Some(p) = tree::find_mut(&mut s.tree_data, parent) {
                            p.children = Some(Vec::new());
                            p.is_leaf = true;
                        }
                    }
                    Some(parent) => reconcile(&mut s.tree_data, Some(parent), old_tree, None),
                    // The moved node is already out of the root list.
                    None if old_tree.is_empty() => {}
                    None => reconcile(&mut s.tree_data, None, old_tree, None),
                }

                let destination = if into_target {
                    Some(request.target_id.clone())
                } else {
                    tree::find_parent_id(&s.tree_data, &request.target_id)
                };
                reconcile(&mut s.tree_data, destination.as_deref(), new_tree, moved);
                if let Some(dest) = destination.as_deref() {
                    if let Some(p) = tree::find_mut(&mut s.tree_data, dest) {
                        p.is_leaf = false;
                    }
                }
            }
        });

        if into_target {
            self.set_expanded(&request.target_id, true);
        }

        let is_current = self.state.borrow().current_document_id.as_deref() == Some(request.id.as_str());
        if is_current {
            self.refresh_current_document().await?;
        }
        Ok(())
    }

    /// Duplicate a document; the copy lands right after the source.
    pub async fn duplicate(&mut self, id: &str) -> Result<String, TreeError> {
        let parent_id = tree::find_parent_id(&self.state.borrow().tree_data, id);

        self.set_loading(true);
        let result = self.api.duplicate(id).await;
        self.set_loading(false);

        let copy = result.map_err(|e| {
            log::error!("Failed to duplicate document {id}: {e}");
            TreeError::DuplicateFailed(format!("Failed to duplicate document: {e}"))
        })?;
        let copy_id = copy.id.clone();

        self.state.send_modify(|s| {
            if !tree::insert_after(&mut s.tree_data, id, copy.clone()) {
                tree::insert_child(&mut s.tree_data, parent_id.as_deref(), copy);
            }
        });
        if let Some(parent) = parent_id.as_deref() {
            self.set_expanded(parent, true);
        }
        Ok(copy_id)
    }

    pub async fn rename(&mut self, id: &str, title: &str) -> Result<(), TreeError> {
        let patch = DocumentPatch {
            title: Some(title.to_string()),
            ..Default::default()
        };
        self.set_loading(true);
        let result = self.api.update(id, patch).await;
        self.set_loading(false);

        result.map_err(|e| {
            log::error!("Failed to rename document {id}: {e}");
            TreeError::from(e)
        })?;

        self.state.send_modify(|s| {
            let nodes = std::mem::take(&mut s.tree_data);
            s.tree_data = tree::replace(nodes, id, |mut node| {
                node.title = title.to_string();
                node
            });
            if let Some(current) = s.current_document.as_mut().filter(|c| c.id == id) {
                current.title = title.to_string();
            }
        });
        Ok(())
    }

    pub async fn update_cover(&mut self, id: &str, cover: CoverUpdate) -> Result<(), TreeError> {
        self.set_loading(true);
        let result = self.api.update_cover(id, cover).await;
        self.set_loading(false);

        let record = result.map_err(|e| {
            log::error!("Failed to update cover of {id}: {e}");
            TreeError::from(e)
        })?;

        self.state.send_modify(|s| {
            let nodes = std::mem::take(&mut s.tree_data);
            let tree_cover = record.clone();
            s.tree_data = tree::replace(nodes, id, move |mut node| {
                node.cover_image = Some(tree_cover);
                node
            });
            if let Some(current) = s.current_document.as_mut().filter(|c| c.id == id) {
                current.cover_image = Some(record);
            }
        });
        Ok(())
    }

    pub async fn remove_cover(&mut self, id: &str) -> Result<(), TreeError> {
        self.set_loading(true);
        let result = self.api.remove_cover(id).await;
        self.set_loading(false);

        result.map_err(|e| {
            log::error!("Failed to remove cover of {id}: {e}");
            TreeError::from(e)
        })?;

        self.state.send_modify(|s| {
            let nodes = std::mem::take(&mut s.tree_data);
            s.tree_data = tree::replace(nodes, id, |mut node| {
                node.cover_image = None;
                node
            });
            if let Some(current) = s.current_document.as_mut().filter(|c| c.id == id) {
                current.cover_image = None;
            }
        });
        Ok(())
    }

    // ─── Current document ─────────────────────────────────────────────

    /// Switch the open document and fetch its full record.
    ///
    /// A not-found-class answer clears the projection and records a
    /// user-facing error instead of failing navigation.
    pub async fn set_current_document_id(&mut self, id: Option<&str>) -> Result<(), TreeError> {
        self.state.send_modify(|s| {
            s.current_document_id = id.map(String::from);
            s.error = None;
            if s.current_document.as_ref().map(|c| c.id.as_str()) != id {
                s.current_document = None;
            }
        });
        let Some(id) = id else {
            return Ok(());
        };

        match self.api.get_document(id).await {
            Ok(detail) => {
                self.state.send_modify(|s| {
                    if s.current_document_id.as_deref() != Some(id) {
                        return;
                    }
                    if let Some(node) = tree::find_mut(&mut s.tree_data, id) {
                        detail.apply_to(node);
                    }
                    s.current_document = Some(detail);
                });
                Ok(())
            }
            Err(e) if e.is_not_found_class() => {
                log::warn!("Document {id} unavailable: {e}");
                self.state.send_modify(|s| {
                    s.current_document = None;
                    s.error = Some(NOT_AUTHORIZED_MESSAGE.to_string());
                });
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to load document {id}: {e}");
                Err(e.into())
            }
        }
    }

    /// Re-fetch the open document, e.g. after it moved.
    pub async fn refresh_current_document(&mut self) -> Result<(), TreeError> {
        let current = self.state.borrow().current_document_id.clone();
        self.set_current_document_id(current.as_deref()).await
    }
}

/// Merge `incoming` into the sibling list under `parent_id`.
///
/// `carried` is a node that was detached from elsewhere in the tree; it is
/// offered to the merge as the previous version so its loaded subtree moves
/// with it.
fn reconcile(
    nodes: &mut Vec<DocumentNode>,
    parent_id: Option<&str>,
    incoming: Vec<DocumentNode>,
    carried: Option<DocumentNode>,
) {
    let mut previous = tree::children_of(nodes, parent_id)
        .map(<[DocumentNode]>::to_vec)
        .unwrap_or_default();
    previous.extend(carried);
    let merged = tree::merge(&previous, incoming);
    if !tree::set_children(nodes, parent_id, merged) {
        log::warn!("Reconcile target {parent_id:?} is not in the local tree");
    }
}
