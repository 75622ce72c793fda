//! In-process document service.
//!
//! Implements the full [`DocumentApi`] contract over a `Vec` guarded by a
//! mutex: positional sibling ordering, both move response shapes, subtree
//! duplication and deletion, covers and per-document permissions. A one-shot
//! failure can be injected to exercise error paths.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use super::{ApiError, CoverUpdate, CreateDocument, DocumentApi, DocumentPatch, MoveRequest, MoveResult};
use crate::node::{CoverImage, DocumentDetail, DocumentNode, FlatDocumentRecord, Permission};

#[derive(Debug, Clone)]
struct StoredDocument {
    id: String,
    title: String,
    parent_id: Option<String>,
    position: i64,
    content: Option<String>,
    cover_image: Option<CoverImage>,
    permission: Permission,
}

#[derive(Debug, Default)]
struct Inner {
    docs: Vec<StoredDocument>,
    fail_next: Option<ApiError>,
    calls: Vec<String>,
}

impl Inner {
    fn get(&self, id: &str) -> Option<&StoredDocument> {
        self.docs.iter().find(|d| d.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut StoredDocument> {
        self.docs.iter_mut().find(|d| d.id == id)
    }

    fn require(&self, id: &str) -> Result<&StoredDocument, ApiError> {
        self.get(id).ok_or_else(|| ApiError::NotFound(id.to_string()))
    }

    fn has_children(&self, id: &str) -> bool {
        self.docs.iter().any(|d| d.parent_id.as_deref() == Some(id))
    }

    fn sorted_ids(&self, parent_id: Option<&str>) -> Vec<String> {
        let mut siblings: Vec<&StoredDocument> = self
            .docs
            .iter()
            .filter(|d| d.parent_id.as_deref() == parent_id)
            .collect();
        siblings.sort_by_key(|d| d.position);
        siblings.into_iter().map(|d| d.id.clone()).collect()
    }

    fn to_node(&self, doc: &StoredDocument) -> DocumentNode {
        DocumentNode {
            id: doc.id.clone(),
            title: doc.title.clone(),
            parent_id: doc.parent_id.clone(),
            is_leaf: !self.has_children(&doc.id),
            position: doc.position,
            children: None,
            cover_image: doc.cover_image.clone(),
            permission: Some(doc.permission),
        }
    }

    fn to_record(&self, doc: &StoredDocument) -> FlatDocumentRecord {
        FlatDocumentRecord {
            id: doc.id.clone(),
            title: doc.title.clone(),
            parent_id: doc.parent_id.clone(),
            position: doc.position,
            has_children: self.has_children(&doc.id),
            cover_image: doc.cover_image.clone(),
            permission: Some(doc.permission),
        }
    }

    fn siblings(&self, parent_id: Option<&str>) -> Vec<DocumentNode> {
        self.sorted_ids(parent_id)
            .iter()
            .filter_map(|id| self.get(id))
            .map(|doc| self.to_node(doc))
            .collect()
    }

    fn renumber(&mut self, ordered: &[String]) {
        for (position, id) in ordered.iter().enumerate() {
            if let Some(doc) = self.get_mut(id) {
                doc.position = position as i64;
            }
        }
    }

    fn next_position(&self, parent_id: Option<&str>) -> i64 {
        self.docs
            .iter()
            .filter(|d| d.parent_id.as_deref() == parent_id)
            .map(|d| d.position + 1)
            .max()
            .unwrap_or(0)
    }

    /// Ancestor ids of `id`, root first.
    fn ancestors(&self, id: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = self.get(id).and_then(|d| d.parent_id.clone());
        while let Some(parent) = cursor {
            if !seen.insert(parent.clone()) {
                break;
            }
            cursor = self.get(&parent).and_then(|d| d.parent_id.clone());
            chain.push(parent);
        }
        chain.reverse();
        chain
    }

    fn descendants(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut frontier = vec![id.to_string()];
        while let Some(current) = frontier.pop() {
            for doc in self.docs.iter().filter(|d| d.parent_id.as_deref() == Some(current.as_str())) {
                out.push(doc.id.clone());
                frontier.push(doc.id.clone());
            }
        }
        out
    }

    fn copy_subtree(&mut self, source_id: &str, new_parent: Option<String>, position: i64, suffix: &str) -> Option<String> {
        let source = self.get(source_id)?.clone();
        let copy_id = Uuid::new_v4().to_string();
        self.docs.push(StoredDocument {
            id: copy_id.clone(),
            title: format!("{}{}", source.title, suffix),
            parent_id: new_parent,
            position,
            ..source
        });
        for child_id in self.sorted_ids(Some(source_id)) {
            let child_position = self.get(&child_id).map(|d| d.position).unwrap_or(0);
            self.copy_subtree(&child_id, Some(copy_id.clone()), child_position, "");
        }
        Some(copy_id)
    }
}

/// In-memory [`DocumentApi`] implementation.
#[derive(Debug, Default)]
pub struct MemoryDocumentApi {
    inner: Mutex<Inner>,
}

impl MemoryDocumentApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document with a fixed id, appended under `parent_id`.
    pub fn seed(&self, id: &str, title: &str, parent_id: Option<&str>) {
        if let Ok(mut inner) = self.inner.lock() {
            let position = inner.next_position(parent_id);
            inner.docs.push(StoredDocument {
                id: id.to_string(),
                title: title.to_string(),
                parent_id: parent_id.map(String::from),
                position,
                content: None,
                cover_image: None,
                permission: Permission::Edit,
            });
        }
    }

    pub fn set_permission(&self, id: &str, permission: Permission) {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(doc) = inner.get_mut(id) {
                doc.permission = permission;
            }
        }
    }

    /// Make the next call (of any kind) fail with `error`.
    pub fn fail_next(&self, error: ApiError) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_next = Some(error);
        }
    }

    /// Names of the calls received so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().map(|inner| inner.calls.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Server-side view of a document, for assertions.
    pub fn snapshot(&self, id: &str) -> Option<DocumentNode> {
        let inner = self.inner.lock().ok()?;
        inner.get(id).map(|doc| inner.to_node(doc))
    }

    fn begin(&self, call: &str) -> Result<MutexGuard<'_, Inner>, ApiError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ApiError::Network("backend state poisoned".into()))?;
        inner.calls.push(call.to_string());
        if let Some(error) = inner.fail_next.take() {
            return Err(error);
        }
        Ok(inner)
    }
}

#[async_trait]
impl DocumentApi for MemoryDocumentApi {
    async fn get_children(&self, parent_id: Option<&str>) -> Result<Vec<DocumentNode>, ApiError> {
        let inner = self.begin("get_children")?;
        if let Some(parent) = parent_id {
            inner.require(parent)?;
        }
        Ok(inner.siblings(parent_id))
    }

    async fn get_nested_tree(&self, root_id: Option<&str>) -> Result<Vec<FlatDocumentRecord>, ApiError> {
        let inner = self.begin("get_nested_tree")?;
        let Some(root) = root_id else {
            return Ok(inner.docs.iter().map(|doc| inner.to_record(doc)).collect());
        };
        inner.require(root)?;

        let mut levels: Vec<Option<String>> = vec![None];
        levels.extend(inner.ancestors(root).into_iter().map(Some));
        let mut records = Vec::new();
        for level in &levels {
            for id in inner.sorted_ids(level.as_deref()) {
                if let Some(doc) = inner.get(&id) {
                    records.push(inner.to_record(doc));
                }
            }
        }
        Ok(records)
    }

    async fn get_document(&self, id: &str) -> Result<DocumentDetail, ApiError> {
        let inner = self.begin("get_document")?;
        let doc = inner.require(id)?;
        if doc.permission == Permission::None {
            return Err(ApiError::Forbidden(id.to_string()));
        }
        Ok(DocumentDetail {
            id: doc.id.clone(),
            title: doc.title.clone(),
            parent_id: doc.parent_id.clone(),
            position: doc.position,
            cover_image: doc.cover_image.clone(),
            permission: Some(doc.permission),
            content: doc.content.clone(),
        })
    }

    async fn create(&self, input: CreateDocument) -> Result<DocumentNode, ApiError> {
        let mut inner = self.begin("create")?;
        if let Some(parent) = input.parent_id.as_deref() {
            inner.require(parent)?;
        }
        let doc = StoredDocument {
            id: Uuid::new_v4().to_string(),
            title: input.title,
            position: inner.next_position(input.parent_id.as_deref()),
            parent_id: input.parent_id,
            content: input.content,
            cover_image: None,
            permission: Permission::Edit,
        };
        let node = inner.to_node(&doc);
        inner.docs.push(doc);
        Ok(node)
    }

    async fn update(&self, id: &str, patch: DocumentPatch) -> Result<(), ApiError> {
        let mut inner = self.begin("update")?;
        let doc = inner.get_mut(id).ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        if let Some(title) = patch.title {
            doc.title = title;
        }
        if let Some(content) = patch.content {
            doc.content = Some(content);
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        let mut inner = self.begin("delete")?;
        inner.require(id)?;
        let mut doomed: HashSet<String> = inner.descendants(id).into_iter().collect();
        doomed.insert(id.to_string());
        inner.docs.retain(|d| !doomed.contains(&d.id));
        Ok(())
    }

    async fn duplicate(&self, id: &str) -> Result<DocumentNode, ApiError> {
        let mut inner = self.begin("duplicate")?;
        let source = inner.require(id)?.clone();
        for doc in inner.docs.iter_mut() {
            if doc.parent_id == source.parent_id && doc.position > source.position {
                doc.position += 1;
            }
        }
        let copy_id = inner
            .copy_subtree(id, source.parent_id.clone(), source.position + 1, " (copy)")
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        let copy = inner.require(&copy_id)?;
        Ok(inner.to_node(copy))
    }

    async fn move_document(&self, request: &MoveRequest) -> Result<MoveResult, ApiError> {
        let mut inner = self.begin("move_document")?;
        let old_parent = inner.require(&request.id)?.parent_id.clone();
        let target_parent = inner.require(&request.target_id)?.parent_id.clone();
        if request.id == request.target_id || inner.descendants(&request.id).contains(&request.target_id) {
            return Err(ApiError::BadRequest(format!(
                "cannot move {} into its own subtree",
                request.id
            )));
        }

        // Same rule the tree store applies to the node it was served.
        let inside = request.is_inside() && {
            let target = inner.require(&request.target_id)?;
            inner.to_node(target).accepts_drop_inside()
        };
        let new_parent = if inside {
            Some(request.target_id.clone())
        } else {
            target_parent
        };

        let mut ordered: Vec<String> = inner
            .sorted_ids(new_parent.as_deref())
            .into_iter()
            .filter(|sibling| sibling != &request.id)
            .collect();
        let index = if inside {
            ordered.len()
        } else {
            let at = ordered
                .iter()
                .position(|sibling| sibling == &request.target_id)
                .unwrap_or(ordered.len());
            if request.drop_position < 0 { at } else { at + 1 }
        };
        ordered.insert(index.min(ordered.len()), request.id.clone());

        if let Some(doc) = inner.get_mut(&request.id) {
            doc.parent_id = new_parent.clone();
        }
        inner.renumber(&ordered);

        if old_parent == new_parent {
            return Ok(MoveResult::Reordered(inner.siblings(new_parent.as_deref())));
        }
        let remaining = inner.sorted_ids(old_parent.as_deref());
        inner.renumber(&remaining);
        Ok(MoveResult::Reparented {
            old_tree: inner.siblings(old_parent.as_deref()),
            new_tree: inner.siblings(new_parent.as_deref()),
        })
    }

    async fn update_cover(&self, id: &str, cover: CoverUpdate) -> Result<CoverImage, ApiError> {
        let mut inner = self.begin("update_cover")?;
        let doc = inner.get_mut(id).ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        let url = cover
            .url
            .or_else(|| doc.cover_image.as_ref().map(|c| c.url.clone()))
            .ok_or_else(|| ApiError::BadRequest("cover url required".into()))?;
        let scroll_y = cover
            .scroll_y
            .or_else(|| doc.cover_image.as_ref().map(|c| c.scroll_y))
            .unwrap_or(0.0);
        let record = CoverImage { url, scroll_y };
        doc.cover_image = Some(record.clone());
        Ok(record)
    }

    async fn remove_cover(&self, id: &str) -> Result<(), ApiError> {
        let mut inner = self.begin("remove_cover")?;
        let doc = inner.get_mut(id).ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        doc.cover_image = None;
        Ok(())
    }
}
