//! Document tree data model.
//!
//! A workspace is a forest of [`DocumentNode`]s. Children are loaded lazily:
//! `children == None` means "never requested", `Some(vec![])` means "loaded,
//! and there are none".

use serde::{Deserialize, Serialize};

/// Access level the current user has on a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Permission {
    None,
    Read,
    Edit,
}

impl Permission {
    /// Whether the body may be edited collaboratively.
    pub fn can_edit(&self) -> bool {
        matches!(self, Permission::Edit)
    }
}

/// Cover image attached to a document header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverImage {
    pub url: String,
    #[serde(default)]
    pub scroll_y: f64,
}

/// One entry in the hierarchical workspace tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentNode {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub is_leaf: bool,
    #[serde(default)]
    pub position: i64,
    /// `None` until the subtree has been requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<DocumentNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<CoverImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<Permission>,
}

impl DocumentNode {
    /// Create a root-level leaf with no loaded children.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            parent_id: None,
            is_leaf: true,
            position: 0,
            children: None,
            cover_image: None,
            permission: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_position(mut self, position: i64) -> Self {
        self.position = position;
        self
    }

    /// Attach a loaded child list. Marks the node as a folder.
    pub fn with_children(mut self, children: Vec<DocumentNode>) -> Self {
        self.is_leaf = false;
        self.children = Some(children);
        self
    }

    /// Whether a drop "inside" this node makes it the parent. Leaves refuse
    /// and the drop lands right after them instead.
    pub fn accepts_drop_inside(&self) -> bool {
        !self.is_leaf
    }

    /// Whether a non-empty child list has been loaded locally.
    pub fn has_loaded_children(&self) -> bool {
        self.children.as_ref().is_some_and(|c| !c.is_empty())
    }
}

/// A node as returned by the nested-tree query: flat, linked by `parent_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatDocumentRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub has_children: bool,
    #[serde(default)]
    pub cover_image: Option<CoverImage>,
    #[serde(default)]
    pub permission: Option<Permission>,
}

impl FlatDocumentRecord {
    pub(crate) fn into_node(self) -> DocumentNode {
        DocumentNode {
            id: self.id,
            title: self.title,
            parent_id: self.parent_id,
            is_leaf: !self.has_children,
            position: self.position,
            children: None,
            cover_image: self.cover_image,
            permission: self.permission,
        }
    }
}

/// Full document as returned by the single-document query.
///
/// Carries the tree fields plus a reference to the body content, which the
/// collaboration layer owns once the document is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDetail {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub cover_image: Option<CoverImage>,
    #[serde(default)]
    pub permission: Option<Permission>,
    /// Initial body snapshot, if the server sent one.
    #[serde(default)]
    pub content: Option<String>,
}

impl DocumentDetail {
    /// Copy the fields that can be edited elsewhere onto a tree node.
    pub fn apply_to(&self, node: &mut DocumentNode) {
        node.title = self.title.clone();
        node.cover_image = self.cover_image.clone();
        if self.permission.is_some() {
            node.permission = self.permission;
        }
    }

    pub fn is_editable(&self) -> bool {
        self.permission.is_some_and(|p| p.can_edit())
    }
}
