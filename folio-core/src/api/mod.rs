//! Contract for the document service the tree store talks to.
//!
//! The network client itself lives outside this crate; [`memory`] provides a
//! complete in-process implementation used by tests and the demo app.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::node::{CoverImage, DocumentDetail, DocumentNode, FlatDocumentRecord};

pub use memory::MemoryDocumentApi;

/// Drop position meaning "inside the target".
pub const DROP_INSIDE: i32 = 0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Document not found: {0}")]
    NotFound(String),
    #[error("Not authorized: {0}")]
    Forbidden(String),
    #[error("Rejected request: {0}")]
    BadRequest(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// 404/permission class: surfaced to the user as "not authorized".
    pub fn is_not_found_class(&self) -> bool {
        matches!(self, ApiError::NotFound(_) | ApiError::Forbidden(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocument {
    pub parent_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
}

/// Partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    pub id: String,
    pub target_id: String,
    /// `0` drops inside the target, negative before it, positive after it.
    pub drop_position: i32,
}

impl MoveRequest {
    pub fn new(id: impl Into<String>, target_id: impl Into<String>, drop_position: i32) -> Self {
        Self {
            id: id.into(),
            target_id: target_id.into(),
            drop_position,
        }
    }

    pub fn is_inside(&self) -> bool {
        self.drop_position == DROP_INSIDE
    }
}

/// Server response to a move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MoveResult {
    /// The node stayed under the same parent; this is the new sibling order.
    Reordered(Vec<DocumentNode>),
    /// The node changed parents.
    #[serde(rename_all = "camelCase")]
    Reparented {
        /// Remaining siblings at the source parent.
        old_tree: Vec<DocumentNode>,
        /// New sibling list at the destination parent.
        new_tree: Vec<DocumentNode>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll_y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_preset: Option<bool>,
}

/// Tree queries and mutations exposed by the document service.
#[async_trait]
pub trait DocumentApi: Send + Sync {
    /// One level of children; `None` lists root documents.
    async fn get_children(&self, parent_id: Option<&str>) -> Result<Vec<DocumentNode>, ApiError>;

    /// Flat subtree with `parent_id` links. With a `root_id`, the response
    /// covers the path from the workspace roots down to that document.
    async fn get_nested_tree(&self, root_id: Option<&str>) -> Result<Vec<FlatDocumentRecord>, ApiError>;

    /// Fails with a not-found-class error when missing or not permitted.
    async fn get_document(&self, id: &str) -> Result<DocumentDetail, ApiError>;

    async fn create(&self, input: CreateDocument) -> Result<DocumentNode, ApiError>;

    async fn update(&self, id: &str, patch: DocumentPatch) -> Result<(), ApiError>;

    async fn delete(&self, id: &str) -> Result<(), ApiError>;

    async fn duplicate(&self, id: &str) -> Result<DocumentNode, ApiError>;

    async fn move_document(&self, request: &MoveRequest) -> Result<MoveResult, ApiError>;

    async fn update_cover(&self, id: &str, cover: CoverUpdate) -> Result<CoverImage, ApiError>;

    async fn remove_cover(&self, id: &str) -> Result<(), ApiError>;
}
