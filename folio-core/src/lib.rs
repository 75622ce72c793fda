//! Folio workspace tree engine.
//!
//! Holds the hierarchical document tree a workspace sidebar renders and the
//! store that keeps it consistent with the document service.
//!
//! ```text
//!   DocumentApi (async trait)
//!        │  children / nested tree / mutations
//!        ▼
//!   TreeStore ──► tree::{merge, build_from_flat_list, ...}
//!        │
//!        ▼
//!   watch::Receiver<TreeStoreState>
//! ```

pub mod api;
pub mod node;
pub mod store;
pub mod tree;

pub use api::{ApiError, DocumentApi, MemoryDocumentApi, MoveRequest, MoveResult};
pub use node::{CoverImage, DocumentDetail, DocumentNode, FlatDocumentRecord, Permission};
pub use store::{TreeError, TreeStore, TreeStoreConfig, TreeStoreState};
