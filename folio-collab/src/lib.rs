//! # folio-collab - Real-time collaboration sessions for Folio
//!
//! Brings up a replicated document per open page, restores it from the
//! local cache, keeps it in sync with the server over WebSocket and exposes
//! connection health and presence as a watchable [`SessionState`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐  open / switch_to  ┌──────────────────────┐
//! │ SessionRegistry │ ─────────────────► │ CollaborationSession │
//! └─────────────────┘                    └──────────┬───────────┘
//!                                                   │ owns task
//!                                                   ▼
//!        ┌────────────┐   events    ┌────────────────────────────┐
//!        │ Transport  │ ──────────► │ Supervisor                 │
//!        │ (WebSocket)│ ◄────────── │ timers + reduce() + watch  │
//!        └─────┬──────┘   updates   └──────┬──────────────┬──────┘
//!              │                           │              │
//!              ▼                           ▼              ▼
//!        ┌────────────────────┐     ┌────────────┐  ┌────────────┐
//!        │ ReplicatedDocument │◄────│ LocalCache │  │SessionState│
//!        │ (yrs)              │     │ (RocksDB)  │  │ (UI reads) │
//!        └────────────────────┘     └────────────┘  └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Binary wire protocol (bincode-encoded SyncMessage)
//! - [`document`] - yrs document with a single `content` text root
//! - [`status`] - session state machine as a pure reducer
//! - [`presence`] - awareness de-duplication and cursor colors
//! - [`cache`], [`storage`] - local durable cache
//! - [`transport`] - transport contract, WebSocket client, offline queue
//! - [`supervisor`] - connect timeout and disconnect grace timers
//! - [`session`], [`registry`] - per-document handles and their lifecycle

pub mod cache;
pub mod document;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod status;
pub mod storage;
pub mod supervisor;
pub mod transport;

pub use cache::{CacheError, LocalCache, MemoryCache};
pub use document::{merge_updates, DocumentError, ReplicatedDocument};
pub use presence::{collapse, color_for, Presence};
pub use protocol::{AwarenessState, MessageType, ProtocolError, SyncMessage};
pub use registry::SessionRegistry;
pub use session::{CollaborationSession, SessionContext};
pub use status::{reduce, SessionEvent, SessionState, SessionStatus};
pub use storage::{CacheConfig, CacheMetadata, RocksCache};
pub use supervisor::{ScopedTimer, SupervisorConfig};
pub use transport::{
    OfflineQueue, Transport, TransportConfig, TransportEvent, TransportFactory, TransportStatus, WsTransport,
    WsTransportFactory,
};
