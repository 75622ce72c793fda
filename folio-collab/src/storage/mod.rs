//! Durable storage behind [`LocalCache`](crate::cache::LocalCache).
//!
//! ```text
//! ┌─────────────┐   store_update   ┌──────────────────────────────────┐
//! │ Supervisor  │ ───────────────► │ RocksCache                       │
//! │ (per doc)   │ ◄─────────────── │ CF "documents" - merged yrs state│
//! └─────────────┘      load        │ CF "metadata"  - sizes, counts   │
//!                                  └──────────────────────────────────┘
//! ```

pub mod rocks;

pub use rocks::{CacheConfig, CacheMetadata, RocksCache};
