//! Bookmark synchronization core.
//!
//! Keeps one user's locally held bookmark view consistent with a remote,
//! owner-scoped collection while local edits, their acknowledgements and
//! change-feed notifications interleave. See [`SyncSession`].

pub mod bookmark;
pub mod cache;
pub mod config;
pub mod error;
pub mod feed;
pub mod filter;
pub mod link;
pub mod memory_store;
pub mod session;
pub mod store;

#[cfg(feature = "sqlite")]
pub mod sqlite_store;

pub use bookmark::*;
pub use cache::{LocalCache, Removed};
pub use config::*;
pub use error::*;
pub use feed::*;
pub use filter::*;
pub use link::{display_host, favicon_url, normalize_url, LinkError};
pub use memory_store::MemoryStore;
pub use session::*;
pub use store::*;

#[cfg(feature = "sqlite")]
pub use sqlite_store::SqliteBookmarkStore;
