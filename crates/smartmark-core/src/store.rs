use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bookmark::{BookmarkDraft, BookmarkId, BookmarkRecord, OwnerId};

/// Mutation to apply to a stored bookmark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookmarkMutation {
    SetTitle(String),
    SetLastVisited(Option<DateTime<Utc>>),
}

/// The remote operations the sync core issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreOp {
    List,
    Create,
    Update,
    Delete,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreOp::List => write!(f, "list"),
            StoreOp::Create => write!(f, "create"),
            StoreOp::Update => write!(f, "update"),
            StoreOp::Delete => write!(f, "delete"),
        }
    }
}

/// The authoritative, owner-scoped bookmark collection.
///
/// Every call is scoped either by owner or by a record id; the sync core
/// never issues any other query shape.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// All bookmarks of `owner`, sorted by `created_at` descending.
    async fn list(&self, owner: &OwnerId) -> Result<Vec<BookmarkRecord>, StoreError>;

    /// Create a bookmark. The store assigns `id` and `created_at`.
    async fn create(
        &self,
        owner: &OwnerId,
        draft: BookmarkDraft,
    ) -> Result<BookmarkRecord, StoreError>;

    /// Apply mutations to an existing bookmark.
    async fn update(
        &self,
        id: &BookmarkId,
        mutations: Vec<BookmarkMutation>,
    ) -> Result<(), StoreError>;

    /// Delete a bookmark by id.
    async fn delete(&self, id: &BookmarkId) -> Result<(), StoreError>;
}

/// Errors from the remote store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Bookmark not found: {0}")]
    NotFound(BookmarkId),

    #[error("Validation rejected: {0}")]
    ValidationRejected(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
