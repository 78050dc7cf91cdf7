use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Opaque bookmark identifier, assigned by the remote store and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookmarkId(String);

/// Identity of the authenticated user that owns a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(BookmarkId);
string_id!(OwnerId);

/// A saved link as held by the remote collection.
///
/// `id`, `owner_id` and `created_at` are assigned by the store when the
/// record is created and never change afterwards. `created_at` is the only
/// sort key: collections are always presented newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkRecord {
    pub id: BookmarkId,
    pub owner_id: OwnerId,
    pub title: String,
    /// Normalized absolute url (see [`crate::link::normalize_url`]).
    pub url: String,
    pub favicon: Option<String>,
    pub last_visited: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl BookmarkRecord {
    /// Comparator for the collection order: `created_at` descending.
    pub fn newest_first(a: &BookmarkRecord, b: &BookmarkRecord) -> Ordering {
        b.created_at.cmp(&a.created_at)
    }

    pub fn is_visited(&self) -> bool {
        self.last_visited.is_some()
    }
}

/// Validated payload for creating a bookmark.
///
/// Built with `BookmarkDraft::derive` (see [`crate::link`]) so the title
/// and url are already defaulted and normalized before they reach the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkDraft {
    pub title: String,
    pub url: String,
    pub favicon: Option<String>,
}
