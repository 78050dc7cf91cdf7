use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::bookmark::{BookmarkDraft, BookmarkId, BookmarkRecord, OwnerId};
use crate::feed::MemoryFeed;
use crate::store::{BookmarkMutation, RemoteStore, StoreError};

/// SQLite-backed implementation of the RemoteStore trait.
///
/// Calls run on the caller's task; each one holds the connection for a
/// single short statement sequence.
pub struct SqliteBookmarkStore {
    conn: Mutex<Connection>,
    feed: Option<Arc<MemoryFeed>>,
}

impl SqliteBookmarkStore {
    /// Open (or create) a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn =
            Connection::open(path).map_err(|e| StoreError::Unavailable(format!("open: {}", e)))?;
        Self::init_with_connection(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Unavailable(format!("open_in_memory: {}", e)))?;
        Self::init_with_connection(conn)
    }

    /// Publish a change on `feed` after every successful write.
    pub fn with_feed(mut self, feed: Arc<MemoryFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    fn init_with_connection(conn: Connection) -> Result<Self, StoreError> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            feed: None,
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS bookmarks (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                favicon TEXT,
                last_visited INTEGER,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_bookmarks_owner_created
                ON bookmarks(owner_id, created_at DESC);
            ",
        )
        .map_err(|e| StoreError::Unavailable(format!("init_schema: {}", e)))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn publish(&self, owner: &OwnerId) {
        if let Some(feed) = &self.feed {
            feed.publish(owner);
        }
    }

    fn owner_of(conn: &Connection, id: &BookmarkId) -> Result<OwnerId, StoreError> {
        conn.query_row(
            "SELECT owner_id FROM bookmarks WHERE id = ?1",
            params![id.as_str()],
            |row| row.get::<_, String>(0),
        )
        .map(OwnerId::from)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id.clone()),
            e => StoreError::Unavailable(format!("owner_of: {}", e)),
        })
    }

    // Strictly after the newest existing row, so creation order is total.
    fn next_created_at(conn: &Connection) -> Result<DateTime<Utc>, StoreError> {
        let newest: Option<i64> = conn
            .query_row("SELECT MAX(created_at) FROM bookmarks", [], |row| row.get(0))
            .map_err(|e| StoreError::Unavailable(format!("max created_at: {}", e)))?;
        let now = Utc::now().timestamp_millis();
        let millis = match newest {
            Some(last) if now <= last => last + 1,
            _ => now,
        };
        Ok(millis_to_datetime(millis))
    }

    /// Read a record from a row result.
    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<BookmarkRecord> {
        let id: String = row.get(0)?;
        let owner_id: String = row.get(1)?;
        let last_visited: Option<i64> = row.get(5)?;
        let created_at: i64 = row.get(6)?;
        Ok(BookmarkRecord {
            id: id.into(),
            owner_id: owner_id.into(),
            title: row.get(2)?,
            url: row.get(3)?,
            favicon: row.get(4)?,
            last_visited: last_visited.map(millis_to_datetime),
            created_at: millis_to_datetime(created_at),
        })
    }
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[async_trait]
impl RemoteStore for SqliteBookmarkStore {
    async fn list(&self, owner: &OwnerId) -> Result<Vec<BookmarkRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, owner_id, title, url, favicon, last_visited, created_at
                 FROM bookmarks WHERE owner_id = ?1
                 ORDER BY created_at DESC",
            )
            .map_err(|e| StoreError::Unavailable(format!("prepare list: {}", e)))?;
        let records = stmt
            .query_map(params![owner.as_str()], Self::row_to_record)
            .map_err(|e| StoreError::Unavailable(format!("query list: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Unavailable(format!("collect list: {}", e)))?;
        Ok(records)
    }

    async fn create(
        &self,
        owner: &OwnerId,
        draft: BookmarkDraft,
    ) -> Result<BookmarkRecord, StoreError> {
        if draft.title.trim().is_empty() {
            return Err(StoreError::ValidationRejected("title is empty".to_string()));
        }
        if draft.url.trim().is_empty() {
            return Err(StoreError::ValidationRejected("url is empty".to_string()));
        }

        let conn = self.lock()?;
        let record = BookmarkRecord {
            id: BookmarkId::new(Uuid::new_v4().to_string()),
            owner_id: owner.clone(),
            title: draft.title,
            url: draft.url,
            favicon: draft.favicon,
            last_visited: None,
            created_at: Self::next_created_at(&conn)?,
        };
        conn.execute(
            "INSERT INTO bookmarks (id, owner_id, title, url, favicon, last_visited, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6)",
            params![
                record.id.as_str(),
                record.owner_id.as_str(),
                record.title,
                record.url,
                record.favicon,
                record.created_at.timestamp_millis(),
            ],
        )
        .map_err(|e| {
            if let rusqlite::Error::SqliteFailure(ref err, _) = e {
                if err.code == rusqlite::ErrorCode::ConstraintViolation {
                    return StoreError::ValidationRejected(format!("insert: {}", e));
                }
            }
            StoreError::Unavailable(format!("insert: {}", e))
        })?;
        drop(conn);

        self.publish(owner);
        Ok(record)
    }

    async fn update(
        &self,
        id: &BookmarkId,
        mutations: Vec<BookmarkMutation>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let owner = Self::owner_of(&conn, id)?;

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StoreError::Unavailable(format!("begin tx: {}", e)))?;
        for mutation in &mutations {
            match mutation {
                BookmarkMutation::SetTitle(title) => {
                    if title.trim().is_empty() {
                        return Err(StoreError::ValidationRejected("title is empty".to_string()));
                    }
                    tx.execute(
                        "UPDATE bookmarks SET title = ?1 WHERE id = ?2",
                        params![title, id.as_str()],
                    )
                    .map_err(|e| StoreError::Unavailable(format!("set title: {}", e)))?;
                }
                BookmarkMutation::SetLastVisited(at) => {
                    tx.execute(
                        "UPDATE bookmarks SET last_visited = ?1 WHERE id = ?2",
                        params![at.map(|t| t.timestamp_millis()), id.as_str()],
                    )
                    .map_err(|e| StoreError::Unavailable(format!("set last_visited: {}", e)))?;
                }
            }
        }
        tx.commit()
            .map_err(|e| StoreError::Unavailable(format!("commit: {}", e)))?;
        drop(conn);

        self.publish(&owner);
        Ok(())
    }

    async fn delete(&self, id: &BookmarkId) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let owner = Self::owner_of(&conn, id)?;
        conn.execute("DELETE FROM bookmarks WHERE id = ?1", params![id.as_str()])
            .map_err(|e| StoreError::Unavailable(format!("delete: {}", e)))?;
        drop(conn);

        self.publish(&owner);
        Ok(())
    }
}
