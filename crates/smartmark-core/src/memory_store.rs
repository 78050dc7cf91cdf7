use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::bookmark::{BookmarkDraft, BookmarkId, BookmarkRecord, OwnerId};
use crate::feed::MemoryFeed;
use crate::store::{BookmarkMutation, RemoteStore, StoreError, StoreOp};

/// In-process [`RemoteStore`].
///
/// Assigns UUID ids and strictly increasing creation times. When built with
/// [`MemoryStore::with_feed`], every successful write publishes a change
/// for the record's owner. Failures can be scripted per operation with
/// [`MemoryStore::fail_next`].
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    feed: Option<Arc<MemoryFeed>>,
}

#[derive(Default)]
struct MemoryState {
    records: Vec<BookmarkRecord>,
    last_created: Option<DateTime<Utc>>,
    failures: HashMap<StoreOp, VecDeque<StoreError>>,
    calls: HashMap<StoreOp, usize>,
}

impl MemoryState {
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let created = match self.last_created {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last_created = Some(created);
        created
    }

    /// Count the call and pop a scripted failure, if any.
    fn enter(&mut self, op: StoreOp) -> Result<(), StoreError> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(feed: Arc<MemoryFeed>) -> Self {
        Self {
            state: Mutex::default(),
            feed: Some(feed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, owner: &OwnerId) {
        if let Some(feed) = &self.feed {
            feed.publish(owner);
        }
    }

    /// Make the next call of `op` fail with `err`. Queued failures are
    /// consumed in order.
    pub fn fail_next(&self, op: StoreOp, err: StoreError) {
        self.lock().failures.entry(op).or_default().push_back(err);
    }

    /// Number of calls made to `op`, including failed ones.
    pub fn call_count(&self, op: StoreOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Add a bookmark directly, as if another device created it. Does not
    /// publish a change.
    pub fn seed(&self, owner: &OwnerId, title: &str, url: &str) -> BookmarkRecord {
        let mut st = self.lock();
        let record = BookmarkRecord {
            id: BookmarkId::new(Uuid::new_v4().to_string()),
            owner_id: owner.clone(),
            title: title.to_string(),
            url: url.to_string(),
            favicon: None,
            last_visited: None,
            created_at: st.next_created_at(),
        };
        st.records.push(record.clone());
        record
    }

    /// Insert a fully specified record. Replaces any record with the same id.
    pub fn insert_record(&self, record: BookmarkRecord) {
        let mut st = self.lock();
        st.records.retain(|r| r.id != record.id);
        if st.last_created.map_or(true, |last| record.created_at > last) {
            st.last_created = Some(record.created_at);
        }
        st.records.push(record);
    }

    /// Remove a record without publishing, as if deleted elsewhere.
    pub fn remove_record(&self, id: &BookmarkId) -> Option<BookmarkRecord> {
        let mut st = self.lock();
        let idx = st.records.iter().position(|r| &r.id == id)?;
        Some(st.records.remove(idx))
    }

    /// Current records of `owner`, newest first.
    pub fn records(&self, owner: &OwnerId) -> Vec<BookmarkRecord> {
        let st = self.lock();
        let mut records: Vec<BookmarkRecord> = st
            .records
            .iter()
            .filter(|r| &r.owner_id == owner)
            .cloned()
            .collect();
        records.sort_by(BookmarkRecord::newest_first);
        records
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list(&self, owner: &OwnerId) -> Result<Vec<BookmarkRecord>, StoreError> {
        self.lock().enter(StoreOp::List)?;
        Ok(self.records(owner))
    }

    async fn create(
        &self,
        owner: &OwnerId,
        draft: BookmarkDraft,
    ) -> Result<BookmarkRecord, StoreError> {
        let record = {
            let mut st = self.lock();
            st.enter(StoreOp::Create)?;
            if draft.title.trim().is_empty() {
                return Err(StoreError::ValidationRejected("title is empty".to_string()));
            }
            if draft.url.trim().is_empty() {
                return Err(StoreError::ValidationRejected("url is empty".to_string()));
            }
            let record = BookmarkRecord {
                id: BookmarkId::new(Uuid::new_v4().to_string()),
                owner_id: owner.clone(),
                title: draft.title,
                url: draft.url,
                favicon: draft.favicon,
                last_visited: None,
                created_at: st.next_created_at(),
            };
            st.records.push(record.clone());
            record
        };
        self.publish(owner);
        Ok(record)
    }

    async fn update(
        &self,
        id: &BookmarkId,
        mutations: Vec<BookmarkMutation>,
    ) -> Result<(), StoreError> {
        let owner = {
            let mut st = self.lock();
            st.enter(StoreOp::Update)?;
            let blank_title = mutations
                .iter()
                .any(|m| matches!(m, BookmarkMutation::SetTitle(t) if t.trim().is_empty()));
            if blank_title {
                return Err(StoreError::ValidationRejected("title is empty".to_string()));
            }
            let record = st
                .records
                .iter_mut()
                .find(|r| &r.id == id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            for mutation in mutations {
                match mutation {
                    BookmarkMutation::SetTitle(title) => record.title = title,
                    BookmarkMutation::SetLastVisited(at) => record.last_visited = at,
                }
            }
            record.owner_id.clone()
        };
        self.publish(&owner);
        Ok(())
    }

    async fn delete(&self, id: &BookmarkId) -> Result<(), StoreError> {
        let owner = {
            let mut st = self.lock();
            st.enter(StoreOp::Delete)?;
            let idx = st
                .records
                .iter()
                .position(|r| &r.id == id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            st.records.remove(idx).owner_id
        };
        self.publish(&owner);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{ChangeCallback, ChangeFeed};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn draft(title: &str, url: &str) -> BookmarkDraft {
        BookmarkDraft {
            title: title.into(),
            url: url.into(),
            favicon: None,
        }
    }

    #[tokio::test]
    async fn create_assigns_increasing_created_at() {
        let store = MemoryStore::new();
        let owner: OwnerId = "u1".into();
        let a = store.create(&owner, draft("a", "https://a.example/")).await.unwrap();
        let b = store.create(&owner, draft("b", "https://b.example/")).await.unwrap();
        assert!(b.created_at > a.created_at);
        assert_ne!(a.id, b.id);

        let listed = store.list(&owner).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }

    #[tokio::test]
    async fn list_is_owner_scoped() {
        let store = MemoryStore::new();
        store.seed(&"u1".into(), "mine", "https://mine.example/");
        store.seed(&"u2".into(), "theirs", "https://theirs.example/");
        let listed = store.list(&"u1".into()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "mine");
    }

    #[tokio::test]
    async fn empty_title_is_rejected() {
        let store = MemoryStore::new();
        let err = store
            .create(&"u1".into(), draft(" ", "https://a.example/"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ValidationRejected(_)));
    }

    #[tokio::test]
    async fn update_and_delete_missing_fail() {
        let store = MemoryStore::new();
        let id: BookmarkId = "nope".into();
        assert!(store.update(&id, vec![]).await.unwrap_err().is_not_found());
        assert!(store.delete(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let store = MemoryStore::new();
        let owner: OwnerId = "u1".into();
        store.fail_next(StoreOp::List, StoreError::Unavailable("down".into()));
        assert!(store.list(&owner).await.is_err());
        assert!(store.list(&owner).await.is_ok());
        assert_eq!(store.call_count(StoreOp::List), 2);
    }

    #[tokio::test]
    async fn writes_publish_to_feed() {
        let feed = Arc::new(MemoryFeed::new());
        let store = MemoryStore::with_feed(Arc::clone(&feed));
        let owner: OwnerId = "u1".into();
        let hits = Arc::new(AtomicUsize::new(0));
        let cb_hits = Arc::clone(&hits);
        let cb: ChangeCallback = Arc::new(move || {
            cb_hits.fetch_add(1, Ordering::SeqCst);
        });
        feed.subscribe(&owner, cb).unwrap();

        let record = store.create(&owner, draft("a", "https://a.example/")).await.unwrap();
        store
            .update(&record.id, vec![BookmarkMutation::SetLastVisited(Some(Utc::now()))])
            .await
            .unwrap();
        store.delete(&record.id).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        // Failed writes publish nothing.
        let _ = store.delete(&record.id).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
