//! Scripted collaborators for session tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::Semaphore;

use smartmark_core::{
    BookmarkDraft, BookmarkId, BookmarkMutation, BookmarkRecord, ErrorSink, MemoryFeed,
    MemoryStore, OwnerId, RemoteStore, StoreError, SyncError, SyncSession,
};

/// A checkpoint that store calls pass through. While held, each call waits
/// for an explicit release.
pub struct Gate {
    held: AtomicBool,
    permits: Semaphore,
    entered: AtomicUsize,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            held: AtomicBool::new(false),
            permits: Semaphore::new(0),
            entered: AtomicUsize::new(0),
        }
    }
}

impl Gate {
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release_one(&self) {
        self.permits.add_permits(1);
    }

    /// Stop holding and let every waiting call through.
    pub fn open(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.permits.add_permits(1024);
    }

    /// Calls that reached the gate so far.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    async fn pass(&self) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        if self.held.load(Ordering::SeqCst) {
            self.permits
                .acquire()
                .await
                .expect("gate semaphore closed")
                .forget();
        }
    }
}

/// [`MemoryStore`] with a gate in front of every operation.
pub struct GatedStore {
    pub inner: MemoryStore,
    pub list_gate: Gate,
    pub create_gate: Gate,
    pub update_gate: Gate,
    pub delete_gate: Gate,
}

impl GatedStore {
    pub fn new(feed: Arc<MemoryFeed>) -> Self {
        Self {
            inner: MemoryStore::with_feed(feed),
            list_gate: Gate::default(),
            create_gate: Gate::default(),
            update_gate: Gate::default(),
            delete_gate: Gate::default(),
        }
    }
}

#[async_trait]
impl RemoteStore for GatedStore {
    async fn list(&self, owner: &OwnerId) -> Result<Vec<BookmarkRecord>, StoreError> {
        self.list_gate.pass().await;
        self.inner.list(owner).await
    }

    async fn create(
        &self,
        owner: &OwnerId,
        draft: BookmarkDraft,
    ) -> Result<BookmarkRecord, StoreError> {
        self.create_gate.pass().await;
        self.inner.create(owner, draft).await
    }

    async fn update(
        &self,
        id: &BookmarkId,
        mutations: Vec<BookmarkMutation>,
    ) -> Result<(), StoreError> {
        self.update_gate.pass().await;
        self.inner.update(id, mutations).await
    }

    async fn delete(&self, id: &BookmarkId) -> Result<(), StoreError> {
        self.delete_gate.pass().await;
        self.inner.delete(id).await
    }
}

/// Error sink that keeps every report.
#[derive(Default)]
pub struct RecordingSink {
    errors: Mutex<Vec<SyncError>>,
}

impl RecordingSink {
    pub fn errors(&self) -> Vec<SyncError> {
        self.errors.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.errors.lock().unwrap().len()
    }
}

impl ErrorSink for RecordingSink {
    fn report(&self, error: &SyncError) {
        self.errors.lock().unwrap().push(error.clone());
    }
}

pub struct Harness {
    pub session: Arc<SyncSession>,
    pub store: Arc<GatedStore>,
    pub feed: Arc<MemoryFeed>,
    pub sink: Arc<RecordingSink>,
    pub owner: OwnerId,
}

impl Harness {
    pub fn new() -> Self {
        let feed = Arc::new(MemoryFeed::new());
        let store = Arc::new(GatedStore::new(Arc::clone(&feed)));
        let sink = Arc::new(RecordingSink::default());
        let session = SyncSession::builder(store.clone(), feed.clone())
            .error_sink(sink.clone())
            .build();
        Self {
            session: Arc::new(session),
            store,
            feed,
            sink,
            owner: "u1".into(),
        }
    }

    pub async fn started() -> Self {
        let h = Self::new();
        h.session.start(h.owner.clone()).await.unwrap();
        h
    }

    /// Simulate a push notification for the harness owner.
    pub fn notify(&self) {
        self.feed.publish(&self.owner);
    }

    pub fn view_ids(&self) -> Vec<String> {
        self.session
            .current_view()
            .iter()
            .map(|r| r.id.to_string())
            .collect()
    }
}

pub fn record(id: &str, owner: &str, created_secs: i64) -> BookmarkRecord {
    BookmarkRecord {
        id: id.into(),
        owner_id: owner.into(),
        title: format!("Bookmark {}", id),
        url: format!("https://{}.example/", id),
        favicon: None,
        last_visited: None,
        created_at: Utc.timestamp_opt(created_secs, 0).unwrap(),
    }
}

/// Yield to spawned tasks until `cond` holds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

/// Give spawned tasks a chance to run.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
