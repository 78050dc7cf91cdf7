//! Per-session reconciliation of the local view against the remote store.
//!
//! A [`SyncSession`] walks `Uninitialized → Loading → Live → Terminated`.
//! While live, three sources change the cache: local mutations, their
//! remote acknowledgements, and change-feed notifications. The rules that
//! keep them from racing:
//!
//! - Feed notifications never fetch directly. They set a single
//!   `reload_requested` flag and wake one driver task, so any burst that
//!   arrives during an in-flight reload collapses into one follow-up.
//! - Add and delete hold a pending-mutation marker until their remote call
//!   resolves. Reloads wait for the marker to clear, and a snapshot fetched
//!   while a mutation started is discarded and fetched again.
//! - All cache changes happen under the state lock, which is never held
//!   across an await. Continuations that resolve after `stop` leave the
//!   (already discarded) cache alone.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::bookmark::{BookmarkDraft, BookmarkId, BookmarkRecord, OwnerId};
use crate::cache::LocalCache;
use crate::config::LinkConfig;
use crate::error::{ErrorSink, SyncError, TracingErrorSink};
use crate::feed::{ChangeCallback, ChangeFeed, SubscriptionHandle};
use crate::filter::ViewFilter;
use crate::store::{BookmarkMutation, RemoteStore, StoreOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Uninitialized,
    Loading,
    Live,
    Terminated,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Uninitialized => write!(f, "uninitialized"),
            SessionPhase::Loading => write!(f, "loading"),
            SessionPhase::Live => write!(f, "live"),
            SessionPhase::Terminated => write!(f, "terminated"),
        }
    }
}

/// Counters describing how change notifications were handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Snapshots fetched and installed after the initial load.
    pub reloads: u64,
    /// Notifications absorbed by a reload that was already queued.
    pub coalesced: u64,
    /// Reloads held back by a pending add or delete.
    pub deferred: u64,
    pub reload_failures: u64,
}

struct SessionState {
    phase: SessionPhase,
    owner: Option<OwnerId>,
    cache: LocalCache,
    filter: ViewFilter,
    reload_requested: bool,
    reload_in_flight: bool,
    mutations_pending: usize,
    // Bumped whenever an add or delete starts.
    mutation_epoch: u64,
    subscription: Option<SubscriptionHandle>,
    driver: Option<JoinHandle<()>>,
    stats: SyncStats,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: SessionPhase::Uninitialized,
            owner: None,
            cache: LocalCache::new(),
            filter: ViewFilter::default(),
            reload_requested: false,
            reload_in_flight: false,
            mutations_pending: 0,
            mutation_epoch: 0,
            subscription: None,
            driver: None,
            stats: SyncStats::default(),
        }
    }

    fn live_owner(&self) -> Result<OwnerId, SyncError> {
        match (self.phase, &self.owner) {
            (SessionPhase::Live, Some(owner)) => Ok(owner.clone()),
            (phase, _) => Err(SyncError::NotLive(phase)),
        }
    }
}

struct SessionInner {
    store: Arc<dyn RemoteStore>,
    feed: Arc<dyn ChangeFeed>,
    sink: Arc<dyn ErrorSink>,
    links: LinkConfig,
    state: Mutex<SessionState>,
    wake: Notify,
    revision: watch::Sender<u64>,
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    fn begin_mutation(&self, state: &mut SessionState) -> MutationGuard<'_> {
        state.mutations_pending += 1;
        state.mutation_epoch += 1;
        MutationGuard { inner: self }
    }

    /// Feed callback entry point.
    fn request_reload(&self) {
        let mut st = self.lock();
        if st.phase != SessionPhase::Live {
            return;
        }
        if st.reload_requested {
            st.stats.coalesced += 1;
            tracing::trace!("reload already queued; coalescing notification");
            return;
        }
        st.reload_requested = true;
        if st.reload_in_flight {
            tracing::debug!("reload in flight; queued one follow-up");
            return;
        }
        if st.mutations_pending > 0 {
            st.stats.deferred += 1;
            tracing::debug!(pending = st.mutations_pending, "mutation pending; deferring reload");
            return;
        }
        drop(st);
        self.wake.notify_one();
    }

    /// Serve queued reloads until none is left. Returns false once the
    /// session is no longer live.
    async fn run_reloads(&self) -> bool {
        loop {
            let (owner, epoch) = {
                let mut st = self.lock();
                if st.phase != SessionPhase::Live {
                    return false;
                }
                if !st.reload_requested || st.reload_in_flight || st.mutations_pending > 0 {
                    return true;
                }
                let Some(owner) = st.owner.clone() else {
                    return false;
                };
                st.reload_requested = false;
                st.reload_in_flight = true;
                (owner, st.mutation_epoch)
            };

            let result = self.store.list(&owner).await;

            let mut st = self.lock();
            if st.phase != SessionPhase::Live {
                return false;
            }
            st.reload_in_flight = false;
            match result {
                Ok(records) if st.mutation_epoch == epoch => {
                    let discarded = st.cache.replace_all(&owner, records);
                    st.stats.reloads += 1;
                    tracing::debug!(count = st.cache.len(), discarded, "snapshot replaced");
                    drop(st);
                    self.bump_revision();
                }
                Ok(_) => {
                    // A local add/delete started while this snapshot was in
                    // flight; it may not reflect that mutation.
                    st.reload_requested = true;
                    st.stats.deferred += 1;
                    tracing::debug!("snapshot raced a local mutation; refetching");
                }
                Err(e) => {
                    st.stats.reload_failures += 1;
                    drop(st);
                    tracing::warn!(error = %e, "reload failed; waiting for next change notification");
                    self.sink.report(&SyncError::ReloadFailed(e));
                }
            }
        }
    }
}

/// Pending-mutation marker. Clearing the last one releases deferred reloads.
struct MutationGuard<'a> {
    inner: &'a SessionInner,
}

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        let mut st = self.inner.lock();
        st.mutations_pending = st.mutations_pending.saturating_sub(1);
        let wake = st.phase == SessionPhase::Live
            && st.mutations_pending == 0
            && st.reload_requested
            && !st.reload_in_flight;
        drop(st);
        if wake {
            self.inner.wake.notify_one();
        }
    }
}

async fn drive_reloads(inner: Arc<SessionInner>) {
    loop {
        inner.wake.notified().await;
        if !inner.run_reloads().await {
            break;
        }
    }
    tracing::debug!("reload driver stopped");
}

/// Builder for [`SyncSession`].
pub struct SyncSessionBuilder {
    store: Arc<dyn RemoteStore>,
    feed: Arc<dyn ChangeFeed>,
    sink: Arc<dyn ErrorSink>,
    links: LinkConfig,
}

impl SyncSessionBuilder {
    pub fn error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn link_config(mut self, links: LinkConfig) -> Self {
        self.links = links;
        self
    }

    pub fn build(self) -> SyncSession {
        let (revision, _) = watch::channel(0);
        SyncSession {
            inner: Arc::new(SessionInner {
                store: self.store,
                feed: self.feed,
                sink: self.sink,
                links: self.links,
                state: Mutex::new(SessionState::new()),
                wake: Notify::new(),
                revision,
            }),
        }
    }
}

/// One authenticated user's synchronized bookmark view.
///
/// Must be driven from within a Tokio runtime: `start` spawns the reload
/// driver and `touch_bookmark` spawns its remote write.
pub struct SyncSession {
    inner: Arc<SessionInner>,
}

impl SyncSession {
    pub fn new(store: Arc<dyn RemoteStore>, feed: Arc<dyn ChangeFeed>) -> Self {
        Self::builder(store, feed).build()
    }

    pub fn builder(store: Arc<dyn RemoteStore>, feed: Arc<dyn ChangeFeed>) -> SyncSessionBuilder {
        SyncSessionBuilder {
            store,
            feed,
            sink: Arc::new(TracingErrorSink),
            links: LinkConfig::default(),
        }
    }

    /// Load the owner's collection and go live.
    ///
    /// On a failed load the session stays in `Loading` and `start` may be
    /// called again; the load is never retried automatically.
    pub async fn start(&self, owner: impl Into<OwnerId>) -> Result<(), SyncError> {
        let owner = owner.into();
        {
            let mut st = self.inner.lock();
            match st.phase {
                SessionPhase::Uninitialized | SessionPhase::Loading => {}
                from => {
                    return Err(SyncError::InvalidTransition {
                        from,
                        to: SessionPhase::Loading,
                    })
                }
            }
            st.phase = SessionPhase::Loading;
            st.owner = Some(owner.clone());
        }
        tracing::info!(%owner, "loading bookmarks");

        let records = match self.inner.store.list(&owner).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(%owner, error = %e, "initial load failed");
                return Err(SyncError::SyncInitFailed(e));
            }
        };

        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let on_change: ChangeCallback = Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.request_reload();
            }
        });
        let handle = self
            .inner
            .feed
            .subscribe(&owner, on_change)
            .map_err(SyncError::SyncInitFailed)?;

        let mut st = self.inner.lock();
        if st.phase != SessionPhase::Loading || st.owner.as_ref() != Some(&owner) {
            // Stopped, or superseded by a concurrent start, while loading.
            let from = st.phase;
            drop(st);
            self.inner.feed.unsubscribe(handle);
            return Err(match from {
                SessionPhase::Terminated => SyncError::NotLive(from),
                _ => SyncError::InvalidTransition {
                    from,
                    to: SessionPhase::Live,
                },
            });
        }
        let discarded = st.cache.replace_all(&owner, records);
        st.phase = SessionPhase::Live;
        st.subscription = Some(handle);
        st.driver = Some(tokio::spawn(drive_reloads(Arc::clone(&self.inner))));
        let count = st.cache.len();
        drop(st);

        self.inner.bump_revision();
        tracing::info!(%owner, count, discarded, "session live");
        Ok(())
    }

    /// End the session: release the feed subscription and discard the cache.
    ///
    /// Idempotent. Reloads and mutations still in flight finish without
    /// touching the cache.
    pub fn stop(&self) {
        let (subscription, driver, previous) = {
            let mut st = self.inner.lock();
            if st.phase == SessionPhase::Terminated {
                return;
            }
            let previous = st.phase;
            st.phase = SessionPhase::Terminated;
            st.cache.clear();
            st.reload_requested = false;
            (st.subscription.take(), st.driver.take(), previous)
        };
        if let Some(handle) = subscription {
            self.inner.feed.unsubscribe(handle);
        }
        if let Some(driver) = driver {
            driver.abort();
        }
        self.inner.bump_revision();
        if previous != SessionPhase::Uninitialized {
            tracing::info!(from = %previous, "session terminated");
        }
    }

    /// Create a bookmark remotely, then insert the stored record.
    ///
    /// Ids and creation times are assigned by the store, so nothing is
    /// shown before the store accepts the bookmark.
    pub async fn add_bookmark(&self, title: &str, url: &str) -> Result<BookmarkRecord, SyncError> {
        let draft = BookmarkDraft::derive(title, url, &self.inner.links)?;
        let (owner, guard) = {
            let mut st = self.inner.lock();
            let owner = st.live_owner()?;
            let guard = self.inner.begin_mutation(&mut st);
            (owner, guard)
        };

        let result = self.inner.store.create(&owner, draft).await;

        let mut st = self.inner.lock();
        let mut changed = false;
        let outcome = match result {
            Ok(record) => {
                if record.owner_id != owner {
                    tracing::warn!(id = %record.id, %owner, "store returned a record of another owner");
                } else if st.phase == SessionPhase::Live {
                    st.cache.upsert(record.clone());
                    changed = true;
                }
                Ok(record)
            }
            Err(source) => {
                tracing::info!(error = %source, "add rejected");
                Err(SyncError::MutationRejected {
                    op: StoreOp::Create,
                    source,
                })
            }
        };
        drop(st);
        drop(guard);
        if changed {
            self.inner.bump_revision();
        }
        outcome
    }

    /// Record a visit now. Applied locally at once; the remote write runs
    /// in the background and its failure is reported to the error sink
    /// without rolling the timestamp back.
    pub fn touch_bookmark(&self, id: &BookmarkId) -> Result<(), SyncError> {
        let now = Utc::now();
        {
            let mut st = self.inner.lock();
            st.live_owner()?;
            if !st.cache.touch(id, now) {
                return Err(SyncError::UnknownBookmark(id.clone()));
            }
        }
        self.inner.bump_revision();

        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        tokio::spawn(async move {
            let mutations = vec![BookmarkMutation::SetLastVisited(Some(now))];
            if let Err(source) = inner.store.update(&id, mutations).await {
                tracing::warn!(%id, error = %source, "visit timestamp not saved");
                inner
                    .sink
                    .report(&SyncError::MutationBestEffort { id, source });
            }
        });
        Ok(())
    }

    /// Remove a bookmark locally, then remotely.
    ///
    /// Only ids held in the owner's view can be deleted. If the store fails
    /// with anything but `NotFound`, the record is put back where it was
    /// and the failure is returned.
    pub async fn delete_bookmark(&self, id: &BookmarkId) -> Result<(), SyncError> {
        let (removed, guard) = {
            let mut st = self.inner.lock();
            st.live_owner()?;
            let Some(removed) = st.cache.remove(id) else {
                return Err(SyncError::UnknownBookmark(id.clone()));
            };
            let guard = self.inner.begin_mutation(&mut st);
            (removed, guard)
        };
        self.inner.bump_revision();

        match self.inner.store.delete(id).await {
            Ok(()) => Ok(()),
            Err(source) if source.is_not_found() => {
                tracing::debug!(%id, "already absent upstream");
                Ok(())
            }
            Err(source) => {
                let mut st = self.inner.lock();
                let restored = st.phase == SessionPhase::Live;
                if restored {
                    st.cache.restore(removed);
                }
                drop(st);
                drop(guard);
                if restored {
                    self.inner.bump_revision();
                }
                tracing::info!(%id, error = %source, restored, "delete rejected");
                Err(SyncError::MutationRejected {
                    op: StoreOp::Delete,
                    source,
                })
            }
        }
    }

    pub fn set_filter(&self, text: impl Into<String>) {
        self.inner.lock().filter.set(text);
        self.inner.bump_revision();
    }

    pub fn filter(&self) -> String {
        self.inner.lock().filter.text().to_string()
    }

    /// The filtered collection, newest first, computed from the live cache.
    pub fn current_view(&self) -> Vec<BookmarkRecord> {
        let st = self.inner.lock();
        st.filter.project(st.cache.records()).cloned().collect()
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.lock().phase
    }

    pub fn owner(&self) -> Option<OwnerId> {
        self.inner.lock().owner.clone()
    }

    pub fn stats(&self) -> SyncStats {
        self.inner.lock().stats
    }

    /// Revision counter that advances on every change to the view.
    pub fn subscribe_view(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.stop();
    }
}
