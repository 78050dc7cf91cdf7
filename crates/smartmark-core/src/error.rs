use crate::bookmark::BookmarkId;
use crate::link::LinkError;
use crate::session::SessionPhase;
use crate::store::{StoreError, StoreOp};

/// Errors surfaced by a sync session.
///
/// Collaborator failures ([`StoreError`]) are mapped into the variant that
/// says what happened to the local view: nothing (`SyncInitFailed`), rolled
/// back (`MutationRejected`) or left in place (`MutationBestEffort`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("Initial load failed: {0}")]
    SyncInitFailed(StoreError),

    #[error("Remote {op} rejected: {source}")]
    MutationRejected { op: StoreOp, source: StoreError },

    #[error("Best-effort update of {id} failed: {source}")]
    MutationBestEffort { id: BookmarkId, source: StoreError },

    #[error("Reload failed: {0}")]
    ReloadFailed(StoreError),

    #[error("Invalid link: {0}")]
    InvalidLink(#[from] LinkError),

    #[error("Unknown bookmark: {0}")]
    UnknownBookmark(BookmarkId),

    #[error("Session is not live (phase: {0})")]
    NotLive(SessionPhase),

    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition { from: SessionPhase, to: SessionPhase },
}

/// Destination for failures that are not returned to a caller.
///
/// Touch write-backs and feed-triggered reloads run detached from the
/// operation that caused them; their errors land here.
pub trait ErrorSink: Send + Sync {
    fn report(&self, error: &SyncError);
}

/// Default sink: log at `warn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, error: &SyncError) {
        tracing::warn!(%error, "sync error");
    }
}
