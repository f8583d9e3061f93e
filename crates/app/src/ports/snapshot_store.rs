//! Snapshot store port: where the hub persists its state.

use std::future::Future;

use apparatus_domain::snapshot::SavedState;

use crate::error::PersistenceError;

/// Durable location for [`SavedState`]s.
///
/// Implementations must never leave a partially written state behind: a
/// failed `save` keeps the previous content intact.
pub trait SnapshotStore {
    /// Human-readable location, used in logs.
    fn location(&self) -> String;

    /// Replace the stored state with `state`.
    fn save(&self, state: &SavedState)
    -> impl Future<Output = Result<(), PersistenceError>> + Send;

    /// Read the stored state. Returns `Ok(None)` when nothing was saved yet.
    fn load(&self) -> impl Future<Output = Result<Option<SavedState>, PersistenceError>> + Send;
}

impl<T: SnapshotStore + Send + Sync> SnapshotStore for std::sync::Arc<T> {
    fn location(&self) -> String {
        (**self).location()
    }

    fn save(
        &self,
        state: &SavedState,
    ) -> impl Future<Output = Result<(), PersistenceError>> + Send {
        (**self).save(state)
    }

    fn load(&self) -> impl Future<Output = Result<Option<SavedState>, PersistenceError>> + Send {
        (**self).load()
    }
}
