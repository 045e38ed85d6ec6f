//! Post-commit listener contract

use crate::context::ObjectContext;
use commitlog_core::{ChangeMap, ExError};

/// Receives the ChangeMap of every commit that captured at least one change.
///
/// Listeners run synchronously on the committing thread, in registration
/// order, and all see the same `ChangeMap`. `origin` is the context that
/// committed; a listener that persists its own objects does so in a fresh
/// context from `origin.runtime()`.
pub trait CommitLogListener: Send + Sync {
    /// # Errors
    ///
    /// Any error is returned to the caller of `commit_changes()` wrapped
    /// as `ListenerFailed`; remaining listeners are not invoked.
    fn on_post_commit(&self, origin: &ObjectContext, changes: &ChangeMap) -> Result<(), ExError>;
}

impl<F> CommitLogListener for F
where
    F: Fn(&ObjectContext, &ChangeMap) -> Result<(), ExError> + Send + Sync,
{
    fn on_post_commit(&self, origin: &ObjectContext, changes: &ChangeMap) -> Result<(), ExError> {
        self(origin, changes)
    }
}
