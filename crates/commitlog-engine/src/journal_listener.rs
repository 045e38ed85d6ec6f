//! Listener that records every dispatched ChangeMap in the commit journal.

use crate::context::ObjectContext;
use crate::listener::CommitLogListener;
use commitlog_core::{render_change_map_summary, ChangeMap, ExError};
use commitlog_core_types::correlation::CommitContext;

/// Appends to the store's `commit_journal` table. Inside the commit
/// transaction the row is rolled back together with the data.
#[derive(Debug, Default, Clone, Copy)]
pub struct JournalListener;

impl JournalListener {
    pub fn new() -> Self {
        Self
    }
}

impl CommitLogListener for JournalListener {
    fn on_post_commit(&self, origin: &ObjectContext, changes: &ChangeMap) -> Result<(), ExError> {
        let commit = origin
            .commit_context()
            .cloned()
            .unwrap_or_else(|| CommitContext::new(origin.context_id().clone()));

        origin.runtime().store().append_journal(&commit, changes)?;
        tracing::debug!(
            commit_id = commit.commit_id.as_str(),
            summary = %render_change_map_summary(changes),
            "commit journaled"
        );
        Ok(())
    }
}
