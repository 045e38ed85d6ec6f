//! Commit log configuration surface.
//!
//! ```no_run
//! use commitlog_engine::{CommitLogModule, JournalListener};
//!
//! let module = CommitLogModule::extend()
//!     .add_listener(JournalListener::new())
//!     .commit_log_annotation_entities_only()
//!     .exclude_from_transaction();
//! # let _ = module;
//! ```

use crate::listener::CommitLogListener;
use commitlog_core::FilterConfig;
use std::sync::Arc;

/// Entry point for configuring change capture
pub struct CommitLogModule;

impl CommitLogModule {
    /// Start a configuration block; repeated blocks are merged at build
    pub fn extend() -> CommitLogModuleExtender {
        CommitLogModuleExtender::default()
    }
}

#[derive(Clone, Default)]
pub struct CommitLogModuleExtender {
    pub(crate) listeners: Vec<Arc<dyn CommitLogListener>>,
    pub(crate) filter: FilterConfig,
    pub(crate) exclude_from_transaction: bool,
}

impl CommitLogModuleExtender {
    pub fn add_listener<L: CommitLogListener + 'static>(self, listener: L) -> Self {
        self.add_shared_listener(Arc::new(listener))
    }

    /// Register a listener the caller keeps a handle to
    pub fn add_shared_listener(mut self, listener: Arc<dyn CommitLogListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Capture changes only for entities carrying a commit log annotation
    pub fn commit_log_annotation_entities_only(mut self) -> Self {
        self.filter.annotated_entities_only = true;
        self
    }

    /// Notify listeners after the transaction commits instead of inside it.
    ///
    /// A commit that joined an outer transaction cannot close it, so its
    /// listeners still run with a bound transaction.
    pub fn exclude_from_transaction(mut self) -> Self {
        self.exclude_from_transaction = true;
        self
    }

    pub fn ignored_attributes(mut self, entity: &str, names: &[&str]) -> Self {
        self.filter = self.filter.ignore_attributes(entity, names);
        self
    }

    pub fn ignored_relationships(mut self, entity: &str, names: &[&str]) -> Self {
        self.filter = self.filter.ignore_relationships(entity, names);
        self
    }

    /// Fold another configuration block into this one. Listeners keep
    /// their registration order; flags are or-ed.
    pub fn merge(mut self, other: CommitLogModuleExtender) -> Self {
        self.listeners.extend(other.listeners);
        self.filter = self.filter.merge(other.filter);
        self.exclude_from_transaction |= other.exclude_from_transaction;
        self
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn filter_config(&self) -> &FilterConfig {
        &self.filter
    }

    pub fn is_excluded_from_transaction(&self) -> bool {
        self.exclude_from_transaction
    }
}

impl std::fmt::Debug for CommitLogModuleExtender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitLogModuleExtender")
            .field("listeners", &self.listeners.len())
            .field("filter", &self.filter)
            .field("exclude_from_transaction", &self.exclude_from_transaction)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ObjectContext;
    use commitlog_core::{ChangeMap, ExError};

    struct Noop;

    impl CommitLogListener for Noop {
        fn on_post_commit(&self, _: &ObjectContext, _: &ChangeMap) -> Result<(), ExError> {
            Ok(())
        }
    }

    #[test]
    fn test_merge_blocks() {
        let first = CommitLogModule::extend()
            .add_listener(Noop)
            .ignored_attributes("Auditable2", &["charProperty1"]);
        let second = CommitLogModule::extend()
            .add_listener(Noop)
            .commit_log_annotation_entities_only()
            .ignored_attributes("Auditable2", &["charProperty2"]);

        let merged = first.merge(second);
        assert_eq!(merged.listener_count(), 2);
        assert!(merged.filter_config().annotated_entities_only);
        assert!(!merged.is_excluded_from_transaction());
        assert_eq!(merged.filter_config().ignored_attributes["Auditable2"].len(), 2);
    }
}
