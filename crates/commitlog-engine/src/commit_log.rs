//! Commit orchestration with change capture.
//!
//! ## Phases (in order):
//! 1. Pre-commit: lifecycle callbacks, drained until stable
//! 2. Flush: one batch inside a thread-bound transaction
//! 3. Build ChangeMap: classify, filter, aggregate over the whole commit
//! 4. Dispatch: listeners in registration order, inside the transaction
//!    unless `exclude_from_transaction` is set
//!
//! A failed flush rolls back and skips steps 3 and 4. A failed listener
//! does not undo the commit; the error is still returned to the caller.
//! When the transaction then fails to commit as well, the commit error is
//! returned with the listener error at the root of its source chain.

use crate::context::ObjectContext;
use crate::listener::CommitLogListener;
use crate::module::CommitLogModuleExtender;
use crate::Result;
use commitlog_core::{
    build_change_map, log_phase, ChangeFilter, ChangeMap, ExError, ExErrorKind, FilterConfig,
    IdMap,
};
use commitlog_core_types::correlation::CommitContext;
use commitlog_store::TransactionScope;
use std::sync::Arc;

const OP: &str = "commit_changes";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPhase {
    Idle,
    PreCommitRunning,
    Flushing,
    BuildingChangeMap,
    Dispatching,
}

impl CommitPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitPhase::Idle => "idle",
            CommitPhase::PreCommitRunning => "pre_commit_running",
            CommitPhase::Flushing => "flushing",
            CommitPhase::BuildingChangeMap => "building_change_map",
            CommitPhase::Dispatching => "dispatching",
        }
    }
}

/// The commit orchestrator, configured once per runtime
pub struct CommitLogFilter {
    listeners: Vec<Arc<dyn CommitLogListener>>,
    filter: FilterConfig,
    exclude_from_transaction: bool,
}

impl CommitLogFilter {
    pub(crate) fn new(config: CommitLogModuleExtender) -> Self {
        Self {
            listeners: config.listeners,
            filter: config.filter,
            exclude_from_transaction: config.exclude_from_transaction,
        }
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

    fn enter(&self, phase: CommitPhase, commit: &CommitContext) {
        log_phase!(OP, phase.as_str(), commit_id = commit.commit_id.as_str());
    }

    pub(crate) fn commit(&self, context: &mut ObjectContext, commit: &CommitContext) -> Result<()> {
        let result = self.run(context, commit);
        self.enter(CommitPhase::Idle, commit);
        result
    }

    fn run(&self, context: &mut ObjectContext, commit: &CommitContext) -> Result<()> {
        let runtime = Arc::clone(context.runtime());

        self.enter(CommitPhase::PreCommitRunning, commit);
        context.run_callbacks()?;
        if !context.has_changes() {
            return Ok(());
        }
        let batch = context.build_batch()?;

        self.enter(CommitPhase::Flushing, commit);
        let scope = TransactionScope::begin(runtime.store())?;
        let generated = runtime
            .store()
            .flush(runtime.resolver(), &batch)
            .map_err(|err| {
                ExError::new(ExErrorKind::FlushFailed)
                    .with_op(OP)
                    .with_commit_id(commit.commit_id.clone())
                    .with_message("Flush failed, transaction rolled back")
                    .with_source(err)
            })?;
        let mut diffs = context.diffs().to_vec();
        diffs.extend(generated.to_diffs());
        // generated keys and moved keys
        let id_map = IdMap::from_diffs(&diffs);

        let changes = if self.listeners.is_empty() {
            None
        } else {
            self.enter(CommitPhase::BuildingChangeMap, commit);
            let mut filter = ChangeFilter::new(runtime.resolver(), &self.filter);
            let changes = build_change_map(&diffs, runtime.resolver(), &mut filter, &*context)
                .map_err(|err| {
                    ExError::from(err)
                        .with_op(OP)
                        .with_commit_id(commit.commit_id.clone())
                })?;
            Some(changes)
        };

        let Some(changes) = changes.filter(|c| !c.is_empty()) else {
            scope.commit()?;
            context.post_commit(&id_map);
            return Ok(());
        };

        self.enter(CommitPhase::Dispatching, commit);
        tracing::info!(
            commit_id = commit.commit_id.as_str(),
            changes = changes.key_count(),
            unique_changes = changes.unique_changes().len(),
            listeners = self.listeners.len(),
            "dispatching commit log"
        );

        if self.exclude_from_transaction {
            scope.commit()?;
            context.post_commit(&id_map);
            self.notify(context, &changes, commit)
        } else {
            let notified = self.notify(context, &changes, commit);
            if let Err(err) = scope.commit() {
                return Err(match notified {
                    Err(listener_err) => err.with_root_cause(listener_err),
                    Ok(()) => err,
                });
            }
            context.post_commit(&id_map);
            notified
        }
    }

    fn notify(
        &self,
        origin: &ObjectContext,
        changes: &ChangeMap,
        commit: &CommitContext,
    ) -> Result<()> {
        for (index, listener) in self.listeners.iter().enumerate() {
            listener.on_post_commit(origin, changes).map_err(|err| {
                ExError::new(ExErrorKind::ListenerFailed)
                    .with_op("on_post_commit")
                    .with_commit_id(commit.commit_id.clone())
                    .with_context_id(commit.context_id.clone())
                    .with_message(format!("Commit log listener #{} failed", index))
                    .with_source(err)
            })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for CommitLogFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitLogFilter")
            .field("listeners", &self.listeners.len())
            .field("filter", &self.filter)
            .field("exclude_from_transaction", &self.exclude_from_transaction)
            .finish()
    }
}
