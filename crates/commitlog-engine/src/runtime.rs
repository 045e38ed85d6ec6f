//! Runtime assembly.
//!
//! A `Runtime` owns the entity metadata, the store, the callback registry
//! and the commit log configuration. It is immutable once built and shared
//! by every `ObjectContext` through an `Arc`.

use crate::callbacks::{CallbackRegistry, LifecyclePhase};
use crate::commit_log::CommitLogFilter;
use crate::context::ObjectContext;
use crate::module::CommitLogModuleExtender;
use crate::Result;
use commitlog_core::{EntityResolver, ExError, ExErrorKind, ObjectId};
use commitlog_store::Store;
use std::sync::Arc;

#[derive(Debug)]
pub struct Runtime {
    resolver: EntityResolver,
    store: Store,
    callbacks: CallbackRegistry,
    commit_log: CommitLogFilter,
}

impl Runtime {
    pub fn builder(resolver: EntityResolver) -> RuntimeBuilder {
        RuntimeBuilder::new(resolver)
    }

    /// Open a fresh unit of work
    pub fn new_context(self: &Arc<Self>) -> ObjectContext {
        ObjectContext::new(Arc::clone(self))
    }

    pub fn resolver(&self) -> &EntityResolver {
        &self.resolver
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    pub fn commit_log(&self) -> &CommitLogFilter {
        &self.commit_log
    }
}

pub struct RuntimeBuilder {
    resolver: EntityResolver,
    store: Option<Store>,
    callbacks: CallbackRegistry,
    commit_log: CommitLogModuleExtender,
}

impl RuntimeBuilder {
    pub fn new(resolver: EntityResolver) -> Self {
        Self {
            resolver,
            store: None,
            callbacks: CallbackRegistry::new(),
            commit_log: CommitLogModuleExtender::default(),
        }
    }

    /// Use this store; an in-memory store is opened otherwise
    pub fn store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    pub fn callback<F>(mut self, entity: &str, phase: LifecyclePhase, callback: F) -> Self
    where
        F: Fn(&mut ObjectContext, &ObjectId) -> std::result::Result<(), ExError>
            + Send
            + Sync
            + 'static,
    {
        self.callbacks.register(entity, phase, callback);
        self
    }

    /// Add a commit log configuration block; may be called repeatedly
    pub fn commit_log(mut self, module: CommitLogModuleExtender) -> Self {
        self.commit_log = self.commit_log.merge(module);
        self
    }

    /// Validate metadata, prepare the schema and freeze the configuration.
    ///
    /// # Errors
    ///
    /// `InvalidMetadata` for an inconsistent entity model or a schema that
    /// does not match it, `FilterMisconfigured` when an ignore list names
    /// an unknown entity, and `Persistence` when the store cannot be
    /// opened.
    pub fn build(self) -> Result<Arc<Runtime>> {
        self.resolver.validate().map_err(ExError::from)?;

        let filter = self.commit_log.filter_config();
        for entity in filter
            .ignored_attributes
            .keys()
            .chain(filter.ignored_relationships.keys())
        {
            if self.resolver.entity(entity).is_err() {
                return Err(ExError::new(ExErrorKind::FilterMisconfigured)
                    .with_op("build_runtime")
                    .with_entity(entity.as_str())
                    .with_message("Ignore list names an unknown entity"));
            }
        }

        let store = match self.store {
            Some(store) => store,
            None => Store::open_in_memory()?,
        };
        store.ensure_schema(&self.resolver)?;

        let commit_log = CommitLogFilter::new(self.commit_log);
        tracing::info!(
            entities = self.resolver.entities().count(),
            listeners = commit_log.listener_count(),
            exclude_from_transaction = commit_log.is_excluded_from_transaction(),
            "runtime built"
        );

        Ok(Arc::new(Runtime {
            resolver: self.resolver,
            store,
            callbacks: self.callbacks,
            commit_log,
        }))
    }
}
