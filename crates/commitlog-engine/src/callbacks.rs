//! Lifecycle callbacks invoked before a commit is flushed.
//!
//! Callbacks are registered per (entity, phase) at startup and called in
//! registration order. They receive the committing context mutably and may
//! create, modify or delete further objects; the commit keeps draining
//! callbacks until no object needs one.

use crate::context::ObjectContext;
use commitlog_core::{ExError, ObjectId};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LifecyclePhase {
    /// Object is about to be inserted
    PrePersist,
    /// Object is about to be updated
    PreUpdate,
    /// Object is about to be deleted
    PreRemove,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::PrePersist => "pre_persist",
            LifecyclePhase::PreUpdate => "pre_update",
            LifecyclePhase::PreRemove => "pre_remove",
        }
    }
}

pub type Callback =
    Arc<dyn Fn(&mut ObjectContext, &ObjectId) -> Result<(), ExError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct CallbackRegistry {
    callbacks: HashMap<(String, LifecyclePhase), Vec<Callback>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, entity: &str, phase: LifecyclePhase, callback: F)
    where
        F: Fn(&mut ObjectContext, &ObjectId) -> Result<(), ExError> + Send + Sync + 'static,
    {
        self.callbacks
            .entry((entity.to_string(), phase))
            .or_default()
            .push(Arc::new(callback));
    }

    /// Callbacks for one entity and phase, in registration order
    pub fn for_phase(&self, entity: &str, phase: LifecyclePhase) -> &[Callback] {
        self.callbacks
            .get(&(entity.to_string(), phase))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.callbacks.keys().collect();
        keys.sort();
        f.debug_struct("CallbackRegistry")
            .field("registered", &keys)
            .finish()
    }
}
