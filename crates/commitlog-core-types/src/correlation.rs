//! Correlation types for commit tracking
//!
//! Every `commit_changes()` call gets a fresh [`CommitId`] and every object
//! context carries a [`ContextId`], so log lines and journal rows emitted by
//! nested commits can be tied back to the commit that triggered them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a single commit invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitId(String);

impl CommitId {
    /// Generate a new CommitId using UUIDv7 (time ordered)
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Create from an existing string (for deserialization)
    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for CommitId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one object context (one unit of work)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(String);

impl ContextId {
    /// Generate a new random ContextId using UUIDv7
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Create from an existing string (for deserialization)
    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation carried through one commit
#[derive(Debug, Clone)]
pub struct CommitContext {
    pub commit_id: CommitId,
    pub context_id: ContextId,
}

impl CommitContext {
    /// Start a new commit for the given context
    pub fn new(context_id: ContextId) -> Self {
        Self {
            commit_id: CommitId::new(),
            context_id,
        }
    }

    /// Reuse an existing commit id (journal replay, tests)
    pub fn with_commit_id(mut self, commit_id: CommitId) -> Self {
        self.commit_id = commit_id;
        self
    }
}
