use commitlog_core_types::{CommitId, ContextId};
use thiserror::Error;

/// Result type alias using CommitLogError
pub type Result<T> = std::result::Result<T, CommitLogError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable error code that can be used for programmatic
/// error handling and in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    // Structural/Validation
    InvalidInput,
    InvalidObjectId,
    NotFound,
    Deleted,
    UnknownEntity,
    UnknownProperty,
    InvalidRelationship,
    InvalidMetadata,

    // Mutation
    DeleteDenied,

    // Change filter
    FilterMisconfigured,

    // Commit lifecycle
    CallbackFailed,
    FlushFailed,
    ListenerFailed,
    TransactionRolledBack,

    // Integration/IO
    Persistence,
    Serialization,
    Concurrency,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::InvalidObjectId => "ERR_INVALID_OBJECT_ID",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::Deleted => "ERR_DELETED",
            ExErrorKind::UnknownEntity => "ERR_UNKNOWN_ENTITY",
            ExErrorKind::UnknownProperty => "ERR_UNKNOWN_PROPERTY",
            ExErrorKind::InvalidRelationship => "ERR_INVALID_RELATIONSHIP",
            ExErrorKind::InvalidMetadata => "ERR_INVALID_METADATA",
            ExErrorKind::DeleteDenied => "ERR_DELETE_DENIED",
            ExErrorKind::FilterMisconfigured => "ERR_FILTER_MISCONFIGURED",
            ExErrorKind::CallbackFailed => "ERR_CALLBACK_FAILED",
            ExErrorKind::FlushFailed => "ERR_FLUSH_FAILED",
            ExErrorKind::ListenerFailed => "ERR_LISTENER_FAILED",
            ExErrorKind::TransactionRolledBack => "ERR_TRANSACTION_ROLLED_BACK",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Concurrency => "ERR_CONCURRENCY",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }
}

/// Canonical structured error type
///
/// Carries classification fields for programmatic handling and rich context
/// for debugging. Store and engine operations return this type directly.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    entity: Option<String>,
    object_id: Option<String>,
    commit_id: Option<CommitId>,
    context_id: Option<ContextId>,
    message: String,
    source: Option<Box<ExError>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            entity: None,
            object_id: None,
            commit_id: None,
            context_id: None,
            message: String::new(),
            source: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add entity name context
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    /// Add object id context (rendered form)
    pub fn with_object_id(mut self, id: impl Into<String>) -> Self {
        self.object_id = Some(id.into());
        self
    }

    /// Add commit correlation
    pub fn with_commit_id(mut self, commit_id: CommitId) -> Self {
        self.commit_id = Some(commit_id);
        self
    }

    /// Add context correlation
    pub fn with_context_id(mut self, context_id: ContextId) -> Self {
        self.context_id = Some(context_id);
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Append `cause` at the end of the source chain, keeping any source
    /// already attached
    pub fn with_root_cause(mut self, cause: ExError) -> Self {
        let root = match self.source.take() {
            Some(source) => (*source).with_root_cause(cause),
            None => cause,
        };
        self.source = Some(Box::new(root));
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Get the operation context, if any
    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    /// Get the entity context, if any
    pub fn entity(&self) -> Option<&str> {
        self.entity.as_deref()
    }

    /// Get the object id context, if any
    pub fn object_id(&self) -> Option<&str> {
        self.object_id.as_deref()
    }

    /// Get the commit id, if any
    pub fn commit_id(&self) -> Option<&CommitId> {
        self.commit_id.as_ref()
    }

    /// Get the context id, if any
    pub fn context_id(&self) -> Option<&ContextId> {
        self.context_id.as_ref()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the source error, if any
    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(entity) = &self.entity {
            write!(f, " (entity: {})", entity)?;
        }
        if let Some(object_id) = &self.object_id {
            write!(f, " (object_id: {})", object_id)?;
        }
        if let Some(source) = &self.source {
            write!(f, " caused by {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn std::error::Error + 'static))
    }
}

// ========== End Error Facility ==========

/// Domain error taxonomy for the change-tracking core
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommitLogError {
    // ===== Metadata =====
    /// Entity is not declared in the resolver
    #[error("Unknown entity: {entity}")]
    UnknownEntity { entity: String },

    /// Attribute is not declared on the entity
    #[error("Unknown attribute {attribute} on entity {entity}")]
    UnknownAttribute { entity: String, attribute: String },

    /// Relationship is not declared on the entity
    #[error("Unknown relationship {relationship} on entity {entity}")]
    UnknownRelationship {
        entity: String,
        relationship: String,
    },

    /// Entity metadata is inconsistent
    #[error("Invalid metadata for entity {entity}: {reason}")]
    InvalidMetadata { entity: String, reason: String },

    // ===== Object graph =====
    /// Object is not registered and could not be found
    #[error("Object not found: {object_id}")]
    ObjectNotFound { object_id: String },

    /// Object was deleted in this context
    #[error("Object was deleted: {object_id}")]
    ObjectDeleted { object_id: String },

    /// ObjectId cannot be used for this operation
    #[error("Invalid object id {object_id}: {reason}")]
    InvalidObjectId { object_id: String, reason: String },

    /// Relationship operation does not fit the relationship's shape
    #[error("Invalid operation on relationship {relationship} of {entity}: {reason}")]
    InvalidRelationshipOperation {
        entity: String,
        relationship: String,
        reason: String,
    },

    /// Value of wrong entity type assigned to a relationship
    #[error("Relationship {relationship} expects {expected}, got {actual}")]
    TargetEntityMismatch {
        relationship: String,
        expected: String,
        actual: String,
    },

    /// Delete rule `Deny` blocked a delete
    #[error("Delete of {object_id} denied: relationship {relationship} is not empty")]
    DeleteDenied {
        object_id: String,
        relationship: String,
    },

    // ===== Change filter =====
    /// An ignore-list names a property the entity does not declare
    #[error("Commit log filter for {entity} references undeclared {kind} {name}")]
    FilterMisconfigured {
        entity: String,
        kind: String,
        name: String,
    },

    // ===== Serialization =====
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl From<CommitLogError> for ExError {
    fn from(err: CommitLogError) -> Self {
        match err {
            CommitLogError::UnknownEntity { entity } => ExError::new(ExErrorKind::UnknownEntity)
                .with_entity(entity)
                .with_message("Entity is not declared"),
            CommitLogError::UnknownAttribute { entity, attribute } => {
                ExError::new(ExErrorKind::UnknownProperty)
                    .with_entity(entity)
                    .with_message(format!("Unknown attribute {}", attribute))
            }
            CommitLogError::UnknownRelationship {
                entity,
                relationship,
            } => ExError::new(ExErrorKind::UnknownProperty)
                .with_entity(entity)
                .with_message(format!("Unknown relationship {}", relationship)),
            CommitLogError::InvalidMetadata { entity, reason } => {
                ExError::new(ExErrorKind::InvalidMetadata)
                    .with_entity(entity)
                    .with_message(reason)
            }
            CommitLogError::ObjectNotFound { object_id } => ExError::new(ExErrorKind::NotFound)
                .with_object_id(object_id)
                .with_message("Object not found"),
            CommitLogError::ObjectDeleted { object_id } => ExError::new(ExErrorKind::Deleted)
                .with_object_id(object_id)
                .with_message("Object was deleted"),
            CommitLogError::InvalidObjectId { object_id, reason } => {
                ExError::new(ExErrorKind::InvalidObjectId)
                    .with_object_id(object_id)
                    .with_message(reason)
            }
            CommitLogError::InvalidRelationshipOperation {
                entity,
                relationship,
                reason,
            } => ExError::new(ExErrorKind::InvalidRelationship)
                .with_entity(entity)
                .with_message(format!("{}: {}", relationship, reason)),
            CommitLogError::TargetEntityMismatch {
                relationship,
                expected,
                actual,
            } => ExError::new(ExErrorKind::InvalidRelationship).with_message(format!(
                "{} expects {}, got {}",
                relationship, expected, actual
            )),
            CommitLogError::DeleteDenied {
                object_id,
                relationship,
            } => ExError::new(ExErrorKind::DeleteDenied)
                .with_object_id(object_id)
                .with_message(format!("Relationship {} is not empty", relationship)),
            CommitLogError::FilterMisconfigured { entity, kind, name } => {
                ExError::new(ExErrorKind::FilterMisconfigured)
                    .with_entity(entity)
                    .with_message(format!("Undeclared {} {}", kind, name))
            }
            CommitLogError::Serialization { message } => {
                ExError::new(ExErrorKind::Serialization).with_message(message)
            }
        }
    }
}

impl From<serde_json::Error> for CommitLogError {
    fn from(err: serde_json::Error) -> Self {
        CommitLogError::Serialization {
            message: err.to_string(),
        }
    }
}
