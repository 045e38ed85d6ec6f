//! Canonical schema constants for structured logging and events
//!
//! These constants ensure consistency across all logging and error reporting.

// Canonical field keys for structured logging
pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";
pub const FIELD_COMMIT_ID: &str = "commit_id";
pub const FIELD_CONTEXT_ID: &str = "context_id";

// Commit phases and sizes
pub const FIELD_PHASE: &str = "phase";
pub const FIELD_CHANGES: &str = "changes";
pub const FIELD_UNIQUE_CHANGES: &str = "unique_changes";
pub const FIELD_LISTENERS: &str = "listeners";

// Error fields
pub const FIELD_ERR_KIND: &str = "err_kind";
pub const FIELD_ERR_CODE: &str = "err_code";

// Canonical event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";
pub const EVENT_PHASE: &str = "phase";
