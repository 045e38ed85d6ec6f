//! Canonical logging macros
//!
//! Every macro stamps `component`, `op` and `event` so captured events can be
//! matched without parsing messages.

/// Log the start of an operation
///
/// ```
/// # use commitlog_core::log_op_start;
/// log_op_start!("commit_changes");
/// log_op_start!("commit_changes", commit_id = "c-1");
/// ```
#[macro_export]
macro_rules! log_op_start {
    ($op:expr) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::types::schema::EVENT_START,
        );
    };
    ($op:expr, $($field:tt)*) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::types::schema::EVENT_START,
            $($field)*
        );
    };
}

/// Log the successful end of an operation
///
/// ```
/// # use commitlog_core::log_op_end;
/// log_op_end!("commit_changes", duration_ms = 3);
/// ```
#[macro_export]
macro_rules! log_op_end {
    ($op:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::types::schema::EVENT_END,
            duration_ms = $duration,
        );
    };
    ($op:expr, duration_ms = $duration:expr, $($field:tt)*) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::types::schema::EVENT_END,
            duration_ms = $duration,
            $($field)*
        );
    };
}

/// Log an operation error
///
/// Accepts anything convertible into `ExError`.
///
/// ```
/// # use commitlog_core::log_op_error;
/// # use commitlog_core::errors::CommitLogError;
/// let err = CommitLogError::UnknownEntity { entity: "Nope".to_string() };
/// log_op_error!("select_by_id", err, duration_ms = 1);
/// ```
#[macro_export]
macro_rules! log_op_error {
    ($op:expr, $err:expr, duration_ms = $duration:expr) => {{
        let ex_err: $crate::errors::ExError = $err.into();
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = $crate::types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err_kind = ?ex_err.kind(),
            err_code = ex_err.code(),
        );
    }};
    ($op:expr, $err:expr, duration_ms = $duration:expr, $($field:tt)*) => {{
        let ex_err: $crate::errors::ExError = $err.into();
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = $crate::types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err_kind = ?ex_err.kind(),
            err_code = ex_err.code(),
            $($field)*
        );
    }};
}

/// Log a commit phase transition at debug level
///
/// ```
/// # use commitlog_core::log_phase;
/// log_phase!("commit_changes", "flushing", commit_id = "c-1");
/// ```
#[macro_export]
macro_rules! log_phase {
    ($op:expr, $phase:expr) => {
        tracing::debug!(
            component = module_path!(),
            op = $op,
            event = $crate::types::schema::EVENT_PHASE,
            phase = $phase,
        );
    };
    ($op:expr, $phase:expr, $($field:tt)*) => {
        tracing::debug!(
            component = module_path!(),
            op = $op,
            event = $crate::types::schema::EVENT_PHASE,
            phase = $phase,
            $($field)*
        );
    };
}
