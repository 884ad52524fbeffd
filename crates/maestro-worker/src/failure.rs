// Copyright (C) 2026 Maestro Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Structured failure construction.
//!
//! Completions carry a `TaskFailureDetails` with a recursive cause chain
//! instead of a flat string, so callers on the orchestrator side can
//! pattern-match on `error_type`.

use std::any::Any;
use std::error::Error;

use maestro_protocol::worker_proto::TaskFailureDetails;

/// Error type recorded when a registry lookup fails for an orchestration.
pub const ERROR_TYPE_ORCHESTRATOR_NOT_FOUND: &str = "OrchestratorTaskNotFound";

/// Error type recorded when a registry lookup fails for an activity.
pub const ERROR_TYPE_ACTIVITY_NOT_FOUND: &str = "ActivityTaskNotFound";

/// Error type recorded when a registry lookup fails for an entity.
pub const ERROR_TYPE_ENTITY_NOT_FOUND: &str = "EntityTaskNotFound";

/// Error type recorded when the version match policy rejects a work item
/// with the Fail strategy.
pub const ERROR_TYPE_VERSION_MISMATCH: &str = "VersionMismatch";

/// Error type recorded when user code panics.
pub const ERROR_TYPE_PANIC: &str = "Panic";

/// Build failure details from an error, walking `source()` into the
/// recursive cause chain.
pub fn from_error(error_type: impl Into<String>, err: &(dyn Error + 'static)) -> TaskFailureDetails {
    TaskFailureDetails {
        error_type: error_type.into(),
        error_message: err.to_string(),
        stack_trace: None,
        // Concrete types are erased behind the trait object, so causes
        // keep a generic marker type.
        inner_failure: err
            .source()
            .map(|cause| Box::new(from_error("Error", cause))),
        is_non_retriable: false,
    }
}

/// Build failure details from a panic payload as returned by
/// `catch_unwind` or `JoinError::into_panic`.
pub fn from_panic(payload: &(dyn Any + Send)) -> TaskFailureDetails {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    };

    TaskFailureDetails {
        error_type: ERROR_TYPE_PANIC.to_string(),
        error_message: message,
        stack_trace: None,
        inner_failure: None,
        is_non_retriable: false,
    }
}

/// Build a simple failure with an explicit type and message.
pub fn simple(
    error_type: impl Into<String>,
    message: impl Into<String>,
    is_non_retriable: bool,
) -> TaskFailureDetails {
    TaskFailureDetails {
        error_type: error_type.into(),
        error_message: message.into(),
        stack_trace: None,
        inner_failure: None,
        is_non_retriable,
    }
}
