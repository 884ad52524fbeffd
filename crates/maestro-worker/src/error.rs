// Copyright (C) 2026 Maestro Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker-specific error types.

use maestro_protocol::{ClientError, FrameError};
use thiserror::Error;

use crate::convert::ConvertError;

/// Errors that can occur in the worker runtime.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Configuration error (missing or invalid environment variable)
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection to the backend failed
    #[error("connection error: {0}")]
    Connection(#[from] ClientError),

    /// Frame-level protocol error
    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),

    /// Event conversion between wire and internal forms failed
    #[error("conversion error: {0}")]
    Convert(#[from] ConvertError),

    /// History is malformed and no structured completion can be built
    #[error("malformed history for instance {instance_id}: {reason}")]
    MalformedHistory {
        instance_id: String,
        reason: String,
    },

    /// Server returned an error response
    #[error("server error: {code} - {message}")]
    Server { code: String, message: String },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Unexpected response from the backend
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Internal worker error
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<prost::DecodeError> for WorkerError {
    fn from(err: prost::DecodeError) -> Self {
        WorkerError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(err: serde_json::Error) -> Self {
        WorkerError::Serialization(err.to_string())
    }
}

/// Type alias for worker results.
pub type Result<T> = std::result::Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = WorkerError::MalformedHistory {
            instance_id: "inst-1".to_string(),
            reason: "no ExecutionStarted event".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "malformed history for instance inst-1: no ExecutionStarted event"
        );

        let err = WorkerError::from(FrameError::ConnectionClosed);
        assert!(matches!(err, WorkerError::Protocol(_)));
    }
}
