//! Error types for the stress harness.
//!
//! Expected operation failures (transport, contention, terminal service
//! errors) are never errors here: they travel inside
//! [`OperationOutcome`](crate::client::OperationOutcome). This module only
//! covers configuration mistakes, connection setup, and worker faults.

use std::fmt;

use thiserror::Error;

use crate::workload::WorkloadResult;

/// Result alias used throughout the library.
pub type Result<T, E = StressError> = std::result::Result<T, E>;

/// Errors surfaced by the library to its caller.
#[derive(Debug, Error)]
pub enum StressError {
    /// Rejected configuration (e.g. `max_retries == 0`).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A worker could not open its connection.
    #[error("failed to connect to {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    /// A worker returned an error instead of a result. `partial` merges the
    /// workers that did finish.
    #[error("worker {worker} failed: {source}")]
    WorkerFailed {
        worker: usize,
        #[source]
        source: Box<StressError>,
        partial: Box<WorkloadResult>,
    },

    /// A worker task panicked or was aborted.
    #[error("worker {worker} panicked: {message}")]
    WorkerPanicked {
        worker: usize,
        message: String,
        partial: Box<WorkloadResult>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StressError {
    /// Results of the workers that completed, for worker faults.
    pub fn partial_result(&self) -> Option<&WorkloadResult> {
        match self {
            StressError::WorkerFailed { partial, .. } | StressError::WorkerPanicked { partial, .. } => {
                Some(&**partial)
            }
            _ => None,
        }
    }
}

/// Category of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Service unreachable or connection dropped.
    Unavailable,
    /// Deadline exceeded at the transport layer.
    Timeout,
    /// Call cancelled before completion.
    Cancelled,
    Other,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportKind::Unavailable => "unavailable",
            TransportKind::Timeout => "timeout",
            TransportKind::Cancelled => "cancelled",
            TransportKind::Other => "transport",
        };
        f.write_str(s)
    }
}

/// Network/connection-level failure returned by a [`KvStub`](crate::stub::KvStub).
///
/// Never retried by the resilient client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_display_names_kind() {
        let err = TransportError::new(TransportKind::Timeout, "deadline exceeded after 10s");
        assert_eq!(err.to_string(), "timeout error: deadline exceeded after 10s");
    }

    #[test]
    fn worker_failure_wraps_source() {
        let err = StressError::WorkerFailed {
            worker: 3,
            source: Box::new(StressError::Connect {
                endpoint: "http://localhost:5050".to_string(),
                message: "connection refused".to_string(),
            }),
            partial: Box::new(WorkloadResult {
                success_count: 4,
                ..WorkloadResult::default()
            }),
        };
        let text = err.to_string();
        assert!(text.starts_with("worker 3 failed"));
        assert!(text.contains("connection refused"));
        assert_eq!(err.partial_result().map(|r| r.success_count), Some(4));
        assert!(StressError::InvalidConfig("x".into()).partial_result().is_none());
    }
}
