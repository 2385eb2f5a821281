//! # Error Taxonomy
//!
//! Errors are split by how far they travel:
//!
//! - **Per-request errors** (`CallError`) never leave the request that produced
//!   them. They are converted into an [`ErrorKind`](crate::bucket::ErrorKind) on
//!   the request's outcome and counted.
//! - **Dispatch errors** (`DispatchError`) mean a request could not be issued at
//!   all. They abort the run and are reported once, with no partial results.
//! - **Configuration errors** (`ConfigError`) are raised while building a
//!   configuration, before any run starts.

use crate::bucket::ErrorKind;
use std::time::Duration;
use thiserror::Error;

/// Invalid or missing run parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{name} must be at least 1 (got {value})")]
    ZeroCount { name: &'static str, value: usize },

    #[error("request timeout must be greater than zero")]
    ZeroTimeout,

    #[error("{name} must be greater than zero (got {value:?})")]
    ZeroInterval { name: &'static str, value: Duration },

    #[error("request volume overflows usize")]
    VolumeOverflow,

    #[error("endpoint name must not be empty")]
    EmptyEndpoint,

    #[error("channel pool must contain at least one channel")]
    EmptyPool,

    #[error("time window needs at least one value")]
    EmptyTimeWindow,

    #[error("missing required parameter: {0}")]
    Missing(&'static str),

    #[error("failed to create latency histogram: {0}")]
    Histogram(String),
}

/// Failure to issue a request. Fatal to the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("channel '{0}' is closed")]
    ChannelClosed(String),

    #[error("channel '{channel}' refused dispatch: {reason}")]
    Refused { channel: String, reason: String },
}

/// Transport-level failure of a single request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("request timed out")]
    Timeout,

    #[error("request declined: {0}")]
    Declined(String),

    #[error("server busy")]
    Busy,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl CallError {
    /// The bucket-level classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::Timeout => ErrorKind::Timeout,
            CallError::Declined(_) => ErrorKind::Declined,
            CallError::Busy => ErrorKind::Busy,
            CallError::Connection(_) => ErrorKind::Connection,
            CallError::Protocol(_) => ErrorKind::Protocol,
            CallError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }
}

/// Terminal failure of a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid run configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("run ended after {received} of {expected} responses")]
    Incomplete { received: usize, expected: usize },

    #[error("request task failed: {0}")]
    RequestTask(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_error_kinds() {
        assert_eq!(CallError::Timeout.kind(), ErrorKind::Timeout);
        assert_eq!(CallError::Declined("x".into()).kind(), ErrorKind::Declined);
        assert_eq!(CallError::Busy.kind(), ErrorKind::Busy);
        assert_eq!(
            CallError::Connection("reset".into()).kind(),
            ErrorKind::Connection
        );
        assert_eq!(CallError::Protocol("bad".into()).kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_run_error_from_dispatch() {
        let err: RunError = DispatchError::ChannelClosed("tcp-0".into()).into();
        assert!(matches!(err, RunError::Dispatch(_)));
        assert_eq!(err.to_string(), "dispatch failed: channel 'tcp-0' is closed");
    }
}
