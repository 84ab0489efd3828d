//! Failures surfaced by the command bridge.
//!
//! Every variant of [`BridgeError`] belongs to exactly one [`ErrorKind`]. The
//! kinds are what callers branch on; the variants carry the context needed to
//! diagnose a failure. I/O errors are wrapped in `Arc` to keep the enum small
//! and `Send + Sync`.
//!
//! The bridge never retries. Whether re-issuing a command is safe depends on
//! what the command does, which only the domain layer knows;
//! [`BridgeError::may_have_executed`] reports the half of that decision the
//! bridge can answer.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Coarse classification of bridge failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The listener could not be reached.
    ConnectionRefused,
    /// No complete response arrived before the deadline.
    Timeout,
    /// The listener's reply did not follow the protocol.
    MalformedResponse,
    /// The listener ran the command and reported a failure.
    ExecutionError,
    /// The request was rejected locally before anything was sent.
    ProtocolFraming,
}

/// Errors returned by [`crate::BridgeClient`].
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The command carried no script text.
    #[error("refusing to send an empty command")]
    EmptyCommand,

    /// The encoded request would contain the frame delimiter.
    #[error("request frame contains a raw newline at byte {offset}; refusing to send")]
    Framing {
        /// Byte offset of the first offending delimiter.
        offset: usize,
    },

    /// The request envelope could not be serialised.
    #[error("failed to serialise request envelope: {0}")]
    SerialiseRequest(#[source] serde_json::Error),

    /// The listener host name did not resolve.
    #[error("failed to resolve listener address {endpoint}: {source}")]
    Resolve {
        /// Endpoint that was being resolved.
        endpoint: String,
        /// Underlying resolver error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Nothing accepted the connection.
    #[error(
        "could not connect to the listener at {endpoint}: {source}; \
         is the listener running inside the host application?"
    )]
    ConnectionRefused {
        /// Endpoint that refused the connection.
        endpoint: String,
        /// Underlying socket error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The connection broke while the request was being written.
    #[error("connection to the listener at {endpoint} dropped while sending: {source}")]
    SendRequest {
        /// Endpoint the request was addressed to.
        endpoint: String,
        /// Underlying socket error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The deadline passed before a full response line arrived.
    #[error(
        "the listener at {endpoint} did not respond within {}s; \
         raise the per-call timeout for long-running commands",
        .timeout.as_secs_f64()
    )]
    Timeout {
        /// Endpoint that failed to answer.
        endpoint: String,
        /// Deadline that applied to the call.
        timeout: Duration,
        /// Whether writing the request had begun when the deadline passed.
        request_sent: bool,
    },

    /// The listener replied with something other than a response envelope.
    #[error("malformed response from the listener at {endpoint}: {reason}")]
    MalformedResponse {
        /// Endpoint that produced the response.
        endpoint: String,
        /// What was wrong with it.
        #[source]
        reason: MalformedReason,
    },

    /// The listener succeeded but its result was not the JSON the caller
    /// asked for.
    #[error("failed to decode command result as JSON: {0}")]
    DecodeResult(#[source] serde_json::Error),

    /// The listener reported that the command failed.
    #[error("command failed in the host application: {message}")]
    Execution {
        /// Message reported by the listener, unmodified.
        message: String,
    },
}

impl BridgeError {
    /// Classifies the failure.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyCommand | Self::Framing { .. } | Self::SerialiseRequest(_) => {
                ErrorKind::ProtocolFraming
            }
            Self::Resolve { .. } | Self::ConnectionRefused { .. } | Self::SendRequest { .. } => {
                ErrorKind::ConnectionRefused
            }
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::MalformedResponse { .. } | Self::DecodeResult(_) => ErrorKind::MalformedResponse,
            Self::Execution { .. } => ErrorKind::ExecutionError,
        }
    }

    /// Returns `false` only when the failure happened before any request byte
    /// left this process, so the host cannot have run the command.
    #[must_use]
    pub const fn may_have_executed(&self) -> bool {
        !matches!(
            self,
            Self::EmptyCommand
                | Self::Framing { .. }
                | Self::SerialiseRequest(_)
                | Self::Resolve { .. }
                | Self::ConnectionRefused { .. }
                | Self::Timeout {
                    request_sent: false,
                    ..
                }
        )
    }

    /// The listener's message for [`ErrorKind::ExecutionError`] failures.
    #[must_use]
    pub fn execution_message(&self) -> Option<&str> {
        match self {
            Self::Execution { message } => Some(message.as_str()),
            _ => None,
        }
    }
}

/// Ways a response can violate the protocol.
#[derive(Debug, Error)]
pub enum MalformedReason {
    /// The listener wrote an empty line.
    #[error("the response line was empty")]
    EmptyLine,

    /// The connection ended before a newline arrived.
    #[error("the connection closed after {received} byte(s) without a complete line")]
    ClosedBeforeDelimiter {
        /// Bytes received before the close.
        received: usize,
    },

    /// The connection failed while the response was being read.
    #[error("the connection failed while reading the response: {0}")]
    ReadFailed(#[source] Arc<io::Error>),

    /// The response exceeded the configured size limit.
    #[error("the response exceeded the {limit}-byte limit")]
    TooLarge {
        /// Configured limit in bytes.
        limit: usize,
    },

    /// The response line was not UTF-8.
    #[error("the response line is not valid UTF-8")]
    NotUtf8,

    /// The response line was not a valid envelope.
    #[error("the response is not a valid envelope: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),

    /// The listener echoed a different correlation token.
    #[error("expected correlation id '{expected}' but the listener answered '{actual}'")]
    CorrelationMismatch {
        /// Token sent with the request.
        expected: String,
        /// Token echoed in the response.
        actual: String,
    },
}
