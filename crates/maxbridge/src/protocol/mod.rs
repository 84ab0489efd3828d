//! Wire protocol shared with the listener.
//!
//! Each direction carries exactly one JSON object terminated by a single `\n`
//! byte. The listener reads until the newline, so message boundaries depend on
//! the serialised object never containing a raw newline. `serde_json` escapes
//! control characters inside strings and writes compact output, and
//! [`encode_request`] checks the result before anything is sent.

use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandKind};
use crate::error::{BridgeError, MalformedReason};

/// Frame delimiter in both directions.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Request written to the listener.
#[derive(Debug, Serialize)]
pub struct RequestEnvelope<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    command: &'a str,
    #[serde(rename = "type")]
    kind: CommandKind,
}

impl<'a> RequestEnvelope<'a> {
    /// Borrows the fields of a command.
    #[must_use]
    pub fn from_command(command: &'a Command) -> Self {
        Self {
            id: command.correlation_id(),
            command: command.script(),
            kind: command.kind(),
        }
    }
}

/// Response read from the listener.
///
/// `success` discriminates which of `result` and `error` is meaningful.
/// Unknown fields are ignored so listeners can add diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResponseEnvelope {
    success: bool,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

/// Message used when a failed response omits its error text.
const UNKNOWN_ERROR: &str = "unknown error";

impl ResponseEnvelope {
    /// Whether the listener reported success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.success
    }

    /// Correlation token echoed by the listener, if any.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Collapses the envelope into the call outcome.
    ///
    /// A successful response without a result yields an empty string. A failed
    /// response without an error message yields `"unknown error"`.
    pub fn into_outcome(self) -> Result<String, BridgeError> {
        if self.success {
            Ok(self.result.unwrap_or_default())
        } else {
            Err(BridgeError::Execution {
                message: self.error.unwrap_or_else(|| UNKNOWN_ERROR.to_owned()),
            })
        }
    }
}

/// Serialises a command into one newline-terminated frame.
///
/// Only an empty script is refused; whitespace is passed through for the
/// listener to evaluate.
pub fn encode_request(command: &Command) -> Result<Vec<u8>, BridgeError> {
    if command.script().is_empty() {
        return Err(BridgeError::EmptyCommand);
    }
    let mut frame = serde_json::to_vec(&RequestEnvelope::from_command(command))
        .map_err(BridgeError::SerialiseRequest)?;
    validate_frame_body(&frame)?;
    frame.push(FRAME_DELIMITER);
    Ok(frame)
}

/// Rejects a frame body that contains the delimiter.
pub fn validate_frame_body(body: &[u8]) -> Result<(), BridgeError> {
    match body.iter().position(|byte| *byte == FRAME_DELIMITER) {
        Some(offset) => Err(BridgeError::Framing { offset }),
        None => Ok(()),
    }
}

/// Parses one response line, without its delimiter.
///
/// A trailing carriage return is tolerated for listeners that write CRLF.
pub fn decode_response(line: &[u8]) -> Result<ResponseEnvelope, MalformedReason> {
    let text = std::str::from_utf8(line).map_err(|_| MalformedReason::NotUtf8)?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(MalformedReason::EmptyLine);
    }
    serde_json::from_str(trimmed).map_err(MalformedReason::InvalidEnvelope)
}

/// Checks that the response belongs to the request that was sent.
///
/// Listeners that do not echo the token are accepted; one connection carries
/// one exchange, so pairing already holds.
pub fn check_correlation(
    command: &Command,
    response: &ResponseEnvelope,
) -> Result<(), MalformedReason> {
    match (command.correlation_id(), response.id()) {
        (Some(expected), Some(actual)) if expected != actual => {
            Err(MalformedReason::CorrelationMismatch {
                expected: expected.to_owned(),
                actual: actual.to_owned(),
            })
        }
        _ => Ok(()),
    }
}
