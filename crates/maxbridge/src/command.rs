//! Command modelling for bridge requests.
//!
//! A [`Command`] is the opaque instruction a domain function wants executed
//! inside the host application. The bridge never inspects the script text; it
//! only frames, transports, and times it out.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Interpreter the listener should hand the script to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// MAXScript, evaluated with the listener's `execute()`.
    #[default]
    MaxScript,
    /// Python, for listeners that host the embedded interpreter.
    Python,
}

/// One instruction destined for the listener.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use maxbridge::Command;
///
/// let command = Command::new("for o in selection collect o.name")
///     .with_timeout(Duration::from_secs(30));
/// assert_eq!(command.timeout(), Some(Duration::from_secs(30)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    script: String,
    kind: CommandKind,
    timeout: Option<Duration>,
    correlation_id: Option<String>,
}

impl Command {
    /// Creates a MAXScript command with the client's default timeout.
    #[must_use]
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            kind: CommandKind::default(),
            timeout: None,
            correlation_id: None,
        }
    }

    /// Selects the interpreter for the script.
    #[must_use]
    pub fn with_kind(mut self, kind: CommandKind) -> Self {
        self.kind = kind;
        self
    }

    /// Overrides the client's default timeout for this call.
    ///
    /// A zero duration counts as "not set" and the default applies.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout).filter(|value| !value.is_zero());
        self
    }

    /// Attaches a correlation token echoed back by listeners that support it.
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Script text.
    #[must_use]
    pub fn script(&self) -> &str {
        self.script.as_str()
    }

    /// Interpreter selection.
    #[must_use]
    pub const fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Per-call timeout, if one was requested.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Correlation token, if one was attached.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Timeout for this call given the client's default.
    pub(crate) fn effective_timeout(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default)
    }
}
