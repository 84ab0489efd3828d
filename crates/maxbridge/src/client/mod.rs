//! The controller side of the bridge.
//!
//! [`BridgeClient::send`] runs one exchange per call:
//!
//! ```text
//! Idle -> Connecting -> Sent -> AwaitingResponse -> Complete
//!              |          |            |
//!              +----------+------------+--> Failed | TimedOut
//! ```
//!
//! Each call opens its own connection, so a client can be cloned or shared
//! between threads freely. Nothing is retried and nothing is sent to the
//! listener when a deadline passes; the local read is abandoned and the
//! connection closed, leaving any dispatched work to the listener.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use maxbridge_config::{
    Config, DEFAULT_CONNECT_TIMEOUT_MILLIS, DEFAULT_MAX_RESPONSE_BYTES, DEFAULT_TIMEOUT_SECS,
    ListenerEndpoint,
};

use crate::command::Command;
use crate::error::{BridgeError, MalformedReason};
use crate::protocol::{check_correlation, decode_response, encode_request};
use crate::transport::{
    ConnectFailure, Connection, ReadFailure, WriteFailure, remaining_until,
};

const CLIENT_TARGET: &str = "maxbridge::client";

/// Longest deadline a single call may carry.
const MAX_CALL_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Progress of a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Nothing has happened yet.
    Idle,
    /// Establishing the connection.
    Connecting,
    /// The request frame has been written.
    Sent,
    /// Blocked on the response line.
    AwaitingResponse,
    /// The listener reported success.
    Complete,
    /// The deadline passed.
    TimedOut,
    /// Any other failure, including one the listener reported.
    Failed,
}

impl CallState {
    /// Whether the call has finished.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::TimedOut | Self::Failed)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Sent => "sent",
            Self::AwaitingResponse => "awaiting_response",
            Self::Complete => "complete",
            Self::TimedOut => "timed_out",
            Self::Failed => "failed",
        };
        formatter.write_str(label)
    }
}

/// Sends commands to the listener embedded in the host application.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use maxbridge::{BridgeClient, Command, ErrorKind};
/// use maxbridge_config::Config;
///
/// let client = BridgeClient::from_config(&Config::default());
/// match client.send(&Command::new("objects.count")) {
///     Ok(count) => println!("{count} objects"),
///     Err(error) if error.kind() == ErrorKind::Timeout => {
///         let slow = Command::new("objects.count").with_timeout(Duration::from_secs(300));
///         let _ = client.send(&slow);
///     }
///     Err(error) => eprintln!("{error}"),
/// }
/// ```
#[derive(Debug, Clone)]
pub struct BridgeClient {
    endpoint: Arc<ListenerEndpoint>,
    default_timeout: Duration,
    connect_timeout: Duration,
    max_response_bytes: usize,
}

impl BridgeClient {
    /// Creates a client for `endpoint` with the built-in limits.
    #[must_use]
    pub fn new(endpoint: ListenerEndpoint) -> Self {
        warn_if_not_loopback(&endpoint);
        Self {
            endpoint: Arc::new(endpoint),
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MILLIS),
            max_response_bytes: usize::try_from(DEFAULT_MAX_RESPONSE_BYTES)
                .unwrap_or(usize::MAX),
        }
    }

    /// Creates a client from loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.listener_endpoint())
            .with_default_timeout(config.default_timeout())
            .with_connect_timeout(config.connect_timeout())
            .with_max_response_bytes(config.max_response_bytes())
    }

    /// Sets the timeout used by commands without their own. Zero is ignored.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.default_timeout = timeout;
        }
        self
    }

    /// Caps how long establishing a connection may take. Zero is ignored.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.connect_timeout = timeout;
        }
        self
    }

    /// Sets the largest response line the client accepts.
    #[must_use]
    pub fn with_max_response_bytes(mut self, limit: usize) -> Self {
        self.max_response_bytes = limit.max(1);
        self
    }

    /// Listener endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &ListenerEndpoint {
        &self.endpoint
    }

    /// Timeout applied to commands without their own.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Executes `command` and returns the listener's result string.
    pub fn send(&self, command: &Command) -> Result<String, BridgeError> {
        Exchange::new(self, command).run()
    }

    /// Executes a MAXScript snippet with the default timeout.
    pub fn send_script(&self, script: impl Into<String>) -> Result<String, BridgeError> {
        self.send(&Command::new(script))
    }

    /// Executes `command` and decodes its result string as JSON.
    pub fn send_json<T>(&self, command: &Command) -> Result<T, BridgeError>
    where
        T: DeserializeOwned,
    {
        let result = self.send(command)?;
        serde_json::from_str(&result).map_err(BridgeError::DecodeResult)
    }
}

fn warn_if_not_loopback(endpoint: &ListenerEndpoint) {
    if !endpoint.is_loopback() {
        warn!(
            target: CLIENT_TARGET,
            %endpoint,
            "listener endpoint is not a loopback address; the bridge has no authentication"
        );
    }
}

/// State of one in-flight call.
struct Exchange<'a> {
    client: &'a BridgeClient,
    command: &'a Command,
    timeout: Duration,
    started: Instant,
    deadline: Instant,
    state: CallState,
}

impl<'a> Exchange<'a> {
    fn new(client: &'a BridgeClient, command: &'a Command) -> Self {
        let timeout = command
            .effective_timeout(client.default_timeout)
            .min(MAX_CALL_TIMEOUT);
        let started = Instant::now();
        Self {
            client,
            command,
            timeout,
            started,
            deadline: started + timeout,
            state: CallState::Idle,
        }
    }

    fn run(mut self) -> Result<String, BridgeError> {
        let outcome = self.exchange();
        if let Err(error) = &outcome {
            debug!(
                target: CLIENT_TARGET,
                endpoint = %self.client.endpoint,
                error = %error,
                "call failed"
            );
        }
        self.advance(terminal_state(&outcome));
        outcome
    }

    fn exchange(&mut self) -> Result<String, BridgeError> {
        let frame = encode_request(self.command)?;

        self.advance(CallState::Connecting);
        let mut connection = self.connect()?;

        connection
            .write_frame(&frame, self.deadline)
            .map_err(|failure| self.write_error(failure))?;
        debug!(
            target: CLIENT_TARGET,
            endpoint = %self.client.endpoint,
            request_bytes = frame.len(),
            "request sent"
        );
        self.advance(CallState::Sent);

        self.advance(CallState::AwaitingResponse);
        let line = connection
            .read_frame(self.deadline, self.client.max_response_bytes)
            .map_err(|failure| self.read_error(failure))?;
        drop(connection);

        let response = decode_response(&line).map_err(|reason| self.malformed(reason))?;
        check_correlation(self.command, &response).map_err(|reason| self.malformed(reason))?;
        response.into_outcome()
    }

    fn connect(&self) -> Result<Connection, BridgeError> {
        let connect_timeout = remaining_until(self.deadline)
            .map(|remaining| remaining.min(self.client.connect_timeout))
            .ok_or_else(|| self.timed_out(false))?;
        Connection::open(&self.client.endpoint, connect_timeout).map_err(|failure| match failure {
            ConnectFailure::Resolve(source) => BridgeError::Resolve {
                endpoint: self.client.endpoint.to_string(),
                source: Arc::new(source),
            },
            ConnectFailure::Connect(source) => BridgeError::ConnectionRefused {
                endpoint: self.client.endpoint.to_string(),
                source: Arc::new(source),
            },
        })
    }

    fn write_error(&self, failure: WriteFailure) -> BridgeError {
        match failure {
            WriteFailure::DeadlineBeforeWrite => self.timed_out(false),
            WriteFailure::DeadlineElapsed => self.timed_out(true),
            WriteFailure::Io(source) => BridgeError::SendRequest {
                endpoint: self.client.endpoint.to_string(),
                source: Arc::new(source),
            },
        }
    }

    fn read_error(&self, failure: ReadFailure) -> BridgeError {
        match failure {
            ReadFailure::DeadlineElapsed => self.timed_out(true),
            ReadFailure::Closed { received } => {
                self.malformed(MalformedReason::ClosedBeforeDelimiter { received })
            }
            ReadFailure::TooLarge { limit } => self.malformed(MalformedReason::TooLarge { limit }),
            ReadFailure::Io(source) => self.malformed(MalformedReason::ReadFailed(Arc::new(source))),
        }
    }

    fn timed_out(&self, request_sent: bool) -> BridgeError {
        BridgeError::Timeout {
            endpoint: self.client.endpoint.to_string(),
            timeout: self.timeout,
            request_sent,
        }
    }

    fn malformed(&self, reason: MalformedReason) -> BridgeError {
        BridgeError::MalformedResponse {
            endpoint: self.client.endpoint.to_string(),
            reason,
        }
    }

    fn advance(&mut self, next: CallState) {
        debug_assert!(!self.state.is_terminal(), "call already finished");
        debug!(
            target: CLIENT_TARGET,
            endpoint = %self.client.endpoint,
            from = %self.state,
            to = %next,
            elapsed_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "call state changed"
        );
        self.state = next;
    }
}

/// Final state for a call outcome. A listener-reported failure is a failed
/// call even though the exchange itself completed.
fn terminal_state(outcome: &Result<String, BridgeError>) -> CallState {
    match outcome {
        Ok(_) => CallState::Complete,
        Err(BridgeError::Timeout { .. }) => CallState::TimedOut,
        Err(_) => CallState::Failed,
    }
}
