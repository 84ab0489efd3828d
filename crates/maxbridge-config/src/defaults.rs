use crate::endpoint::ListenerEndpoint;
use crate::logging::LogFormat;

/// Loopback address the listener binds inside the host application.
pub const DEFAULT_LISTENER_HOST: &str = "127.0.0.1";

/// Well-known TCP port of the listener.
pub const DEFAULT_LISTENER_PORT: u16 = 8765;

/// Baseline per-call timeout, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Upper bound on establishing a connection, in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MILLIS: u64 = 5_000;

/// Largest response line the client will buffer.
pub const DEFAULT_MAX_RESPONSE_BYTES: u64 = 16 * 1024 * 1024;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Owned listener host used where allocation is required.
#[must_use]
pub fn default_listener_host() -> String {
    DEFAULT_LISTENER_HOST.to_owned()
}

/// Endpoint the client connects to when nothing overrides it.
#[must_use]
pub fn default_listener_endpoint() -> ListenerEndpoint {
    ListenerEndpoint::new(DEFAULT_LISTENER_HOST, DEFAULT_LISTENER_PORT)
}
