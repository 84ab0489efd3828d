//! Configuration shared by every consumer of the command bridge.
//!
//! Values are layered by `ortho_config`: built-in defaults first, then an
//! optional configuration file named by `MAXBRIDGE_CONFIG_PATH`, then
//! `MAXBRIDGE_*` environment variables. The bridge has no command line of its
//! own, so [`Config::load_from_env`] never consults process arguments.

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod defaults;
mod endpoint;
mod logging;

pub use defaults::{
    DEFAULT_CONNECT_TIMEOUT_MILLIS, DEFAULT_LISTENER_HOST, DEFAULT_LISTENER_PORT,
    DEFAULT_LOG_FILTER, DEFAULT_MAX_RESPONSE_BYTES, DEFAULT_TIMEOUT_SECS,
    default_listener_endpoint, default_listener_host, default_log_filter,
    default_log_filter_string, default_log_format,
};
pub use endpoint::{EndpointParseError, ListenerEndpoint};
pub use logging::{LogFormat, LogFormatParseError};

/// Program name handed to the loader in place of real process arguments.
const LOADER_PROGRAM_NAME: &str = "maxbridge";

/// Bridge configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, OrthoConfig)]
#[ortho_config(prefix = "MAXBRIDGE")]
pub struct Config {
    /// Host name or address of the listener inside the host application.
    #[ortho_config(default = defaults::default_listener_host())]
    pub listener_host: String,
    /// TCP port of the listener.
    #[ortho_config(default = defaults::DEFAULT_LISTENER_PORT)]
    pub listener_port: u16,
    /// Per-call timeout applied when a command does not carry its own.
    #[ortho_config(default = defaults::DEFAULT_TIMEOUT_SECS)]
    pub default_timeout_secs: u64,
    /// Upper bound on establishing a connection.
    #[ortho_config(default = defaults::DEFAULT_CONNECT_TIMEOUT_MILLIS)]
    pub connect_timeout_millis: u64,
    /// Largest response line accepted from the listener.
    #[ortho_config(default = defaults::DEFAULT_MAX_RESPONSE_BYTES)]
    pub max_response_bytes: u64,
    /// `tracing` filter expression.
    #[ortho_config(default = defaults::default_log_filter_string())]
    pub log_filter: String,
    /// Output format for diagnostics.
    #[ortho_config(default = defaults::default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listener_host: default_listener_host(),
            listener_port: DEFAULT_LISTENER_PORT,
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            connect_timeout_millis: DEFAULT_CONNECT_TIMEOUT_MILLIS,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Loads defaults, the optional configuration file, and environment
    /// overrides, then validates the result.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let config = Self::load_from_iter([OsString::from(LOADER_PROGRAM_NAME)])
            .map_err(ConfigError::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the client cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listener_host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "listener_host",
                reason: "must not be empty",
            });
        }
        if self.listener_port == 0 {
            return Err(ConfigError::Invalid {
                field: "listener_port",
                reason: "must be a concrete port, not 0",
            });
        }
        if self.default_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "default_timeout_secs",
                reason: "must be at least one second",
            });
        }
        if self.connect_timeout_millis == 0 {
            return Err(ConfigError::Invalid {
                field: "connect_timeout_millis",
                reason: "must be at least one millisecond",
            });
        }
        if self.max_response_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "max_response_bytes",
                reason: "must be at least one byte",
            });
        }
        Ok(())
    }

    /// Endpoint the client connects to.
    #[must_use]
    pub fn listener_endpoint(&self) -> ListenerEndpoint {
        ListenerEndpoint::new(self.listener_host.clone(), self.listener_port)
    }

    /// Default per-call timeout.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// Connection establishment timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_millis)
    }

    /// Response size limit, saturated to the platform's address space.
    #[must_use]
    pub fn max_response_bytes(&self) -> usize {
        usize::try_from(self.max_response_bytes).unwrap_or(usize::MAX)
    }

    /// Configured log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Configured log format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// One or more configuration layers failed to load.
    #[error("failed to load bridge configuration: {0}")]
    Load(Arc<OrthoError>),
    /// A loaded value is out of range.
    #[error("invalid configuration value for {field}: {reason}")]
    Invalid {
        /// Field that failed validation.
        field: &'static str,
        /// Constraint the value violated.
        reason: &'static str,
    },
}
