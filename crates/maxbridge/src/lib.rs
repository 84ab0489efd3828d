//! Command bridge to a listener embedded in a 3D host application.
//!
//! A plugin running inside the host application listens on a loopback TCP
//! port. Domain code hands [`BridgeClient`] an opaque script; the client opens a
//! connection, writes one newline-terminated JSON request, waits for one
//! newline-terminated JSON response, and closes the connection. Every call is
//! bounded by a deadline that covers connecting, writing, and reading.
//!
//! Failures are classified by [`ErrorKind`] so callers can tell a listener that
//! is not running from a command that is still busy, a reply that broke the
//! protocol, or a script that the host itself rejected.
//!
//! ```rust,no_run
//! use maxbridge::BridgeClient;
//! use maxbridge_config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_from_env()?;
//! maxbridge::telemetry::initialise(&config)?;
//! let client = BridgeClient::from_config(&config);
//! let names = client.send_script("for o in selection collect o.name")?;
//! println!("{names}");
//! # Ok(())
//! # }
//! ```

mod client;
mod command;
mod error;
pub mod protocol;
pub mod telemetry;
mod transport;

pub use client::{BridgeClient, CallState};
pub use command::{Command, CommandKind};
pub use error::{BridgeError, ErrorKind, MalformedReason};
pub use protocol::{RequestEnvelope, ResponseEnvelope};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
