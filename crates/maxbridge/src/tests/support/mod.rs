//! Shared fixtures for client tests.

mod stub_listener;

pub(crate) use stub_listener::{Reply, StubListener, StubLog, unused_endpoint};
