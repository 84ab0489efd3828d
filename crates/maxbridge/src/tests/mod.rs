//! Test suites that need a listener on the other end of the wire.

pub(crate) mod support;
