//! Shared helpers for unit tests that talk to a local mock server.

pub mod range_server;
pub mod socket_guard;
