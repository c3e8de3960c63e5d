//! Silent chat client: pinned TLS transport, framed JSON messages, decoy
//! traffic and automatic reconnection.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Reconnect delay policy.
pub mod backoff;
/// CLI parsing and TOML configuration.
pub mod config;
/// Connection state machine with reconnection.
pub mod connection;
/// Periodic filler traffic.
pub mod decoy;
/// Session error taxonomy.
pub mod error;
/// Terminal prompts, input forwarding and chat rendering.
pub mod operator;
/// Concurrent receive and send loops.
pub mod pump;
/// Authenticated framed transport.
pub mod session;
/// TLS dialing and certificate pinning.
pub mod tls;
