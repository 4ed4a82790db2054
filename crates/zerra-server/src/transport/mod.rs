//! HTTP listener for the CQRS endpoint.
//!
//! The transport module binds the configured endpoint and serves an axum
//! router on it until the shutdown token fires.

mod errors;
mod listener;

pub use self::errors::ListenerError;
pub use self::listener::HttpListener;

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
