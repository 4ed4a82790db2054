//! Default values applied when no layer sets a field.

use crate::endpoint::HttpEndpoint;
use crate::logging::LogFormat;

/// Default TCP port for the CQRS endpoint.
pub const DEFAULT_PORT: u16 = 9780;

/// Default bind address.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default route the middleware answers on.
pub const DEFAULT_ROUTE: &str = "/cqrs";

/// Default upper bound on request bodies (16 MiB).
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default listen endpoint.
#[must_use]
pub fn default_listen_endpoint() -> HttpEndpoint {
    HttpEndpoint::new(DEFAULT_HOST, DEFAULT_PORT)
}

/// Default log filter expression.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}
