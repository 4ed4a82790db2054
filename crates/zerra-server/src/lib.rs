//! HTTP server half of the Zerra CQRS transport.
//!
//! A [`CqrsServer`] answers POSTs on one configured route. Each request body
//! is a [`zerra_wire::RequestData`] envelope, optionally encrypted, naming
//! either a query provider method or a command to dispatch. The router
//! negotiates the codec from the `content-type` header, decodes the envelope,
//! checks the caller's origin and identity, takes a permit from the type's
//! throttle (and, for commands, a slot from the global receive counter) and
//! then hands the call to a [`RequestHandler`].
//!
//! Handler results come back as buffered bytes, a live stream, or nothing,
//! and are written through the same codec and cipher. Failures are mapped to
//! HTTP status codes in one place and, whenever the codec was negotiated,
//! carry a structured [`zerra_wire::RemoteError`] body.
//!
//! Throttles and the receive counter are owned by the server context rather
//! than global state; permits and admissions are scope guards, so every exit
//! path (errors, cancelled requests, finished streams) returns them.
//!
//! [`bootstrap_with`] wires the pieces together the way a service binary
//! would: load configuration, initialise telemetry, bind the listener, build
//! the server and report each step to a [`HealthReporter`].

pub mod auth;
mod bootstrap;
mod dispatch;
pub mod handler;
mod health;
mod receive;
mod server;
pub mod telemetry;
pub mod throttle;
mod transport;

pub use auth::{AuthRejection, Authorizer, ClaimsBinder, Identity, OriginPolicy, PassthroughBinder};
pub use bootstrap::{
    BootstrapError, ConfigLoader, CqrsService, StaticConfigLoader, SystemConfigLoader, bootstrap,
    bootstrap_with,
};
pub use dispatch::{DispatchError, FaultClass};
pub use handler::{
    Arguments, CallResponse, HandlerError, HandlerErrorKind, HandlerTable, PendingCommand,
    RequestContext, RequestHandler,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use receive::{ReceiveCounter, ReceiveGuard};
pub use server::{CqrsServer, CqrsServerBuilder, STREAM_BUFFER_LEN, ServerSettings};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use throttle::{Throttle, ThrottleError, ThrottlePermit, ThrottleRegistry};
pub use transport::{HttpListener, ListenerError};

#[cfg(test)]
mod tests;
