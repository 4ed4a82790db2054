//! Dispatch router for the CQRS route.
//!
//! The axum middleware intercepts POST and OPTIONS requests to the configured
//! route and lets everything else through. POSTs run the request state
//! machine in [`router`], which decodes the envelope, authorizes the caller,
//! takes the throttle and admission guards, invokes the handler delegate and
//! writes the result through [`response`].

mod errors;
mod middleware;
mod response;
mod router;
mod stage;

pub(crate) use self::middleware::cqrs_middleware;
pub use self::errors::{DispatchError, FaultClass};

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
