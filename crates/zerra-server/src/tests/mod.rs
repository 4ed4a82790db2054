//! Test suites for the CQRS server.

mod dispatch_behaviour;
mod support;
