//! Axum middleware answering the CQRS route.

use axum::extract::{Request, State};
use axum::http::header::ORIGIN;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::info;

use super::DISPATCH_TARGET;
use super::response::write_cors;
use super::router;
use crate::server::CqrsServer;

/// Routes POST and OPTIONS on the configured path; passes everything else on.
pub(crate) async fn cqrs_middleware(
    State(server): State<CqrsServer>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path() != server.settings().route {
        return next.run(request).await;
    }
    match *request.method() {
        Method::POST => router::dispatch(server, request).await,
        Method::OPTIONS => preflight(&server, request.headers()),
        _ => next.run(request).await,
    }
}

fn preflight(server: &CqrsServer, headers: &HeaderMap) -> Response {
    let origin = headers.get(ORIGIN);
    let text = origin.map(|value| String::from_utf8_lossy(value.as_bytes()));
    if !server.inner.origins.permits(text.as_deref()) {
        info!(
            target: DISPATCH_TARGET,
            origin = text.as_deref().unwrap_or_default(),
            "preflight rejected: origin not allowed"
        );
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut response = StatusCode::NO_CONTENT.into_response();
    write_cors(response.headers_mut(), origin);
    response
}
