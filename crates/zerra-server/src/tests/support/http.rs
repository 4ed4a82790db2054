//! In-process HTTP helpers driving a router through `tower::ServiceExt`.

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::header::{CONTENT_TYPE, ORIGIN};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use serde::de::DeserializeOwned;
use tower::ServiceExt;
use zerra_config::DEFAULT_ROUTE;
use zerra_wire::{ContentType, RequestData, SymmetricKey, codec, crypto};

/// Collected response.
#[derive(Debug)]
pub struct Reply {
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Full response body.
    pub body: Bytes,
}

impl Reply {
    /// Header value as text, when present.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Sends `request` and buffers the whole response.
pub async fn send(router: &Router, request: Request<Body>) -> Reply {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router is infallible");
    let (parts, body) = response.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("response body should be readable");
    Reply {
        status: parts.status,
        headers: parts.headers,
        body,
    }
}

/// Encodes an envelope the way a client would.
#[must_use]
pub fn encode_request(
    content_type: ContentType,
    key: Option<&SymmetricKey>,
    request: &RequestData,
) -> Vec<u8> {
    let plain = codec::serialize(content_type, request).expect("envelope should encode");
    match key {
        Some(key) => crypto::seal(key, &plain).expect("envelope should encrypt"),
        None => plain,
    }
}

/// Builds a POST to the default route.
#[must_use]
pub fn post(media_type: &str, origin: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(DEFAULT_ROUTE)
        .header(CONTENT_TYPE, media_type);
    if let Some(origin) = origin {
        builder = builder.header(ORIGIN, origin);
    }
    builder
        .body(Body::from(body))
        .expect("request should build")
}

/// Encodes and posts `request` to the default route.
pub async fn send_request(
    router: &Router,
    content_type: ContentType,
    key: Option<&SymmetricKey>,
    request: &RequestData,
) -> Reply {
    let body = encode_request(content_type, key, request);
    send(router, post(content_type.media_type(), None, body)).await
}

/// Sends a CORS preflight for the default route.
pub async fn preflight(router: &Router, origin: Option<&str>) -> Reply {
    let mut builder = Request::builder()
        .method(Method::OPTIONS)
        .uri(DEFAULT_ROUTE);
    if let Some(origin) = origin {
        builder = builder.header(ORIGIN, origin);
    }
    send(router, builder.body(Body::empty()).expect("request should build")).await
}

/// Decrypts and decodes a response body.
#[must_use]
pub fn decode_body<T>(content_type: ContentType, key: Option<&SymmetricKey>, reply: &Reply) -> T
where
    T: DeserializeOwned,
{
    let plain = match key {
        Some(key) => crypto::open(key, &reply.body).expect("response should decrypt"),
        None => reply.body.to_vec(),
    };
    codec::deserialize(content_type, &plain).expect("response should decode")
}
