//! Response writer.
//!
//! Headers are fixed before any body byte is produced. Buffered results are
//! sealed in one pass; streamed results are pumped through a pooled buffer
//! by a background task that feeds a channel-backed body and finishes the
//! cipher before the body ends.

use std::io::{self, Write};
use std::mem;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use zerra_wire::crypto::{self, EncryptWriter};
use zerra_wire::{ContentType, RemoteError, SymmetricKey, codec, headers};

use super::DISPATCH_TARGET;
use super::errors::DispatchError;
use super::router::CallGuards;
use crate::handler::CallResponse;
use crate::server::BufferPool;

const STREAM_CHANNEL_DEPTH: usize = 4;

/// Everything fixed before the body is written.
#[derive(Debug, Clone)]
pub(crate) struct ResponseHead {
    pub(crate) status: StatusCode,
    pub(crate) content_type: Option<ContentType>,
    pub(crate) cors_origin: Option<HeaderValue>,
    pub(crate) provider_type: Option<HeaderValue>,
}

impl ResponseHead {
    pub(crate) const fn new(status: StatusCode) -> Self {
        Self {
            status,
            content_type: None,
            cors_origin: None,
            provider_type: None,
        }
    }

    fn apply(&self, target: &mut HeaderMap) {
        write_cors(target, self.cors_origin.as_ref());
        if let Some(content_type) = self.content_type {
            target.insert(
                axum::http::header::CONTENT_TYPE,
                HeaderValue::from_static(content_type.media_type()),
            );
        }
        if let Some(provider_type) = &self.provider_type {
            target.insert(
                HeaderName::from_static(headers::PROVIDER_TYPE),
                provider_type.clone(),
            );
        }
    }

    fn with_body(&self, body: Body) -> Response {
        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        self.apply(response.headers_mut());
        response
    }
}

/// Writes the CORS echo headers; an absent origin is answered with `*`.
pub(crate) fn write_cors(target: &mut HeaderMap, origin: Option<&HeaderValue>) {
    let origin = origin
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("*"));
    target.insert(HeaderName::from_static(headers::ALLOW_ORIGIN), origin);
    target.insert(
        HeaderName::from_static(headers::ALLOW_METHODS),
        HeaderValue::from_static(headers::ALLOWED_METHODS_VALUE),
    );
    target.insert(
        HeaderName::from_static(headers::ALLOW_HEADERS),
        HeaderValue::from_static(headers::ALLOWED_HEADERS_VALUE),
    );
}

/// Response with headers and no body.
pub(crate) fn empty(head: &ResponseHead) -> Response {
    head.with_body(Body::empty())
}

/// Writes a handler result.
///
/// `guards` stay alive until the body is complete: dropped on return for
/// buffered results, moved into the pump task for streams. Fire-and-forget
/// commands pass `None`; their guards travel with the spawned handler.
pub(crate) fn write(
    head: &ResponseHead,
    key: Option<&SymmetricKey>,
    result: CallResponse,
    buffers: &Arc<BufferPool>,
    guards: Option<CallGuards>,
) -> Result<Response, DispatchError> {
    match result {
        CallResponse::Void => Ok(empty(head)),
        CallResponse::Bytes(bytes) => buffered(head, key, bytes),
        CallResponse::Stream(reader) => {
            streamed(head, key, reader, Arc::clone(buffers), guards)
        }
    }
}

fn buffered(
    head: &ResponseHead,
    key: Option<&SymmetricKey>,
    bytes: Vec<u8>,
) -> Result<Response, DispatchError> {
    let body = match key {
        Some(key) => crypto::seal(key, &bytes)
            .map_err(|error| DispatchError::transport("failed to encrypt response", error))?,
        None => bytes,
    };
    Ok(head.with_body(Body::from(body)))
}

/// Best-effort structured error body.
///
/// Falls back to an empty body when encoding fails; the status still tells
/// the caller what happened.
pub(crate) fn remote_error(
    head: &ResponseHead,
    key: Option<&SymmetricKey>,
    error: &RemoteError,
) -> Response {
    let Some(content_type) = head.content_type else {
        return empty(head);
    };
    let encoded = codec::serialize(content_type, error)
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))
        .and_then(|bytes| match key {
            Some(key) => crypto::seal(key, &bytes),
            None => Ok(bytes),
        });
    match encoded {
        Ok(body) => head.with_body(Body::from(body)),
        Err(error) => {
            warn!(
                target: DISPATCH_TARGET,
                error = %error,
                "failed to encode error response; sending empty body"
            );
            empty(head)
        }
    }
}

fn streamed(
    head: &ResponseHead,
    key: Option<&SymmetricKey>,
    reader: Box<dyn AsyncRead + Send + Unpin>,
    buffers: Arc<BufferPool>,
    guards: Option<CallGuards>,
) -> Result<Response, DispatchError> {
    let sink = ChunkSink::new(key)
        .map_err(|error| DispatchError::transport("failed to start response cipher", error))?;
    let (sender, receiver) = mpsc::channel(STREAM_CHANNEL_DEPTH);
    tokio::spawn(pump(reader, sink, buffers, sender, guards));
    Ok(head.with_body(Body::from_stream(ReceiverStream::new(receiver))))
}

async fn pump(
    mut reader: Box<dyn AsyncRead + Send + Unpin>,
    mut sink: ChunkSink,
    buffers: Arc<BufferPool>,
    sender: mpsc::Sender<io::Result<Bytes>>,
    guards: Option<CallGuards>,
) {
    let mut buffer = buffers.take();
    let mut total = 0_usize;
    loop {
        let slice = buffer.as_mut_slice();
        let read = tokio::select! {
            biased;
            () = sender.closed() => {
                debug!(target: DISPATCH_TARGET, total, "caller went away mid-stream");
                return;
            }
            read = reader.read(slice) => read,
        };
        let chunk = match read {
            Ok(0) => break,
            Ok(count) => {
                total = total.saturating_add(count);
                sink.push(slice.get(..count).unwrap_or_default())
            }
            Err(error) => Err(error),
        };
        if !forward(&sender, chunk).await {
            return;
        }
    }
    let tail = sink.finish();
    if forward(&sender, tail).await {
        debug!(target: DISPATCH_TARGET, total, "streamed response complete");
    }
    drop(guards);
}

/// Sends one chunk; returns `false` when the stream must stop.
async fn forward(sender: &mpsc::Sender<io::Result<Bytes>>, chunk: io::Result<Bytes>) -> bool {
    match chunk {
        Ok(bytes) if bytes.is_empty() => true,
        Ok(bytes) => sender.send(Ok(bytes)).await.is_ok(),
        Err(error) => {
            warn!(
                target: DISPATCH_TARGET,
                error = %error,
                "streamed response aborted"
            );
            if sender.send(Err(error)).await.is_err() {
                debug!(target: DISPATCH_TARGET, "caller already gone");
            }
            false
        }
    }
}

/// Turns plaintext chunks into body chunks, encrypting when keyed.
enum ChunkSink {
    Plain,
    Encrypted(EncryptWriter<Vec<u8>>),
}

impl ChunkSink {
    fn new(key: Option<&SymmetricKey>) -> io::Result<Self> {
        match key {
            Some(key) => Ok(Self::Encrypted(EncryptWriter::new(key, Vec::new())?)),
            None => Ok(Self::Plain),
        }
    }

    fn push(&mut self, data: &[u8]) -> io::Result<Bytes> {
        match self {
            Self::Plain => Ok(Bytes::copy_from_slice(data)),
            Self::Encrypted(writer) => {
                writer.write_all(data)?;
                writer.flush()?;
                Ok(Bytes::from(mem::take(writer.get_mut())))
            }
        }
    }

    fn finish(self) -> io::Result<Bytes> {
        match self {
            Self::Plain => Ok(Bytes::new()),
            Self::Encrypted(writer) => writer.finish().map(Bytes::from),
        }
    }
}
