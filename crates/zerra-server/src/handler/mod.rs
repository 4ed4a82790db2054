//! Handler delegates invoked by the dispatch router.
//!
//! The router never interprets payloads itself. Once an envelope is decoded,
//! authorized and throttled it calls one of the three [`RequestHandler`]
//! delegates: provider queries, awaited commands and fire-and-forget
//! commands. [`HandlerTable`] is the stock implementation: an explicit
//! registration table mapping type names to typed closures, built once at
//! startup.

mod table;

use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use zerra_wire::{ContentType, MessageDispatch, ProviderCall, RemoteError, codec};

use crate::auth::Identity;

pub use self::table::{Arguments, HandlerTable};

/// Request-scoped values handed to every handler.
#[derive(Debug, Clone)]
pub struct RequestContext {
    source: String,
    identity: Identity,
    content_type: ContentType,
    cancellation: CancellationToken,
}

impl RequestContext {
    /// Builds a context for one call.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        identity: Identity,
        content_type: ContentType,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            source: source.into(),
            identity,
            content_type,
            cancellation,
        }
    }

    /// Opaque caller identity carried by the envelope.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Identity bound for this request only.
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Codec negotiated for this request; results are encoded with it.
    #[must_use]
    pub const fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// Token cancelled when the caller disconnects or the server shuts down.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns `true` once the call should stop early.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Result of a handler call: buffered bytes, a live stream, or nothing.
pub enum CallResponse {
    /// Already-encoded result body.
    Bytes(Vec<u8>),
    /// Raw stream copied to the caller chunk by chunk.
    Stream(Box<dyn AsyncRead + Send + Unpin>),
    /// No result; answered with an empty body.
    Void,
}

impl CallResponse {
    /// Encodes `value` with the request's content type.
    ///
    /// # Errors
    ///
    /// Returns a business [`HandlerError`] wrapping the codec failure.
    pub fn encode<T>(content_type: ContentType, value: &T) -> Result<Self, HandlerError>
    where
        T: Serialize + ?Sized,
    {
        codec::serialize(content_type, value)
            .map(Self::Bytes)
            .map_err(|error| HandlerError::from_error(&error))
    }

    /// Wraps a reader whose bytes are streamed verbatim.
    #[must_use]
    pub fn stream<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::Stream(Box::new(reader))
    }

    /// Returns `true` for [`CallResponse::Void`].
    #[must_use]
    pub const fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }
}

impl fmt::Debug for CallResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Void => f.write_str("Void"),
        }
    }
}

/// Collaborator delegates the router invokes.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Executes a provider (query) method.
    async fn call_provider(
        &self,
        call: ProviderCall,
        context: RequestContext,
    ) -> Result<CallResponse, HandlerError>;

    /// Handles a command the caller waits on.
    async fn handle_command_await(
        &self,
        dispatch: MessageDispatch,
        context: RequestContext,
    ) -> Result<CallResponse, HandlerError>;

    /// Decodes a fire-and-forget command into work that runs detached.
    ///
    /// Called before the caller is answered, so an undecodable payload or an
    /// unwired type is reported on the response. The returned future runs
    /// after the response has been sent.
    ///
    /// # Errors
    ///
    /// Returns an invalid-arguments or not-wired [`HandlerError`].
    fn prepare_command(
        &self,
        dispatch: MessageDispatch,
        context: RequestContext,
    ) -> Result<PendingCommand, HandlerError>;
}

/// Decoded fire-and-forget command, ready to be spawned.
pub type PendingCommand = BoxFuture<'static, Result<(), HandlerError>>;

/// Classifies a [`HandlerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerErrorKind {
    /// Raised by business logic; returned to the caller in full.
    Business,
    /// No delegate is wired for the requested type or method.
    NotWired,
    /// Arguments or payload could not be decoded for the delegate.
    InvalidArguments,
}

/// Failure reported by a handler delegate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{remote}")]
pub struct HandlerError {
    kind: HandlerErrorKind,
    remote: RemoteError,
}

impl HandlerError {
    /// Business error with an explicit type name and message.
    #[must_use]
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: HandlerErrorKind::Business,
            remote: RemoteError::new(type_name, message),
        }
    }

    /// Business error capturing `error` and its source chain.
    #[must_use]
    pub fn from_error<E>(error: &E) -> Self
    where
        E: Error + ?Sized,
    {
        Self {
            kind: HandlerErrorKind::Business,
            remote: RemoteError::from_error(error),
        }
    }

    /// Configuration fault: nothing is wired for `target`.
    #[must_use]
    pub fn not_wired(target: impl fmt::Display) -> Self {
        Self {
            kind: HandlerErrorKind::NotWired,
            remote: RemoteError::new("NotWired", format!("no handler wired for {target}")),
        }
    }

    /// Arguments could not be decoded.
    #[must_use]
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self {
            kind: HandlerErrorKind::InvalidArguments,
            remote: RemoteError::new("InvalidArguments", message),
        }
    }

    /// Classification of the failure.
    #[must_use]
    pub const fn kind(&self) -> HandlerErrorKind {
        self.kind
    }

    /// Payload returned to the caller.
    #[must_use]
    pub const fn remote(&self) -> &RemoteError {
        &self.remote
    }

    /// Consumes the error, yielding its payload.
    #[must_use]
    pub fn into_remote(self) -> RemoteError {
        self.remote
    }

    /// Returns `true` for deployment faults rather than request faults.
    #[must_use]
    pub fn is_configuration_fault(&self) -> bool {
        self.kind == HandlerErrorKind::NotWired
    }
}

impl From<RemoteError> for HandlerError {
    fn from(remote: RemoteError) -> Self {
        Self {
            kind: HandlerErrorKind::Business,
            remote,
        }
    }
}

#[cfg(test)]
mod tests;
