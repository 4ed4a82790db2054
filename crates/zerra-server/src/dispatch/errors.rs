//! Error taxonomy for request dispatch.
//!
//! Every failure on the request path is a [`DispatchError`]. The router maps
//! each variant to an HTTP status, a log level and (when the codec was
//! negotiated) a structured [`RemoteError`] body.

use std::io;

use axum::http::StatusCode;
use thiserror::Error;
use zerra_wire::{CodecError, EnvelopeError, RemoteError};

use crate::auth::AuthRejection;
use crate::handler::{HandlerError, HandlerErrorKind};
use crate::throttle::ThrottleError;

/// Failure classes the router distinguishes when logging and responding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Bad content type, body or envelope.
    Malformed,
    /// Origin or authorizer rejection.
    Unauthorized,
    /// Deployment bug: missing throttle or handler.
    Configuration,
    /// Global command ceiling reached.
    Admission,
    /// Raised inside business logic.
    Handler,
    /// Cipher or socket failure.
    Transport,
}

/// Errors surfaced while dispatching one request.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The `content-type` header is missing or names no known codec.
    #[error("unsupported content type: {value}")]
    UnsupportedContentType {
        /// Header value as received (empty when absent).
        value: String,
    },

    /// The request codec differs from the one the server is pinned to.
    #[error("content type {received} does not match the expected {expected}")]
    ContentTypeMismatch {
        /// Configured codec.
        expected: String,
        /// Negotiated codec.
        received: String,
    },

    /// The body exceeds the configured limit.
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge {
        /// Configured limit in bytes.
        limit: usize,
    },

    /// The body stream failed before it was fully read.
    #[error("failed to read request body: {message}")]
    UnreadableBody {
        /// Underlying failure description.
        message: String,
    },

    /// The envelope could not be decoded.
    #[error("failed to decode request: {0}")]
    Decode(#[source] CodecError),

    /// The envelope decoded but is structurally invalid.
    #[error("invalid request: {0}")]
    Envelope(#[from] EnvelopeError),

    /// The `Origin` header is not allow-listed.
    #[error("origin '{origin}' is not allowed")]
    OriginNotAllowed {
        /// Rejected origin.
        origin: String,
    },

    /// The configured authorizer refused the request.
    #[error(transparent)]
    Unauthorized(#[from] AuthRejection),

    /// Throttle resolution or acquisition failed.
    #[error(transparent)]
    Throttle(#[from] ThrottleError),

    /// The global receive counter is at its ceiling.
    #[error("cannot receive any more commands")]
    ReceiveCeiling,

    /// The handler delegate failed.
    #[error("handler failed: {0}")]
    Handler(#[from] HandlerError),

    /// Decryption or stream failure.
    #[error("transport failure: {message}")]
    Transport {
        /// Failure description.
        message: String,
        /// Underlying I/O error, if any.
        #[source]
        source: Option<io::Error>,
    },
}

impl DispatchError {
    /// Builds an [`DispatchError::UnsupportedContentType`].
    pub fn unsupported_content_type(value: impl Into<String>) -> Self {
        Self::UnsupportedContentType {
            value: value.into(),
        }
    }

    /// Builds a [`DispatchError::Transport`] from an I/O failure.
    pub fn transport(message: impl Into<String>, source: io::Error) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Classifies the failure.
    pub fn class(&self) -> FaultClass {
        match self {
            Self::UnsupportedContentType { .. }
            | Self::ContentTypeMismatch { .. }
            | Self::BodyTooLarge { .. }
            | Self::UnreadableBody { .. }
            | Self::Decode(_)
            | Self::Envelope(_) => FaultClass::Malformed,
            Self::OriginNotAllowed { .. } | Self::Unauthorized(_) => FaultClass::Unauthorized,
            Self::Throttle(ThrottleError::Unregistered { .. }) => FaultClass::Configuration,
            Self::Throttle(ThrottleError::Closed { .. }) | Self::ReceiveCeiling => {
                FaultClass::Admission
            }
            Self::Handler(error) => match error.kind() {
                HandlerErrorKind::Business => FaultClass::Handler,
                HandlerErrorKind::NotWired => FaultClass::Configuration,
                HandlerErrorKind::InvalidArguments => FaultClass::Malformed,
            },
            Self::Transport { .. } => FaultClass::Transport,
        }
    }

    /// Returns the HTTP status for this error.
    ///
    /// Malformed requests return 400 (413 for oversized bodies), rejected
    /// callers 401, admission back-pressure 503 and every other failure 500.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => match self.class() {
                FaultClass::Malformed => StatusCode::BAD_REQUEST,
                FaultClass::Unauthorized => StatusCode::UNAUTHORIZED,
                FaultClass::Admission => StatusCode::SERVICE_UNAVAILABLE,
                FaultClass::Configuration | FaultClass::Handler | FaultClass::Transport => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    /// Returns `true` for deployment faults that should be logged loudly.
    pub fn is_configuration_fault(&self) -> bool {
        self.class() == FaultClass::Configuration
    }

    /// Short, stable name used in logs and as the remote error type.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::UnsupportedContentType { .. } => "UnsupportedContentType",
            Self::ContentTypeMismatch { .. } => "ContentTypeMismatch",
            Self::BodyTooLarge { .. } => "BodyTooLarge",
            Self::UnreadableBody { .. } => "UnreadableBody",
            Self::Decode(_) => "Decode",
            Self::Envelope(_) => "InvalidEnvelope",
            Self::OriginNotAllowed { .. } => "OriginNotAllowed",
            Self::Unauthorized(_) => "Unauthorized",
            Self::Throttle(ThrottleError::Unregistered { .. }) => "ThrottleNotRegistered",
            Self::Throttle(ThrottleError::Closed { .. }) => "ThrottleClosed",
            Self::ReceiveCeiling => "ReceiveCeiling",
            Self::Handler(_) => "HandlerFailed",
            Self::Transport { .. } => "Transport",
        }
    }

    /// Structured payload returned to the caller.
    ///
    /// Handler failures are returned verbatim so callers can reconstruct the
    /// business error; everything else is described by its kind and message.
    pub fn remote_error(&self) -> RemoteError {
        match self {
            Self::Handler(error) => error.remote().clone(),
            other => RemoteError::new(other.kind_name(), other.to_string()),
        }
    }
}
