//! Client error type.

use std::io;

use reqwest::StatusCode;
use thiserror::Error;
use zerra_wire::{CodecError, RemoteError};

/// Errors returned by [`crate::CqrsClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The HTTP exchange itself failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// A request or response body did not encode or decode.
    #[error("failed to encode or decode a body: {0}")]
    Codec(#[from] CodecError),
    /// Sealing the request or opening the response failed.
    #[error("body encryption failed: {0}")]
    Crypto(#[source] io::Error),
    /// The server answered with a structured error.
    #[error("remote call failed with status {status}: {error}")]
    Remote {
        /// HTTP status of the response.
        status: StatusCode,
        /// Error raised on the server.
        error: RemoteError,
    },
    /// The server answered with a non-success status and no error body.
    #[error("remote call failed with status {status}")]
    Status {
        /// HTTP status of the response.
        status: StatusCode,
    },
}

impl ClientError {
    /// HTTP status returned by the server, when one was received.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Remote { status, .. } | Self::Status { status } => Some(*status),
            Self::Http(error) => error.status(),
            Self::Codec(_) | Self::Crypto(_) => None,
        }
    }

    /// Structured error sent by the server, if any.
    #[must_use]
    pub const fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote { error, .. } => Some(error),
            _ => None,
        }
    }
}
