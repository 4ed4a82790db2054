//! Content codecs negotiated through the `Content-Type` header.
//!
//! Three encodings are supported:
//!
//! - [`ContentType::Bytes`]: compact binary (`bincode`), field order defined by
//!   declaration order.
//! - [`ContentType::Json`]: ordinary JSON with field names.
//! - [`ContentType::JsonNameless`]: JSON where every struct is written as a
//!   positional array, omitting field names. Decoding relies on serde's
//!   support for reading structs from sequences, so the target type must
//!   declare its fields in the same order as the writer.

mod nameless;

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use bincode::Options;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use self::nameless::Nameless;

/// Media type for the binary codec.
pub const MEDIA_TYPE_BYTES: &str = "application/octet-stream";
/// Media type for the named JSON codec.
pub const MEDIA_TYPE_JSON: &str = "application/json";
/// Media type for the positional JSON codec.
pub const MEDIA_TYPE_JSON_NAMELESS: &str = "application/jsonnameless";

/// Encoding applied to request and response bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// Binary encoding.
    Bytes,
    /// JSON with field names.
    Json,
    /// JSON with structs written as positional arrays.
    JsonNameless,
}

impl ContentType {
    /// Every supported content type.
    pub const ALL: [Self; 3] = [Self::Bytes, Self::Json, Self::JsonNameless];

    /// Resolves a content type from a `Content-Type` header value.
    ///
    /// Matching is a case-insensitive prefix test so parameters such as
    /// `; charset=utf-8` are tolerated. The nameless media type is tested
    /// before plain JSON because the latter is a prefix of the former.
    #[must_use]
    pub fn from_header(value: &str) -> Option<Self> {
        let value = value.trim_start().to_ascii_lowercase();
        [Self::JsonNameless, Self::Json, Self::Bytes]
            .into_iter()
            .find(|candidate| value.starts_with(candidate.media_type()))
    }

    /// Media type written to the `Content-Type` header.
    #[must_use]
    pub const fn media_type(self) -> &'static str {
        match self {
            Self::Bytes => MEDIA_TYPE_BYTES,
            Self::Json => MEDIA_TYPE_JSON,
            Self::JsonNameless => MEDIA_TYPE_JSON_NAMELESS,
        }
    }

    /// Short name used in configuration files and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bytes => "bytes",
            Self::Json => "json",
            Self::JsonNameless => "jsonnameless",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = ContentTypeParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(trimmed))
            .or_else(|| Self::from_header(trimmed))
            .ok_or_else(|| ContentTypeParseError {
                value: trimmed.to_owned(),
            })
    }
}

/// Raised when configuration text does not name a known content type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown content type '{value}' (expected bytes, json or jsonnameless)")]
pub struct ContentTypeParseError {
    /// Rejected input.
    pub value: String,
}

/// Encoding or decoding failure.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Binary codec failure.
    #[error("binary codec error: {0}")]
    Binary(#[from] bincode::Error),
    /// JSON codec failure (named or nameless).
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializes a value into a new buffer.
///
/// # Errors
///
/// Returns [`CodecError`] if the value cannot be represented by the codec.
pub fn serialize<T>(content_type: ContentType, value: &T) -> Result<Vec<u8>, CodecError>
where
    T: Serialize + ?Sized,
{
    let mut buffer = Vec::new();
    serialize_into(content_type, &mut buffer, value)?;
    Ok(buffer)
}

/// Serializes a value into a writer.
///
/// The writer is not flushed; callers owning a cipher stream must finish it
/// themselves.
///
/// # Errors
///
/// Returns [`CodecError`] if serialization or writing fails.
pub fn serialize_into<W, T>(
    content_type: ContentType,
    writer: W,
    value: &T,
) -> Result<(), CodecError>
where
    W: Write,
    T: Serialize + ?Sized,
{
    match content_type {
        ContentType::Bytes => bincode::serialize_into(writer, value)?,
        ContentType::Json => serde_json::to_writer(writer, value)?,
        ContentType::JsonNameless => serde_json::to_writer(writer, &Nameless::new(value))?,
    }
    Ok(())
}

/// Deserializes a value from a complete buffer.
///
/// # Errors
///
/// Returns [`CodecError`] if the bytes are not a valid encoding of `T`.
pub fn deserialize<T>(content_type: ContentType, bytes: &[u8]) -> Result<T, CodecError>
where
    T: DeserializeOwned,
{
    deserialize_from(content_type, bytes, bytes.len())
}

/// Deserializes a value while reading from a stream.
///
/// `limit` caps the bytes the binary codec may claim, so a forged length
/// prefix fails to decode instead of reserving memory. Pass the size of the
/// underlying input; a decrypted stream never yields more than its
/// ciphertext.
///
/// # Errors
///
/// Returns [`CodecError`] if reading fails, the limit is exceeded or the
/// stream is not a valid encoding of `T`.
pub fn deserialize_from<R, T>(
    content_type: ContentType,
    reader: R,
    limit: usize,
) -> Result<T, CodecError>
where
    R: Read,
    T: DeserializeOwned,
{
    match content_type {
        ContentType::Bytes => Ok(binary_options(limit).deserialize_from(reader)?),
        ContentType::Json | ContentType::JsonNameless => Ok(serde_json::from_reader(reader)?),
    }
}

/// Matches the encoding of `bincode::serialize_into` with a size limit.
fn binary_options(limit: usize) -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(u64::try_from(limit).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests;
