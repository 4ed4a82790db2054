//! Request envelope carried by every remote call.
//!
//! [`RequestData`] is the single message a client posts to the server. It is
//! deliberately loose on the wire (every field is optional or defaulted) so the
//! same shape can be read by all three codecs, and is tightened into a
//! [`RemoteCall`] by [`RequestData::into_call`] before anything is dispatched.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Opaque serialized payload nested inside an envelope.
///
/// Human-readable codecs carry blobs as base64 strings; the binary codec
/// writes the raw bytes.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Blob(Vec<u8>);

impl Blob {
    /// Wraps already-serialized bytes.
    #[must_use]
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Borrows the payload bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the blob and returns its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Length of the payload in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "Blob({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Serialize for Blob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&STANDARD.encode(&self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Blob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(BlobVisitor)
        } else {
            deserializer.deserialize_byte_buf(BlobVisitor)
        }
    }
}

struct BlobVisitor;

impl<'de> Visitor<'de> for BlobVisitor {
    type Value = Blob;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a base64 string or a byte buffer")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        STANDARD
            .decode(value)
            .map(Blob)
            .map_err(|error| E::custom(format!("invalid base64 blob: {error}")))
    }

    fn visit_bytes<E: de::Error>(self, value: &[u8]) -> Result<Self::Value, E> {
        Ok(Blob(value.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, value: Vec<u8>) -> Result<Self::Value, E> {
        Ok(Blob(value))
    }
}

/// Identity claim forwarded by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    claim_type: String,
    value: String,
}

impl Claim {
    /// Builds a claim from its type and value.
    #[must_use]
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }

    /// Claim type, for example `name` or `role`.
    #[must_use]
    pub fn claim_type(&self) -> &str {
        &self.claim_type
    }

    /// Claim value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Envelope posted by a client for one remote call.
///
/// Exactly one of `provider_type` or `message_type` must be set. Fields are
/// declared in wire order; the nameless JSON and binary codecs depend on it,
/// so no field is ever skipped during serialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestData {
    /// Fully-qualified name of the query provider being called.
    pub provider_type: Option<String>,
    /// Method name on the provider.
    pub provider_method: Option<String>,
    /// Positional, individually serialized method arguments.
    pub provider_arguments: Option<Vec<Blob>>,
    /// Fully-qualified name of the command or event being dispatched.
    pub message_type: Option<String>,
    /// Serialized command or event payload.
    pub message_data: Option<Blob>,
    /// Whether the caller waits for the handler to complete.
    pub message_await: bool,
    /// Whether the caller expects a typed result.
    pub message_result: bool,
    /// Identity claims forwarded for authorization.
    pub claims: Option<Vec<Claim>>,
    /// Opaque caller identity used for logging and loop prevention.
    pub source: String,
}

impl RequestData {
    /// Builds a provider (query) call envelope.
    #[must_use]
    pub fn query(
        provider_type: impl Into<String>,
        method: impl Into<String>,
        arguments: Vec<Blob>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            provider_type: Some(provider_type.into()),
            provider_method: Some(method.into()),
            provider_arguments: Some(arguments),
            source: source.into(),
            ..Self::default()
        }
    }

    /// Builds a command/event dispatch envelope.
    #[must_use]
    pub fn dispatch(
        message_type: impl Into<String>,
        data: Blob,
        wait: bool,
        want_result: bool,
        source: impl Into<String>,
    ) -> Self {
        Self {
            message_type: Some(message_type.into()),
            message_data: Some(data),
            message_await: wait,
            message_result: want_result,
            source: source.into(),
            ..Self::default()
        }
    }

    /// Attaches identity claims to the envelope.
    #[must_use]
    pub fn with_claims(mut self, claims: Vec<Claim>) -> Self {
        self.claims = Some(claims);
        self
    }

    /// Validates the envelope and converts it into a typed call.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError`] when both or neither of the provider and
    /// message types are set, or when a required companion field is missing.
    pub fn into_call(self) -> Result<RemoteCall, EnvelopeError> {
        let provider_type = non_blank(self.provider_type);
        let message_type = non_blank(self.message_type);
        let claims = self.claims.unwrap_or_default();

        match (provider_type, message_type) {
            (Some(_), Some(_)) => Err(EnvelopeError::Ambiguous),
            (None, None) => Err(EnvelopeError::Empty),
            (Some(provider_type), None) => {
                let method = non_blank(self.provider_method)
                    .ok_or(EnvelopeError::MissingField { field: "provider_method" })?;
                Ok(RemoteCall::Query(ProviderCall {
                    provider_type,
                    method,
                    arguments: self.provider_arguments.unwrap_or_default(),
                    claims,
                    source: self.source,
                }))
            }
            (None, Some(message_type)) => {
                let data = self
                    .message_data
                    .ok_or(EnvelopeError::MissingField { field: "message_data" })?;
                Ok(RemoteCall::Dispatch(MessageDispatch {
                    message_type,
                    data,
                    wait: self.message_await,
                    want_result: self.message_result,
                    claims,
                    source: self.source,
                }))
            }
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}

/// Structural problems found while validating an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// Both a provider type and a message type were supplied.
    #[error("envelope sets both provider_type and message_type")]
    Ambiguous,
    /// Neither a provider type nor a message type was supplied.
    #[error("envelope sets neither provider_type nor message_type")]
    Empty,
    /// A field required by the call kind is absent or blank.
    #[error("envelope is missing required field '{field}'")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },
}

/// Validated remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    /// Query provider method invocation.
    Query(ProviderCall),
    /// Command or event dispatch.
    Dispatch(MessageDispatch),
}

impl RemoteCall {
    /// Type name used for throttle lookup and logging.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Query(call) => call.provider_type(),
            Self::Dispatch(dispatch) => dispatch.message_type(),
        }
    }

    /// Caller identity tag.
    #[must_use]
    pub fn source(&self) -> &str {
        match self {
            Self::Query(call) => call.source(),
            Self::Dispatch(dispatch) => dispatch.source(),
        }
    }

    /// Claims forwarded with the call.
    #[must_use]
    pub fn claims(&self) -> &[Claim] {
        match self {
            Self::Query(call) => &call.claims,
            Self::Dispatch(dispatch) => &dispatch.claims,
        }
    }
}

/// Provider method invocation extracted from an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    provider_type: String,
    method: String,
    arguments: Vec<Blob>,
    claims: Vec<Claim>,
    source: String,
}

impl ProviderCall {
    /// Provider interface name.
    #[must_use]
    pub fn provider_type(&self) -> &str {
        &self.provider_type
    }

    /// Method name on the provider.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Positional serialized arguments.
    #[must_use]
    pub fn arguments(&self) -> &[Blob] {
        &self.arguments
    }

    /// Caller identity tag.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Moves the serialized arguments out of the call.
    #[must_use]
    pub fn into_arguments(self) -> Vec<Blob> {
        self.arguments
    }
}

/// Command or event dispatch extracted from an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDispatch {
    message_type: String,
    data: Blob,
    wait: bool,
    want_result: bool,
    claims: Vec<Claim>,
    source: String,
}

impl MessageDispatch {
    /// Command or event type name.
    #[must_use]
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Serialized command or event payload.
    #[must_use]
    pub const fn data(&self) -> &Blob {
        &self.data
    }

    /// Whether the caller waits for completion.
    #[must_use]
    pub const fn wait(&self) -> bool {
        self.wait
    }

    /// Whether the caller expects a result body.
    #[must_use]
    pub const fn want_result(&self) -> bool {
        self.want_result
    }

    /// Caller identity tag.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Moves the payload out of the dispatch.
    #[must_use]
    pub fn into_data(self) -> Blob {
        self.data
    }
}

#[cfg(test)]
mod tests;
