//! Serializable error description returned to remote callers.

use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Error raised by a remote handler, flattened into a transferable chain.
///
/// The outermost entry describes the failure the handler returned; `inner`
/// walks the `source()` chain of the original error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    type_name: String,
    message: String,
    inner: Option<Box<RemoteError>>,
}

impl RemoteError {
    /// Builds a single-entry error.
    #[must_use]
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            inner: None,
        }
    }

    /// Attaches an inner cause.
    #[must_use]
    pub fn with_inner(mut self, inner: Self) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }

    /// Captures an error and its full `source()` chain.
    ///
    /// The outer entry is named after `E`; sources are anonymous trait objects
    /// and are recorded with the type name `"source"`.
    #[must_use]
    pub fn from_error<E>(error: &E) -> Self
    where
        E: Error + ?Sized,
    {
        let mut messages = Vec::new();
        let mut cursor = error.source();
        while let Some(source) = cursor {
            messages.push(source.to_string());
            cursor = source.source();
        }
        let inner = messages
            .into_iter()
            .rev()
            .fold(None, |inner: Option<Box<Self>>, message| {
                Some(Box::new(Self {
                    type_name: "source".to_owned(),
                    message,
                    inner,
                }))
            });
        Self {
            type_name: std::any::type_name::<E>().to_owned(),
            message: error.to_string(),
            inner,
        }
    }

    /// Name of the error type raised remotely.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Inner cause, if any.
    #[must_use]
    pub fn inner(&self) -> Option<&Self> {
        self.inner.as_deref()
    }

    /// Iterates the chain starting at this error.
    pub fn chain(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(Some(self), |current| current.inner())
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}: {}", self.type_name, self.message)
    }
}

impl Error for RemoteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.as_deref().map(|inner| inner as &(dyn Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("adoption failed")]
    struct AdoptionFailed(#[source] io::Error);

    #[test]
    fn captures_source_chain() {
        let error = AdoptionFailed(io::Error::other("kennel closed"));
        let remote = RemoteError::from_error(&error);

        assert!(remote.type_name().ends_with("AdoptionFailed"));
        assert_eq!(remote.message(), "adoption failed");
        let inner = remote.inner().expect("inner cause");
        assert_eq!(inner.message(), "kennel closed");
        assert_eq!(remote.chain().count(), 2);
    }

    #[test]
    fn display_joins_type_and_message() {
        let remote = RemoteError::new("PetMissing", "no pet 4");
        assert_eq!(remote.to_string(), "PetMissing: no pet 4");
        assert!(remote.source().is_none());
    }

    #[test]
    fn nested_errors_expose_sources() {
        let remote =
            RemoteError::new("Outer", "outer").with_inner(RemoteError::new("Inner", "inner"));
        let source = remote.source().expect("source");
        assert_eq!(source.to_string(), "Inner: inner");
    }
}
