//! HTTP listen endpoint parsing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::{Host, Url};

/// Address the CQRS server binds to, written as `http://host:port`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HttpEndpoint {
    host: String,
    port: u16,
}

impl HttpEndpoint {
    /// Builds an endpoint from a host name or IP literal and a port.
    ///
    /// IPv6 literals are stored without brackets.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let host = host
            .strip_prefix('[')
            .and_then(|inner| inner.strip_suffix(']'))
            .map_or_else(|| host.clone(), str::to_owned);
        Self { host, port }
    }

    /// Host name or IP literal.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port; `0` asks the OS for an ephemeral port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` form suitable for binding, with IPv6 hosts bracketed.
    #[must_use]
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for HttpEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "http://{}", self.authority())
    }
}

impl FromStr for HttpEndpoint {
    type Err = EndpointParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input)?;
        if url.scheme() != "http" {
            return Err(EndpointParseError::UnsupportedScheme(url.scheme().to_owned()));
        }
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_owned(),
            Some(Host::Ipv4(address)) => address.to_string(),
            Some(Host::Ipv6(address)) => address.to_string(),
            None => return Err(EndpointParseError::MissingHost(input.to_owned())),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| EndpointParseError::MissingPort(input.to_owned()))?;
        if !matches!(url.path(), "" | "/") {
            return Err(EndpointParseError::UnexpectedPath(input.to_owned()));
        }
        Ok(Self::new(host, port))
    }
}

/// Errors encountered while parsing an [`HttpEndpoint`].
#[derive(Debug, Error)]
pub enum EndpointParseError {
    /// Only plain `http` is served.
    #[error("unsupported listen scheme '{0}' (expected http)")]
    UnsupportedScheme(String),
    /// Host was missing.
    #[error("missing host in '{0}'")]
    MissingHost(String),
    /// Port was missing and has no default.
    #[error("missing port in '{0}'")]
    MissingPort(String),
    /// Listen endpoints cannot carry a path; use `route` instead.
    #[error("listen endpoint '{0}' must not include a path")]
    UnexpectedPath(String),
    /// URL failed to parse.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}
