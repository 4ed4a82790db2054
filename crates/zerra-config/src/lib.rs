//! Shared configuration for the Zerra CQRS server.
//!
//! Values are merged by `ortho_config` from, in increasing precedence:
//! built-in defaults, a TOML file (`--config-path` or `ZERRA_CONFIG_PATH`),
//! `ZERRA_*` environment variables and command-line flags. The merged
//! [`ConfigLayer`] is then validated into a typed [`Config`].

mod defaults;
mod endpoint;
mod logging;

use std::ffi::OsString;
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zerra_wire::{ContentType, SymmetricKey};

pub use crate::defaults::{
    DEFAULT_HOST, DEFAULT_LOG_FILTER, DEFAULT_MAX_REQUEST_BYTES, DEFAULT_PORT, DEFAULT_ROUTE,
    default_listen_endpoint, default_log_filter, default_log_format,
};
pub use crate::endpoint::{EndpointParseError, HttpEndpoint};
pub use crate::logging::{LogFormat, LogFormatParseError};

/// Raw, untyped configuration as merged from every source.
///
/// Every field is optional so that absent values fall back to defaults
/// during [`ConfigLayer::validate`].
#[derive(Debug, Clone, Default, Deserialize, Serialize, OrthoConfig)]
#[serde(default)]
#[ortho_config(prefix = "ZERRA")]
pub struct ConfigLayer {
    /// Listen endpoint (`http://host:port`).
    pub listen: Option<String>,
    /// Route the middleware answers on.
    pub route: Option<String>,
    /// Statically expected content type (`bytes`, `json`, `jsonnameless`).
    pub content_type: Option<String>,
    /// Origins permitted to call the endpoint.
    ///
    /// The empty default keeps the merged layer an object even when no
    /// source sets any value. Higher-precedence sources replace the list.
    #[ortho_config(default = vec![], merge_strategy = "replace")]
    pub allowed_origins: Vec<String>,
    /// Base64 AES-256 key or shared secret enabling body encryption.
    pub encryption_key: Option<String>,
    /// Global ceiling on concurrently processed commands.
    pub max_concurrent_receive: Option<usize>,
    /// Upper bound on request body size in bytes.
    pub max_request_bytes: Option<usize>,
    /// Tracing filter expression.
    pub log_filter: Option<String>,
    /// Log output format (`json` or `compact`).
    pub log_format: Option<String>,
}

impl ConfigLayer {
    /// Validates the merged layer and applies defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(self) -> Result<Config, ConfigError> {
        let listen = match self.listen.as_deref().map(str::trim) {
            None | Some("") => default_listen_endpoint(),
            Some(text) => text
                .parse()
                .map_err(|error: EndpointParseError| ConfigError::invalid("listen", error))?,
        };

        let route = self
            .route
            .map(|route| route.trim().to_owned())
            .filter(|route| !route.is_empty())
            .unwrap_or_else(|| DEFAULT_ROUTE.to_owned());
        if !route.starts_with('/') {
            return Err(ConfigError::invalid("route", "route must start with '/'"));
        }

        let content_type = non_blank(self.content_type)
            .map(|text| text.parse::<ContentType>())
            .transpose()
            .map_err(|error| ConfigError::invalid("content_type", error))?;

        let encryption_key = non_blank(self.encryption_key)
            .map(|text| SymmetricKey::parse(&text))
            .transpose()
            .map_err(|error| ConfigError::invalid("encryption_key", error))?;

        if self.max_concurrent_receive == Some(0) {
            return Err(ConfigError::invalid(
                "max_concurrent_receive",
                "ceiling must be at least 1",
            ));
        }

        let max_request_bytes = self.max_request_bytes.unwrap_or(DEFAULT_MAX_REQUEST_BYTES);
        if max_request_bytes == 0 {
            return Err(ConfigError::invalid(
                "max_request_bytes",
                "limit must be at least 1",
            ));
        }

        let log_format = non_blank(self.log_format)
            .map(|text| text.parse::<LogFormat>())
            .transpose()
            .map_err(|error| ConfigError::invalid("log_format", error))?
            .unwrap_or_else(default_log_format);

        let allowed_origins = self
            .allowed_origins
            .into_iter()
            .map(|origin| origin.trim().trim_end_matches('/').to_owned())
            .filter(|origin| !origin.is_empty())
            .collect();

        Ok(Config {
            listen,
            route,
            content_type,
            allowed_origins,
            encryption_key,
            max_concurrent_receive: self.max_concurrent_receive,
            max_request_bytes,
            log_filter: non_blank(self.log_filter)
                .unwrap_or_else(|| default_log_filter().to_owned()),
            log_format,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_owned())
        .filter(|text| !text.is_empty())
}

/// Validated configuration consumed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address the HTTP listener binds to.
    pub listen: HttpEndpoint,
    /// Route the middleware answers on.
    pub route: String,
    /// Content type every request must use, when pinned.
    pub content_type: Option<ContentType>,
    /// Allowed `Origin` values; empty permits any origin.
    pub allowed_origins: Vec<String>,
    /// Key enabling body encryption.
    pub encryption_key: Option<SymmetricKey>,
    /// Global ceiling on concurrently processed commands.
    pub max_concurrent_receive: Option<usize>,
    /// Upper bound on request body size in bytes.
    pub max_request_bytes: usize,
    /// Tracing filter expression.
    pub log_filter: String,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen_endpoint(),
            route: DEFAULT_ROUTE.to_owned(),
            content_type: None,
            allowed_origins: Vec::new(),
            encryption_key: None,
            max_concurrent_receive: None,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            log_filter: DEFAULT_LOG_FILTER.to_owned(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Loads configuration from the process arguments and environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a source fails to load or a value is
    /// invalid.
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLayer::load().map_err(ConfigError::Load)?.validate()
    }

    /// Loads configuration from explicit arguments (first item is the
    /// program name) and the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a source fails to load or a value is
    /// invalid.
    pub fn load_from_iter<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        ConfigLayer::load_from_iter(args)
            .map_err(ConfigError::Load)?
            .validate()
    }

    /// Address the HTTP listener binds to.
    #[must_use]
    pub const fn listen(&self) -> &HttpEndpoint {
        &self.listen
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// A configuration source failed to load or merge.
    #[error("failed to load configuration: {0}")]
    Load(Arc<OrthoError>),
    /// A merged value failed validation.
    #[error("invalid configuration for '{field}': {message}")]
    Invalid {
        /// Offending field name.
        field: &'static str,
        /// Validation failure description.
        message: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl ToString) -> Self {
        Self::Invalid {
            field,
            message: message.to_string(),
        }
    }
}
