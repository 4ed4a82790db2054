//! Request packaging and the HTTP exchange.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use zerra_config::DEFAULT_ROUTE;
use zerra_wire::{Blob, Claim, ContentType, RemoteError, RequestData, SymmetricKey, codec, crypto};

use crate::CLIENT_TARGET;
use crate::errors::ClientError;

const DEFAULT_SOURCE: &str = env!("CARGO_PKG_NAME");

/// Where and how to reach a Zerra server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Scheme, host and port, e.g. `http://127.0.0.1:9780`.
    pub base_url: String,
    /// Route the server middleware answers on.
    pub route: String,
    /// Codec used for requests and expected for responses.
    pub content_type: ContentType,
    /// Shared key, when the server encrypts bodies.
    pub encryption_key: Option<SymmetricKey>,
    /// Caller identity written into every envelope.
    pub source: String,
}

impl ClientSettings {
    /// Settings for `base_url` with the default route and the JSON codec.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            route: DEFAULT_ROUTE.to_owned(),
            content_type: ContentType::Json,
            encryption_key: None,
            source: DEFAULT_SOURCE.to_owned(),
        }
    }

    /// Uses another route.
    #[must_use]
    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = route.into();
        self
    }

    /// Uses another codec.
    #[must_use]
    pub const fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    /// Encrypts bodies with `key`.
    #[must_use]
    pub fn with_encryption_key(mut self, key: SymmetricKey) -> Self {
        self.encryption_key = Some(key);
        self
    }

    /// Identifies the caller as `source`.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Full URL requests are posted to.
    #[must_use]
    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let route = self.route.trim_start_matches('/');
        format!("{base}/{route}")
    }
}

/// Client for one Zerra server endpoint.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct CqrsClient {
    http: reqwest::Client,
    settings: Arc<ClientSettings>,
    endpoint: Arc<str>,
    claims: Option<Vec<Claim>>,
}

impl CqrsClient {
    /// Builds a client with a fresh connection pool.
    #[must_use]
    pub fn new(settings: ClientSettings) -> Self {
        Self::with_http(reqwest::Client::new(), settings)
    }

    /// Builds a client around an existing `reqwest` client.
    #[must_use]
    pub fn with_http(http: reqwest::Client, settings: ClientSettings) -> Self {
        let endpoint = Arc::from(settings.endpoint());
        Self {
            http,
            settings: Arc::new(settings),
            endpoint,
            claims: None,
        }
    }

    /// Settings this client was built with.
    #[must_use]
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Copy of this client that forwards `claims` with every call.
    #[must_use]
    pub fn with_claims(&self, claims: Vec<Claim>) -> Self {
        Self {
            claims: Some(claims),
            ..self.clone()
        }
    }

    /// Starts a provider query.
    #[must_use]
    pub fn query(
        &self,
        provider_type: impl Into<String>,
        method: impl Into<String>,
    ) -> ProviderQuery<'_> {
        ProviderQuery {
            client: self,
            provider_type: provider_type.into(),
            method: method.into(),
            arguments: Vec::new(),
        }
    }

    /// Sends a command without waiting for its handler.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the command cannot be sent or the server
    /// refuses it.
    pub async fn dispatch<C>(&self, message_type: &str, command: &C) -> Result<(), ClientError>
    where
        C: Serialize + ?Sized,
    {
        self.send_command(message_type, command, false, false)
            .await
            .map(drop)
    }

    /// Sends a command and waits for its handler to finish.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the exchange fails or the handler raised
    /// an error.
    pub async fn dispatch_await<C>(&self, message_type: &str, command: &C) -> Result<(), ClientError>
    where
        C: Serialize + ?Sized,
    {
        self.send_command(message_type, command, true, false)
            .await
            .map(drop)
    }

    /// Sends a command, waits for it and decodes the handler's result.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the exchange fails, the handler raised an
    /// error, or the result does not decode as `R`.
    pub async fn dispatch_await_result<C, R>(
        &self,
        message_type: &str,
        command: &C,
    ) -> Result<R, ClientError>
    where
        C: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let body = self.send_command(message_type, command, true, true).await?;
        Ok(codec::deserialize(self.settings.content_type, &body)?)
    }

    async fn send_command<C>(
        &self,
        message_type: &str,
        command: &C,
        wait: bool,
        want_result: bool,
    ) -> Result<Bytes, ClientError>
    where
        C: Serialize + ?Sized,
    {
        let data = codec::serialize(self.settings.content_type, command)?;
        let request = RequestData::dispatch(
            message_type,
            Blob::new(data),
            wait,
            want_result,
            self.settings.source.as_str(),
        );
        self.exchange(request).await
    }

    /// Posts one envelope and returns the plaintext success body.
    async fn exchange(&self, request: RequestData) -> Result<Bytes, ClientError> {
        let request = match &self.claims {
            Some(claims) => request.with_claims(claims.clone()),
            None => request,
        };
        let content_type = self.settings.content_type;
        let key = self.settings.encryption_key.as_ref();

        let plain = codec::serialize(content_type, &request)?;
        let body = match key {
            Some(key) => crypto::seal(key, &plain).map_err(ClientError::Crypto)?,
            None => plain,
        };

        let response = self
            .http
            .post(&*self.endpoint)
            .header(CONTENT_TYPE, content_type.media_type())
            .body(body)
            .send()
            .await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        debug!(
            target: CLIENT_TARGET,
            endpoint = &*self.endpoint,
            status = status.as_u16(),
            body_len = bytes.len(),
            "remote call answered"
        );

        if status == StatusCode::OK {
            return open(key, bytes).map_err(ClientError::Crypto);
        }
        Err(self.failure(status, key, bytes))
    }

    fn failure(&self, status: StatusCode, key: Option<&SymmetricKey>, bytes: Bytes) -> ClientError {
        if bytes.is_empty() {
            return ClientError::Status { status };
        }
        let decoded = open(key, bytes)
            .map_err(|error| error.to_string())
            .and_then(|plain| {
                codec::deserialize::<RemoteError>(self.settings.content_type, &plain)
                    .map_err(|error| error.to_string())
            });
        match decoded {
            Ok(error) => ClientError::Remote { status, error },
            Err(reason) => {
                warn!(
                    target: CLIENT_TARGET,
                    status = status.as_u16(),
                    reason = reason.as_str(),
                    "error body could not be decoded"
                );
                ClientError::Status { status }
            }
        }
    }
}

/// Empty bodies are void results and are never encrypted.
fn open(key: Option<&SymmetricKey>, bytes: Bytes) -> std::io::Result<Bytes> {
    match key {
        Some(key) if !bytes.is_empty() => crypto::open(key, &bytes).map(Bytes::from),
        _ => Ok(bytes),
    }
}

/// Provider query under construction.
#[derive(Debug)]
#[must_use = "a query does nothing until it is sent"]
pub struct ProviderQuery<'a> {
    client: &'a CqrsClient,
    provider_type: String,
    method: String,
    arguments: Vec<Blob>,
}

impl ProviderQuery<'_> {
    /// Appends a positional argument, encoded with the client's codec.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Codec`] when `value` cannot be encoded.
    pub fn arg<T>(mut self, value: &T) -> Result<Self, ClientError>
    where
        T: Serialize + ?Sized,
    {
        let encoded = codec::serialize(self.client.settings.content_type, value)?;
        self.arguments.push(Blob::new(encoded));
        Ok(self)
    }

    /// Sends the query and decodes its result.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the exchange fails, the provider raised
    /// an error, or the result does not decode as `R`.
    pub async fn send<R>(self) -> Result<R, ClientError>
    where
        R: DeserializeOwned,
    {
        let content_type = self.client.settings.content_type;
        let body = self.send_raw().await?;
        Ok(codec::deserialize(content_type, &body)?)
    }

    /// Sends the query and returns the decrypted body without decoding it,
    /// for providers that stream raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the exchange fails or the provider raised
    /// an error.
    pub async fn send_raw(self) -> Result<Bytes, ClientError> {
        let request = RequestData::query(
            self.provider_type,
            self.method,
            self.arguments,
            self.client.settings.source.as_str(),
        );
        self.client.exchange(request).await
    }
}
