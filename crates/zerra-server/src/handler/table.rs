//! Registration table mapping type names to typed handler closures.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use zerra_wire::{Blob, ContentType, MessageDispatch, ProviderCall, codec};

use super::{CallResponse, HandlerError, PendingCommand, RequestContext, RequestHandler};

type QueryFn = Arc<
    dyn Fn(Arguments, RequestContext) -> BoxFuture<'static, Result<CallResponse, HandlerError>>
        + Send
        + Sync,
>;

type CommandFn = Arc<
    dyn Fn(
            Blob,
            bool,
            RequestContext,
        ) -> Result<BoxFuture<'static, Result<CallResponse, HandlerError>>, HandlerError>
        + Send
        + Sync,
>;

/// Positional provider arguments, decoded lazily with the request codec.
#[derive(Debug, Clone)]
pub struct Arguments {
    content_type: ContentType,
    blobs: Vec<Blob>,
}

impl Arguments {
    /// Wraps raw argument blobs.
    #[must_use]
    pub const fn new(content_type: ContentType, blobs: Vec<Blob>) -> Self {
        Self {
            content_type,
            blobs,
        }
    }

    /// Number of arguments supplied.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Returns `true` when the call carried no arguments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Decodes the argument at `index`.
    ///
    /// # Errors
    ///
    /// Returns an invalid-arguments [`HandlerError`] when the argument is
    /// missing or does not decode as `T`.
    pub fn get<T>(&self, index: usize) -> Result<T, HandlerError>
    where
        T: DeserializeOwned,
    {
        let blob = self.raw(index).ok_or_else(|| {
            HandlerError::invalid_arguments(format!(
                "argument {index} missing; {} supplied",
                self.blobs.len()
            ))
        })?;
        codec::deserialize(self.content_type, blob.as_bytes()).map_err(|error| {
            HandlerError::invalid_arguments(format!("argument {index} is malformed: {error}"))
        })
    }

    /// Raw bytes of the argument at `index`.
    #[must_use]
    pub fn raw(&self, index: usize) -> Option<&Blob> {
        self.blobs.get(index)
    }
}

/// [`RequestHandler`] backed by closures registered per type.
///
/// ```ignore
/// let table = HandlerTable::new()
///     .query("IPetsQueryProvider", "GetPets", |_args, _ctx| async {
///         Ok::<_, HandlerError>(vec!["Rex".to_owned()])
///     })
///     .command::<AdoptPet, _, _>("AdoptPet", |command, _ctx| async move {
///         kennel.adopt(command).await.map_err(|error| HandlerError::from_error(&error))
///     });
/// ```
#[derive(Clone, Default)]
pub struct HandlerTable {
    queries: HashMap<(String, String), QueryFn>,
    commands: HashMap<String, CommandFn>,
}

impl HandlerTable {
    /// Builds an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider method whose result is encoded with the request
    /// codec.
    #[must_use]
    pub fn query<F, Fut, R>(
        self,
        provider_type: impl Into<String>,
        method: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(Arguments, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        self.query_raw(provider_type, method, move |arguments, context| {
            let content_type = context.content_type();
            let pending = handler(arguments, context);
            async move {
                let value = pending.await?;
                CallResponse::encode(content_type, &value)
            }
        })
    }

    /// Registers a provider method returning a [`CallResponse`] directly,
    /// typically a stream or a void result.
    #[must_use]
    pub fn query_raw<F, Fut>(
        mut self,
        provider_type: impl Into<String>,
        method: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(Arguments, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallResponse, HandlerError>> + Send + 'static,
    {
        let wrapped: QueryFn =
            Arc::new(move |arguments, context| handler(arguments, context).boxed());
        self.queries
            .insert((provider_type.into(), method.into()), wrapped);
        self
    }

    /// Registers a command handler without a result.
    #[must_use]
    pub fn command<C, F, Fut>(self, message_type: impl Into<String>, handler: F) -> Self
    where
        C: DeserializeOwned + Send + 'static,
        F: Fn(C, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.command_with_result::<C, (), _, _>(message_type, handler)
    }

    /// Registers a command handler that produces a result.
    ///
    /// The result is only encoded when the caller asked for it.
    #[must_use]
    pub fn command_with_result<C, R, F, Fut>(
        mut self,
        message_type: impl Into<String>,
        handler: F,
    ) -> Self
    where
        C: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(C, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    {
        // Decoding happens eagerly so callers learn about bad payloads even
        // when the handler itself runs detached.
        let wrapped: CommandFn = Arc::new(move |data, want_result, context| {
            let content_type = context.content_type();
            let command = codec::deserialize::<C>(content_type, data.as_bytes()).map_err(
                |error| {
                    HandlerError::invalid_arguments(format!("message data is malformed: {error}"))
                },
            )?;
            let pending = handler(command, context);
            Ok(async move {
                let value = pending.await?;
                if want_result {
                    CallResponse::encode(content_type, &value)
                } else {
                    Ok(CallResponse::Void)
                }
            }
            .boxed())
        });
        self.commands.insert(message_type.into(), wrapped);
        self
    }

    /// Provider types with at least one registered method.
    pub fn provider_types(&self) -> impl Iterator<Item = &str> {
        let mut types = self
            .queries
            .keys()
            .map(|(provider, _)| provider.as_str())
            .collect::<Vec<_>>();
        types.sort_unstable();
        types.dedup();
        types.into_iter()
    }

    /// Message types with a registered handler.
    pub fn message_types(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    fn command_handler(&self, message_type: &str) -> Result<CommandFn, HandlerError> {
        self.commands
            .get(message_type)
            .cloned()
            .ok_or_else(|| HandlerError::not_wired(format_args!("message '{message_type}'")))
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("queries", &self.queries.len())
            .field("commands", &self.commands.len())
            .finish()
    }
}

#[async_trait]
impl RequestHandler for HandlerTable {
    async fn call_provider(
        &self,
        call: ProviderCall,
        context: RequestContext,
    ) -> Result<CallResponse, HandlerError> {
        let key = (call.provider_type().to_owned(), call.method().to_owned());
        let handler = self.queries.get(&key).cloned().ok_or_else(|| {
            HandlerError::not_wired(format_args!("provider method '{}.{}'", key.0, key.1))
        })?;
        let arguments = Arguments::new(context.content_type(), call.into_arguments());
        handler(arguments, context).await
    }

    async fn handle_command_await(
        &self,
        dispatch: MessageDispatch,
        context: RequestContext,
    ) -> Result<CallResponse, HandlerError> {
        let handler = self.command_handler(dispatch.message_type())?;
        let want_result = dispatch.want_result();
        handler(dispatch.into_data(), want_result, context)?.await
    }

    fn prepare_command(
        &self,
        dispatch: MessageDispatch,
        context: RequestContext,
    ) -> Result<PendingCommand, HandlerError> {
        let handler = self.command_handler(dispatch.message_type())?;
        let pending = handler(dispatch.into_data(), false, context)?;
        Ok(pending.map(|outcome| outcome.map(drop)).boxed())
    }
}
