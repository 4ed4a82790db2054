//! Server context shared by every request.
//!
//! [`CqrsServer`] owns the throttle registry, the receive counter, the
//! handler delegates and the response buffer pool. It is built once during
//! startup and handed to the axum middleware as state; nothing here is a
//! process-wide singleton, so several servers can coexist in one process
//! (the test suite relies on this).

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use axum::Router;
use axum::http::StatusCode;
use axum::middleware;
use tokio_util::sync::CancellationToken;
use zerra_config::{Config, DEFAULT_MAX_REQUEST_BYTES, DEFAULT_ROUTE};
use zerra_wire::{ContentType, SymmetricKey};

use crate::auth::{Authorizer, ClaimsBinder, OriginPolicy, PassthroughBinder};
use crate::dispatch::cqrs_middleware;
use crate::handler::RequestHandler;
use crate::receive::ReceiveCounter;
use crate::throttle::ThrottleRegistry;

/// Size of each pooled buffer used to copy streamed results.
pub const STREAM_BUFFER_LEN: usize = 16 * 1024;

const POOL_RETAIN: usize = 64;

/// Transport settings the router needs at request time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Route the middleware answers on.
    pub route: String,
    /// Content type every request must use, when pinned.
    pub content_type: Option<ContentType>,
    /// Key enabling body encryption.
    pub encryption_key: Option<SymmetricKey>,
    /// Upper bound on request body size in bytes.
    pub max_request_bytes: usize,
    /// Allowed `Origin` values; empty permits any origin.
    pub allowed_origins: Vec<String>,
    /// Global ceiling on concurrently processed commands.
    pub max_concurrent_receive: Option<usize>,
}

impl ServerSettings {
    /// Extracts the transport settings from validated configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            route: config.route.clone(),
            content_type: config.content_type,
            encryption_key: config.encryption_key.clone(),
            max_request_bytes: config.max_request_bytes,
            allowed_origins: config.allowed_origins.clone(),
            max_concurrent_receive: config.max_concurrent_receive,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            route: DEFAULT_ROUTE.to_owned(),
            content_type: None,
            encryption_key: None,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            allowed_origins: Vec::new(),
            max_concurrent_receive: None,
        }
    }
}

pub(crate) struct ServerState {
    pub(crate) settings: ServerSettings,
    pub(crate) throttles: ThrottleRegistry,
    pub(crate) receive: ReceiveCounter,
    pub(crate) handler: Arc<dyn RequestHandler>,
    pub(crate) authorizer: Option<Arc<dyn Authorizer>>,
    pub(crate) binder: Arc<dyn ClaimsBinder>,
    pub(crate) origins: OriginPolicy,
    pub(crate) buffers: Arc<BufferPool>,
    pub(crate) shutdown: CancellationToken,
}

/// Cheaply cloneable handle to the server context.
#[derive(Clone)]
pub struct CqrsServer {
    pub(crate) inner: Arc<ServerState>,
}

impl CqrsServer {
    /// Starts building a server around `handler`.
    #[must_use]
    pub fn builder(settings: ServerSettings, handler: Arc<dyn RequestHandler>) -> CqrsServerBuilder {
        CqrsServerBuilder {
            settings,
            handler,
            throttles: ThrottleRegistry::new(),
            authorizer: None,
            binder: Arc::new(PassthroughBinder),
            shutdown: CancellationToken::new(),
        }
    }

    /// Per-type throttles.
    #[must_use]
    pub fn throttles(&self) -> &ThrottleRegistry {
        &self.inner.throttles
    }

    /// Global command admission counter.
    #[must_use]
    pub fn receive_counter(&self) -> &ReceiveCounter {
        &self.inner.receive
    }

    /// Transport settings.
    #[must_use]
    pub fn settings(&self) -> &ServerSettings {
        &self.inner.settings
    }

    /// Token cancelled when the server shuts down; request tokens are its
    /// children.
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    /// Router that answers the configured route and returns `404` elsewhere.
    #[must_use]
    pub fn into_router(self) -> Router {
        self.attach(Router::new().fallback(|| async { StatusCode::NOT_FOUND }))
    }

    /// Layers the CQRS middleware over an existing router; unrelated paths
    /// and methods fall through to it untouched.
    #[must_use]
    pub fn attach(self, router: Router) -> Router {
        router.layer(middleware::from_fn_with_state(self, cqrs_middleware))
    }
}

impl fmt::Debug for CqrsServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CqrsServer")
            .field("settings", &self.inner.settings)
            .field("throttles", &self.inner.throttles.len())
            .field("receive", &self.inner.receive)
            .field("authorizer", &self.inner.authorizer.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder registering throttles and collaborators before serving.
#[must_use]
pub struct CqrsServerBuilder {
    settings: ServerSettings,
    handler: Arc<dyn RequestHandler>,
    throttles: ThrottleRegistry,
    authorizer: Option<Arc<dyn Authorizer>>,
    binder: Arc<dyn ClaimsBinder>,
    shutdown: CancellationToken,
}

impl CqrsServerBuilder {
    /// Registers a provider or message type with a concurrency capacity.
    ///
    /// The first registration for a type wins.
    pub fn throttle(self, type_name: impl Into<String>, capacity: usize) -> Self {
        self.throttles.register(type_name, capacity);
        self
    }

    /// Installs a header authorizer; envelope claims are then ignored.
    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// Replaces the default claims binder.
    pub fn claims_binder(mut self, binder: Arc<dyn ClaimsBinder>) -> Self {
        self.binder = binder;
        self
    }

    /// Uses an externally owned shutdown token.
    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Finalizes the server context.
    #[must_use]
    pub fn build(self) -> CqrsServer {
        let receive = ReceiveCounter::new(self.settings.max_concurrent_receive);
        let origins = OriginPolicy::new(&self.settings.allowed_origins);
        CqrsServer {
            inner: Arc::new(ServerState {
                settings: self.settings,
                throttles: self.throttles,
                receive,
                handler: self.handler,
                authorizer: self.authorizer,
                binder: self.binder,
                origins,
                buffers: Arc::new(BufferPool::default()),
                shutdown: self.shutdown,
            }),
        }
    }
}

/// Recycles fixed-size copy buffers for streamed responses.
#[derive(Debug, Default)]
pub(crate) struct BufferPool {
    free: Mutex<Vec<Box<[u8]>>>,
}

impl BufferPool {
    pub(crate) fn take(self: &Arc<Self>) -> PooledBuffer {
        let buffer = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| vec![0_u8; STREAM_BUFFER_LEN].into_boxed_slice());
        PooledBuffer {
            buffer: Some(buffer),
            pool: Arc::clone(self),
        }
    }

    fn give_back(&self, buffer: Box<[u8]>) {
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < POOL_RETAIN {
            free.push(buffer);
        }
    }

    #[cfg(test)]
    pub(crate) fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Buffer on loan from the pool; returned on drop.
pub(crate) struct PooledBuffer {
    buffer: Option<Box<[u8]>>,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        self.buffer.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.give_back(buffer);
        }
    }
}
