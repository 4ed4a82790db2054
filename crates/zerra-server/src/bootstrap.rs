//! Server bootstrap orchestration.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use zerra_config::{Config, ConfigError};

use crate::handler::RequestHandler;
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::server::{CqrsServer, CqrsServerBuilder, ServerSettings};
use crate::telemetry::{self, TelemetryError, TelemetryHandle};
use crate::transport::{HttpListener, ListenerError};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the server configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a source fails to load or validate.
    fn load(&self) -> Result<Config, ConfigError>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, ConfigError> {
        Config::load()
    }
}

/// Loader returning a fixed configuration, for embedding and tests.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps an already-built configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, ConfigError> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: ConfigError,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The HTTP listener could not be bound.
    #[error("failed to bind HTTP listener: {source}")]
    Listener {
        /// Underlying listener error.
        #[source]
        source: ListenerError,
    },
}

/// Result of a successful bootstrap: configured, bound, not yet serving.
pub struct CqrsService {
    config: Config,
    server: CqrsServer,
    listener: HttpListener,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
}

impl CqrsService {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Server context, for introspection and attaching to other routers.
    #[must_use]
    pub fn server(&self) -> &CqrsServer {
        &self.server
    }

    /// Address the listener bound.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Token that stops the listener and cancels in-flight calls.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.server.shutdown_token().clone()
    }

    /// Serves the CQRS route alone until shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when the accept loop fails.
    pub async fn serve(self) -> Result<(), ListenerError> {
        let router = self.server.clone().into_router();
        self.serve_router(router).await
    }

    /// Serves the CQRS middleware layered over `router` until shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when the accept loop fails.
    pub async fn serve_with(self, router: Router) -> Result<(), ListenerError> {
        let router = self.server.clone().attach(router);
        self.serve_router(router).await
    }

    async fn serve_router(self, router: Router) -> Result<(), ListenerError> {
        let addr = self.listener.local_addr();
        let token = self.shutdown_token();
        let outcome = self.listener.serve(router, token).await;
        self.reporter.listener_stopped(addr);
        outcome
    }
}

/// Bootstraps with the process configuration and structured health events.
///
/// # Errors
///
/// Returns [`BootstrapError`] when configuration, telemetry or binding fails.
pub async fn bootstrap<F>(
    handler: Arc<dyn RequestHandler>,
    configure: F,
) -> Result<CqrsService, BootstrapError>
where
    F: FnOnce(CqrsServerBuilder) -> CqrsServerBuilder + Send,
{
    bootstrap_with(
        &SystemConfigLoader,
        Arc::new(StructuredHealthReporter::new()),
        handler,
        configure,
    )
    .await
}

/// Bootstraps the server using the supplied collaborators.
///
/// `configure` registers throttles and optional authorizers on the builder.
///
/// # Errors
///
/// Returns [`BootstrapError`] when configuration, telemetry or binding fails;
/// the reporter is told about every failure before it is returned.
pub async fn bootstrap_with<F>(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    handler: Arc<dyn RequestHandler>,
    configure: F,
) -> Result<CqrsService, BootstrapError>
where
    F: FnOnce(CqrsServerBuilder) -> CqrsServerBuilder + Send,
{
    reporter.bootstrap_starting();

    let config = match loader.load() {
        Ok(config) => config,
        Err(source) => {
            let error = BootstrapError::Configuration { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let telemetry = match telemetry::initialise(&config) {
        Ok(handle) => handle,
        Err(source) => {
            let error = BootstrapError::Telemetry { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let listener = match HttpListener::bind(config.listen()).await {
        Ok(listener) => listener,
        Err(source) => {
            let error = BootstrapError::Listener { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let server = configure(CqrsServer::builder(
        ServerSettings::from_config(&config),
        handler,
    ))
    .build();

    reporter.bootstrap_succeeded(&config);
    reporter.listener_bound(listener.local_addr());

    Ok(CqrsService {
        config,
        server,
        listener,
        telemetry,
        reporter,
    })
}
