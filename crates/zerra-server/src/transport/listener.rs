//! TCP listener serving the axum router.

use std::net::SocketAddr;

use axum::Router;
use tokio::net::{TcpListener, lookup_host};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use zerra_config::HttpEndpoint;

use super::{LISTENER_TARGET, ListenerError};

/// Bound HTTP listener awaiting a router.
#[derive(Debug)]
pub struct HttpListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl HttpListener {
    /// Resolves `endpoint` and binds the first address that accepts.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when resolution fails or nothing binds.
    pub async fn bind(endpoint: &HttpEndpoint) -> Result<Self, ListenerError> {
        let host = endpoint.host();
        let port = endpoint.port();
        let addrs = lookup_host((host, port))
            .await
            .map_err(|source| ListenerError::Resolve {
                host: host.to_owned(),
                port,
                source,
            })?;

        let mut last_error = None;
        for addr in addrs {
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    let local_addr = listener
                        .local_addr()
                        .map_err(|source| ListenerError::BindTcp { addr, source })?;
                    info!(
                        target: LISTENER_TARGET,
                        endpoint = %endpoint,
                        addr = %local_addr,
                        "listener bound"
                    );
                    return Ok(Self {
                        listener,
                        local_addr,
                    });
                }
                Err(source) => {
                    warn!(
                        target: LISTENER_TARGET,
                        addr = %addr,
                        error = %source,
                        "bind attempt failed"
                    );
                    last_error = Some(ListenerError::BindTcp { addr, source });
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ListenerError::ResolveEmpty {
            host: host.to_owned(),
            port,
        }))
    }

    /// Address actually bound; differs from the endpoint when port 0 is used.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves `router` until `shutdown` is cancelled, then drains in-flight
    /// connections.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::Serve`] when the accept loop fails.
    pub async fn serve(
        self,
        router: Router,
        shutdown: CancellationToken,
    ) -> Result<(), ListenerError> {
        let addr = self.local_addr;
        axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(|source| ListenerError::Serve { source })?;
        info!(target: LISTENER_TARGET, addr = %addr, "listener drained");
        Ok(())
    }
}
