//! Gateway HTTP server.
//!
//! One task per connection, HTTP/1.1 via hyper. Each request body is
//! captured up to `max_request_body_size` before the pipeline runs, so the
//! firewall and the dispatcher see the same bytes.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use citadel_middleware::{BufferedRequest, Rejection, RejectionKind, Response};
use http::Request;
use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::Gateway;

/// Gateway server.
pub struct GatewayServer {
    gateway: Arc<Gateway>,
    listener: TcpListener,
}

impl GatewayServer {
    /// Build the gateway from `config` and bind its listener.
    pub async fn bind(config: GatewayConfig) -> GatewayResult<Self> {
        let gateway = Gateway::new(config)?;
        Self::bind_gateway(gateway).await
    }

    /// Bind a listener for an already built gateway.
    pub async fn bind_gateway(gateway: Gateway) -> GatewayResult<Self> {
        let settings = &gateway.config().server;
        let ip = settings
            .listen_addr
            .parse()
            .map_err(|e| GatewayError::config(format!("invalid listen address: {e}")))?;
        let addr = SocketAddr::new(ip, settings.listen_port);

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| GatewayError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        Ok(Self {
            gateway: Arc::new(gateway),
            listener,
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> GatewayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The gateway served by this server.
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Serve until Ctrl-C or SIGTERM.
    pub async fn run(self) -> GatewayResult<()> {
        self.serve_with_shutdown(shutdown_signal()).await
    }

    /// Serve until `shutdown` resolves.
    ///
    /// Stops accepting new connections on shutdown; connections already
    /// accepted run to completion on their own tasks.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = self.local_addr()?;
        info!(
            addr = %addr,
            services = ?self.gateway.registry().service_names(),
            "citadel gateway listening"
        );

        let sweeper = spawn_idle_sweeper(&self.gateway);
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            let gateway = Arc::clone(&self.gateway);
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let gateway = Arc::clone(&gateway);
                    async move { Ok::<_, Infallible>(handle_request(&gateway, req, peer).await) }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(peer = %peer, error = %e, "connection error");
                }
            });
        }

        sweeper.abort();
        info!("citadel gateway stopped accepting connections");
        Ok(())
    }
}

impl std::fmt::Debug for GatewayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayServer")
            .field("local_addr", &self.listener.local_addr().ok())
            .finish_non_exhaustive()
    }
}

/// Capture the body and run the request through the gateway.
async fn handle_request(gateway: &Gateway, req: Request<Incoming>, peer: SocketAddr) -> Response {
    let limit = gateway.config().server.max_request_body_size;
    let (parts, body) = req.into_parts();

    let body = match Limited::new(body, limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let rejection = if e.downcast_ref::<http_body_util::LengthLimitError>().is_some() {
                Rejection::new(RejectionKind::PayloadTooLarge, "request body too large")
            } else {
                debug!(peer = %peer, error = %e, "failed to read request body");
                Rejection::new(RejectionKind::BadRequest, "failed to read request body")
            };
            return gateway.reject_capture(rejection);
        }
    };

    let request = BufferedRequest::new(parts.method, parts.uri, parts.headers, body);
    gateway.handle(request, peer).await
}

/// Periodically drop rate-limit windows with no recent traffic.
fn spawn_idle_sweeper(gateway: &Arc<Gateway>) -> JoinHandle<()> {
    let limiter = Arc::clone(gateway.limiter());
    let period = gateway.config().rate_limit.idle_sweep_interval;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = limiter.evict_idle();
            if evicted > 0 {
                debug!(evicted, remaining = limiter.tracked_clients(), "evicted idle clients");
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c"),
        () = terminate => info!("received SIGTERM"),
    }
}
