//! Binding and serving the API over HTTP or HTTPS.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ConnectInfo;
use axum::http::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, info, warn};
use ubctl_config::ServerConfig;

use super::{ApiState, router};
use crate::service::ShutdownSignal;
use crate::tls::{self, TlsError};

/// How long in-flight HTTPS connections get to finish after shutdown.
const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bind `config.bind_addr()` and serve until a shutdown signal arrives.
pub async fn serve(
    state: Arc<ApiState>,
    config: &ServerConfig,
    shutdown_rx: broadcast::Receiver<ShutdownSignal>,
) -> Result<(), ServerError> {
    let tls = match (config.use_tls, &config.cert_file, &config.key_file) {
        (true, Some(cert), Some(key)) => Some(tls::api_server_config(Path::new(cert), Path::new(key))?),
        _ => None,
    };

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { addr: addr.clone(), source })?;
    info!(addr = %addr, tls = tls.is_some(), "API server listening");

    serve_listener(listener, state, tls, shutdown_rx).await
}

/// Serve on an already bound listener.
pub async fn serve_listener(
    listener: TcpListener,
    state: Arc<ApiState>,
    tls: Option<Arc<rustls::ServerConfig>>,
    mut shutdown_rx: broadcast::Receiver<ShutdownSignal>,
) -> Result<(), ServerError> {
    let app = router(state);
    match tls {
        None => {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                    info!("API server shutting down");
                })
                .await?;
            Ok(())
        }
        Some(tls) => serve_tls(listener, app, tls, shutdown_rx).await,
    }
}

async fn serve_tls(
    listener: TcpListener,
    app: Router,
    tls: Arc<rustls::ServerConfig>,
    mut shutdown_rx: broadcast::Receiver<ShutdownSignal>,
) -> Result<(), ServerError> {
    let acceptor = TlsAcceptor::from(tls);
    let mut connections = JoinSet::new();

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("API server shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                    continue;
                }
            },
            // Reap finished connections so the set does not grow.
            Some(_) = connections.join_next(), if !connections.is_empty() => continue,
        };

        let acceptor = acceptor.clone();
        let app = app.clone();
        connections.spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!(peer = %peer, error = %e, "TLS handshake failed");
                    return;
                }
            };
            let service = app.map_request(move |mut request: Request<Incoming>| {
                request.extensions_mut().insert(ConnectInfo(peer));
                request
            });
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), TowerToHyperService::new(service))
                .await
            {
                debug!(peer = %peer, error = %e, "connection ended with error");
            }
        });
    }

    let drained = tokio::time::timeout(TLS_DRAIN_TIMEOUT, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(remaining = connections.len(), "closing connections still open after shutdown");
    }
    Ok(())
}
