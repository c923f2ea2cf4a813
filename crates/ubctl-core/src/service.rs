//! Service process: startup, configuration reload, and shutdown.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use ubctl_config::{AppConfig, ConfigError};

use crate::api::server::ServerError;
use crate::api::{self, ApiState, rate_limit};
use crate::control::{ControlClient, ControlError};
use crate::zones::ZoneManager;

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// Errors from the service runtime.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("cannot reach the resolver daemon: {0}")]
    Control(#[from] ControlError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("failed to install signal handler: {0}")]
    Signal(std::io::Error),

    #[error("API server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// The ubctl HTTP service.
pub struct Service {
    config: AppConfig,
    config_path: Option<PathBuf>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

impl Service {
    /// `config_path` is re-read on `SIGHUP`; without one, reload is a no-op.
    pub fn new(config: AppConfig, config_path: Option<PathBuf>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            config_path,
            shutdown_tx,
        }
    }

    /// Connect to the daemon and serve the API until Ctrl-C, `SIGTERM`,
    /// or [`Service::shutdown`].
    pub async fn run(&self) -> Result<(), ServiceError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        info!(
            api = %self.config.server.bind_addr(),
            control = %self.config.control.transport,
            "ubctl service starting"
        );

        let client = Arc::new(ControlClient::connect(&self.config.control).await?);
        let (config_tx, config_rx) = watch::channel(self.config.clone());
        let state = Arc::new(ApiState::new(ZoneManager::new(client.clone()), config_rx));

        let mut server = {
            let state = state.clone();
            let server_config = self.config.server.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            tokio::spawn(async move { api::serve(state, &server_config, shutdown_rx).await })
        };
        let cleanup = tokio::spawn(rate_limit::cleanup_loop(state.clone()));

        let mut sigterm = signal(SignalKind::terminate()).map_err(ServiceError::Signal)?;
        let mut sighup = signal(SignalKind::hangup()).map_err(ServiceError::Signal)?;

        let early_exit = loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping service");
                    break None;
                }
                _ = tokio::signal::ctrl_c() => {
                    warn!("Ctrl-C received, initiating graceful shutdown");
                    break None;
                }
                _ = sigterm.recv() => {
                    warn!("SIGTERM received, initiating graceful shutdown");
                    break None;
                }
                _ = sighup.recv() => {
                    if let Some(path) = &self.config_path {
                        if let Err(e) = reload_config(path, &config_tx, &state).await {
                            error!(path = %path.display(), error = %e, "configuration reload failed; keeping current settings");
                        }
                    } else {
                        warn!("SIGHUP received but no configuration file to reload");
                    }
                }
                result = &mut server => break Some(result),
            }
        };

        let result = match early_exit {
            Some(result) => result.map_err(ServiceError::from).and_then(|r| r.map_err(ServiceError::from)),
            None => {
                let _ = self.shutdown_tx.send(ShutdownSignal);
                server.await?.map_err(ServiceError::from)
            }
        };

        cleanup.abort();
        client.close().await;
        info!("Service stopped");
        result
    }

    /// Request a graceful shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

/// Re-read the configuration file and publish it to the running API.
///
/// The API key and rate-limit parameters take effect immediately. Listener
/// and daemon connection settings only change on restart.
pub async fn reload_config(
    path: &Path,
    config_tx: &watch::Sender<AppConfig>,
    state: &ApiState,
) -> Result<(), ConfigError> {
    let new = AppConfig::load(path).await?;

    {
        let current = config_tx.borrow();
        if !same(&current.control, &new.control) {
            warn!("control settings changed; restart ubctl to apply them");
        }
        if !same(&current.server, &new.server) {
            warn!("server settings changed; restart ubctl to apply them");
        }
    }

    state
        .limiter
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .reconfigure(new.rate_limit.clone());
    config_tx.send_replace(new);
    info!(path = %path.display(), "configuration reloaded");
    Ok(())
}

fn same<T: serde::Serialize>(a: &T, b: &T) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
