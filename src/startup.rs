//! Application Startup
//!
//! Application building and server initialization.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::domain::{Authenticator, ReadyStateRepository};
use crate::infrastructure::auth::JwtAuthenticator;
use crate::infrastructure::state::{HttpReadyStateRepository, InMemoryReadyStateRepository};
use crate::presentation::http::{handlers::health, routes};
use crate::presentation::middleware::logging;
use crate::presentation::websocket::Gateway;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub settings: Arc<Settings>,
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    gateway: Arc<Gateway>,
    shutdown_tx: watch::Sender<bool>,
    monitor: JoinHandle<()>,
}

impl Application {
    /// Build the application from settings, with the JWT authenticator and
    /// the configured ready-state source.
    pub async fn build(settings: Settings) -> Result<Self> {
        let authenticator: Arc<dyn Authenticator> =
            Arc::new(JwtAuthenticator::new(&settings.jwt.secret));

        let ready_state: Arc<dyn ReadyStateRepository> = match &settings.ready_state.url {
            Some(url) => {
                tracing::info!(url = %url, "Loading ready state from REST service");
                Arc::new(HttpReadyStateRepository::new(
                    url,
                    &settings.internal.token,
                    Duration::from_secs(settings.ready_state.timeout_secs),
                )?)
            }
            None => {
                tracing::warn!("No ready state URL configured, serving empty snapshots");
                Arc::new(InMemoryReadyStateRepository::new())
            }
        };

        Self::build_with(settings, authenticator, ready_state).await
    }

    /// Build with explicit collaborators.
    pub async fn build_with(
        settings: Settings,
        authenticator: Arc<dyn Authenticator>,
        ready_state: Arc<dyn ReadyStateRepository>,
    ) -> Result<Self> {
        health::init_server_start();

        let gateway = Arc::new(Gateway::new(
            settings.gateway.clone(),
            authenticator,
            ready_state,
        ));

        let addr = settings.server_addr();
        let state = AppState {
            gateway: gateway.clone(),
            settings: Arc::new(settings),
        };

        // Build router with middleware
        let router = routes::create_router(state).layer(logging::create_trace_layer());

        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("Listening on {}", listener.local_addr()?);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let monitor = gateway.spawn_heartbeat_monitor(shutdown_rx);

        Ok(Self {
            listener,
            router,
            gateway,
            shutdown_tx,
            monitor,
        })
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn gateway(&self) -> Arc<Gateway> {
        self.gateway.clone()
    }

    /// Run the server until Ctrl+C / SIGTERM
    pub async fn run_until_stopped(self) -> Result<()> {
        self.run_with_shutdown(shutdown_signal()).await
    }

    /// Run the server until `signal` resolves. Every client is asked to
    /// reconnect before the listener stops.
    pub async fn run_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let gateway = self.gateway.clone();
        let shutdown_tx = self.shutdown_tx;

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                signal.await;
                tracing::info!("Shutdown signal received, draining sessions");
                gateway.request_reconnect_all();
                let _ = shutdown_tx.send(true);
            })
            .await?;

        let _ = self.monitor.await;
        tracing::info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
