//! Web server for coursedrop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use tokio::net::TcpListener;

use crate::admission::AdmissionPipeline;
use crate::config::ServerConfig;
use crate::{CourseDropError, Result};

use super::handlers::AppState;
use super::middleware::IpThrottle;
use super::router::create_router;

/// Interval between sweeps of the upload rate limiter.
const LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

/// Web server for the API.
pub struct WebServer {
    addr: SocketAddr,
    app_state: Arc<AppState>,
    throttle: Arc<IpThrottle>,
    cors_origins: Vec<String>,
}

impl WebServer {
    /// Create a new web server.
    pub fn new(config: &ServerConfig, pipeline: AdmissionPipeline) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| {
                CourseDropError::Config(format!(
                    "invalid server address {}:{}: {e}",
                    config.host, config.port
                ))
            })?;

        Ok(Self {
            addr,
            app_state: Arc::new(AppState::new(pipeline)),
            throttle: Arc::new(IpThrottle::new(config.api_rate_limit)),
            cors_origins: config.cors_origins.clone(),
        })
    }

    /// Get the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Periodically forget clients with no uploads in the current window.
    fn start_limiter_sweep_task(state: Arc<AppState>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(LIMITER_SWEEP_INTERVAL);

            // Skip the first immediate tick
            interval.tick().await;

            loop {
                interval.tick().await;
                let removed = state.pipeline.limiter().sweep(Instant::now());
                if removed > 0 {
                    tracing::debug!(removed, "Swept idle clients from upload rate limiter");
                }
            }
        });
    }

    async fn bind(self) -> Result<(TcpListener, Router, SocketAddr)> {
        let router = create_router(
            self.app_state.clone(),
            self.throttle.clone(),
            &self.cors_origins,
        );

        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;

        Self::start_limiter_sweep_task(self.app_state);
        self.throttle.start_cleanup_task();

        tracing::info!("Web server listening on http://{}", local_addr);
        Ok((listener, router, local_addr))
    }

    /// Run the web server until ctrl-c.
    pub async fn run(self) -> Result<()> {
        let (listener, router, _) = self.bind().await?;

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        tracing::info!("Web server stopped");
        Ok(())
    }

    /// Run the server in the background and return the actual bound address.
    ///
    /// This is useful for testing when binding to port 0.
    pub async fn run_with_addr(self) -> Result<SocketAddr> {
        let (listener, router, local_addr) = self.bind().await?;

        tokio::spawn(async move {
            if let Err(e) = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            {
                tracing::error!("Web server error: {}", e);
            }
        });

        Ok(local_addr)
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
