//! HTTP server lifecycle.

use std::future::Future;
use std::sync::Arc;

use axum::http::{HeaderName, Method};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use rag_core::{Result, ServerConfig};

use crate::handlers::AppState;
use crate::middleware::REQUEST_ID_HEADER;
use crate::routes::create_router;
use crate::service::RagService;

/// HTTP API server.
pub struct HttpServer {
    config: ServerConfig,
    service: Arc<RagService>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(config: ServerConfig, service: Arc<RagService>) -> Self {
        Self { config, service }
    }

    /// Full application with CORS and tracing layers applied.
    pub fn app(&self) -> Router {
        let mut app = create_router(AppState {
            service: self.service.clone(),
        });

        if self.config.cors_enabled {
            let cors = CorsLayer::new()
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any)
                .allow_origin(Any)
                .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)]);
            app = app.layer(cors);
        }

        app.layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_address.as_str()).await?;
        info!("HTTP API server listening on http://{}", listener.local_addr()?);

        axum::serve(listener, self.app())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }
}

/// Resolve on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
