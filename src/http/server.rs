//! Axum HTTP server implementation

use crate::core::config::HttpConfig;
use crate::core::service::ModerationService;
use crate::http::auth::ACTOR_HEADER;
use crate::http::handlers::{moderation, status, users, AppState};
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// CORS layer from configured origins. No origins means no cross-origin access.
pub fn build_cors_layer(config: &HttpConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    if origins.is_empty() {
        warn!("No CORS origins configured; cross-origin requests are denied");
    }

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(ACTOR_HEADER)])
        .allow_origin(AllowOrigin::list(origins))
}

/// Router with every moderation route
pub fn build_router(service: Arc<ModerationService>, config: &HttpConfig) -> Router {
    let state = AppState::new(service);
    Router::new()
        .route("/health", get(status::health))
        .route("/api/stats", get(status::stats))
        .route("/api/moderation/queue", get(status::queue))
        .route("/api/skills/:slug", delete(moderation::hard_delete_skill))
        .route(
            "/api/skills/:slug/moderation",
            post(moderation::moderate_skill),
        )
        .route("/api/skills/:slug/reports", post(moderation::report_skill))
        .route("/api/versions/:id/rescan", post(moderation::rescan_version))
        .route("/api/users/:id/ban", post(users::ban_user))
        .route("/api/users/:id/unban", post(users::unban_user))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors_layer(config)),
        )
        .with_state(state)
}

/// Moderation HTTP server
pub struct ModerationServer {
    service: Arc<ModerationService>,
    addr: SocketAddr,
}

impl ModerationServer {
    /// Create a new server instance
    pub fn new(service: Arc<ModerationService>, host: &str, port: u16) -> Result<Self, String> {
        let addr = Self::parse_address(host, port)?;
        Ok(Self { service, addr })
    }

    /// Parse and normalize host:port into a SocketAddr
    fn parse_address(host: &str, port: u16) -> Result<SocketAddr, String> {
        let normalized_host = Self::normalize_host(host);

        // IPv6 addresses need brackets
        let addr_str = if normalized_host.contains(':') {
            format!("[{}]:{}", normalized_host, port)
        } else {
            format!("{}:{}", normalized_host, port)
        };

        addr_str.parse().map_err(|_| {
            format!(
                "Unable to parse address '{}'. Use IP addresses like '127.0.0.1', '0.0.0.0' or '::1'",
                addr_str
            )
        })
    }

    fn normalize_host(host: &str) -> String {
        match host {
            "localhost" => "127.0.0.1".to_string(),
            "::1" | "[::1]" => "::1".to_string(),
            "::" | "[::]" => "::".to_string(),
            _ => host.to_string(),
        }
    }

    /// Start the server
    pub async fn serve(self) -> Result<(), Box<dyn std::error::Error>> {
        let app = build_router(self.service.clone(), &self.service.config().http);

        info!("Starting moderation HTTP server on {}", self.addr);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!("Server bound to {}", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        info!("Server stopped");
        Ok(())
    }

    /// Get server address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_variants() {
        assert_eq!(
            ModerationServer::parse_address("localhost", 8090).unwrap(),
            "127.0.0.1:8090".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            ModerationServer::parse_address("::1", 80).unwrap(),
            "[::1]:80".parse::<SocketAddr>().unwrap()
        );
        assert!(ModerationServer::parse_address("not a host", 80).is_err());
    }
}
