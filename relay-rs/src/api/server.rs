//! API Server - HTTP server for the REST API

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::handlers::{self, AppState};

/// API Server configuration
pub struct ApiServer {
    state: Arc<AppState>,
    addr: String,
}

impl ApiServer {
    pub fn new(state: Arc<AppState>, addr: String) -> Self {
        Self { state, addr }
    }

    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let api_routes = Router::new()
            .route("/status", get(handlers::status))
            .route("/system", get(handlers::system))
            .route("/senders", get(handlers::list_senders))
            .route("/senders", post(handlers::create_sender))
            .route("/senders/:name", put(handlers::update_sender))
            .route("/senders/:name", delete(handlers::delete_sender))
            .route("/senders/:name/activate", post(handlers::activate_sender))
            .route("/config", get(handlers::get_config))
            .route("/config/apply", post(handlers::apply_config))
            .route("/install", post(handlers::install))
            .route("/uninstall", post(handlers::uninstall))
            .route("/reset", post(handlers::reset))
            .route("/log", get(handlers::get_log))
            .route("/log/status", get(handlers::log_status))
            .route("/queue", get(handlers::get_queue))
            .route("/queue/flush", post(handlers::flush_queue))
            .route("/send-test", post(handlers::send_test))
            .route("/backups", get(handlers::list_backups))
            .route("/backups", post(handlers::create_backup))
            .route("/backups/:name/restore", post(handlers::restore_backup))
            .route("/backups/:name", delete(handlers::delete_backup));

        Router::new()
            .route("/health", get(handlers::health))
            .nest("/api", api_routes)
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Start the API server
    pub async fn run(&self) -> std::io::Result<()> {
        let router = self.router();

        info!("Starting API server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
