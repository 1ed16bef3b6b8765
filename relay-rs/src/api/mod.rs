//! REST API module
//!
//! Provides HTTP endpoints for relay installation, sender profile
//! management and delivery monitoring.

pub mod handlers;
pub mod server;

pub use handlers::AppState;
pub use server::ApiServer;
