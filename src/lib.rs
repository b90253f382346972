// Library exports for the API server, the seed tool and tests
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use config::Config;
use services::{email::EmailService, token::TokenConfig};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub redis: redis::aio::MultiplexedConnection,
    pub config: Arc<Config>,
    pub tokens: Arc<TokenConfig>,
    pub email: Option<Arc<EmailService>>,
}

/// Full route table. Guards are attached per route inside the route modules;
/// the token configuration reaches them as a request extension.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health::health_check))
        .merge(routes::app::router())
        .nest("/user", routes::user::router())
        .layer(Extension(state.tokens.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
