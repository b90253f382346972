use std::sync::Arc;

use axum::http::{header, Method};
use redis::Client as RedisClient;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meeting_room_api::{
    build_router,
    config::Config,
    db,
    services::{email::EmailService, token::TokenConfig},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    info!("Database connected and migrations applied");

    let redis_client = RedisClient::open(config.redis_url.as_str())?;
    let redis_conn = redis_client.get_multiplexed_async_connection().await?;
    info!("Redis connected");

    let email = EmailService::new(&config).map(Arc::new);
    if email.is_some() {
        info!("SMTP email service configured");
    } else {
        info!("SMTP not configured, verification codes cannot be delivered");
    }

    let tokens = Arc::new(TokenConfig::from_config(&config));
    info!(
        algorithm = ?tokens.algorithm,
        access_ttl_secs = tokens.access_ttl_secs,
        refresh_ttl_secs = tokens.refresh_ttl_secs,
        "JWT signing configured"
    );

    let state = AppState {
        db: pool,
        redis: redis_conn,
        config: config.clone(),
        tokens,
        email,
    };

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_origin(Any);

    let app = build_router(state).layer(cors);

    let addr = format!("{}:{}", config.host, config.port);
    info!("meeting room API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
